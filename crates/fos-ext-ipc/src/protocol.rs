//! Messages exchanged between renderers and the host

use fos_extensions::{
    ChannelGrant, ConnectInfo, ContextKind, HostMessage, Scope, Tag, TransportError,
};
use serde_json::Value;
use smol::channel::Sender;

/// Host-assigned id of an attached renderer
pub type ContextId = u64;

/// A tagged payload on its way to a renderer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: Tag,
    pub payload: Value,
}

/// Renderer to host
#[derive(Debug)]
pub(crate) enum HostRequest {
    Attach {
        id: ContextId,
        kind: ContextKind,
        scope: Scope,
        extension_id: String,
        inbox: Sender<Delivery>,
    },
    Detach {
        id: ContextId,
    },
    Connect {
        from: ContextId,
        target: String,
        info: ConnectInfo,
        reply: Sender<Result<ChannelGrant, TransportError>>,
    },
    SendToAll {
        from: ContextId,
        scope: Scope,
        tag: Tag,
        payload: Value,
    },
    Message {
        from: ContextId,
        message: HostMessage,
    },
    Shutdown,
}
