//! Transport contract
//!
//! The host-facing side of the extension API. A transport delivers
//! `serde_json::Value` payloads addressed by [`Tag`], broadcasts to a peer
//! [`Scope`], and performs the one synchronous round-trip that allocates a
//! port.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;
use crate::runtime::ConnectInfo;
use crate::{PortId, RequestId, TabId};

/// Addressable set of listeners on the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Every context running in a tab
    Tab(TabId),
    /// An extension's background page
    Extension(String),
}

impl Scope {
    /// Tab id, if this scope is a tab
    pub fn tab_id(&self) -> Option<TabId> {
        match self {
            Self::Tab(id) => Some(*id),
            Self::Extension(_) => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tab(id) => write!(f, "tab:{}", id),
            Self::Extension(id) => write!(f, "extension:{}", id),
        }
    }
}

/// Routing key for inbound deliveries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    PortPostMessage(PortId),
    PortDisconnect(PortId),
    RuntimeOnConnect(String),
    RuntimeOnMessage(String),
    TabsOnCreated,
    TabsOnRemoved,
    TabsExecuteScriptResult(RequestId),
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortPostMessage(id) => write!(f, "CHROME_PORT_POSTMESSAGE_{}", id),
            Self::PortDisconnect(id) => write!(f, "CHROME_PORT_DISCONNECT_{}", id),
            Self::RuntimeOnConnect(ext) => write!(f, "CHROME_RUNTIME_ONCONNECT_{}", ext),
            Self::RuntimeOnMessage(ext) => write!(f, "CHROME_RUNTIME_ONMESSAGE_{}", ext),
            Self::TabsOnCreated => f.write_str("CHROME_TABS_ONCREATED"),
            Self::TabsOnRemoved => f.write_str("CHROME_TABS_ONREMOVED"),
            Self::TabsExecuteScriptResult(id) => {
                write!(f, "CHROME_TABS_EXECUTESCRIPT_RESULT_{}", id)
            }
        }
    }
}

/// Host reply to a channel request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelGrant {
    pub port_id: PortId,
    /// Where the peer end of the port lives
    pub scope: Scope,
}

/// Fire-and-forget requests to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostMessage {
    RuntimeSendMessage {
        target: String,
        message: Value,
    },
    TabsSendMessage {
        tab_id: TabId,
        extension_id: String,
        from_background: bool,
        message: Value,
    },
    TabsExecuteScript {
        request_id: RequestId,
        tab_id: TabId,
        extension_id: String,
        details: Value,
    },
}

/// Delivery callback
pub type Handler = Rc<dyn Fn(&Value)>;

/// Host transport as seen from one extension context
///
/// Deliveries arrive one at a time, in the order the transport received
/// them, on the context's own thread.
pub trait Transport {
    /// Ask the host to open a port to `target`. Blocks until the host replies.
    fn request_channel(
        &self,
        target: &str,
        info: &ConnectInfo,
    ) -> Result<ChannelGrant, TransportError>;

    /// Register a handler for every delivery of `tag`
    fn subscribe(&self, tag: Tag, handler: Handler);

    /// Register a handler for the next delivery of `tag` only
    fn subscribe_once(&self, tag: Tag, handler: Handler);

    /// Drop every handler registered for `tag`
    fn unsubscribe_all(&self, tag: &Tag);

    /// Best-effort send to every listener in `scope`
    fn broadcast_to_scope(&self, scope: &Scope, tag: Tag, payload: Value);

    /// Best-effort one-shot request to the host
    fn send(&self, message: HostMessage);
}

struct Subscription {
    handler: Handler,
    once: bool,
}

/// Tag-addressed handler table for transport implementations
#[derive(Default)]
pub struct Subscriptions {
    handlers: RefCell<HashMap<Tag, Vec<Subscription>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, tag: Tag, handler: Handler) {
        self.insert(tag, handler, false);
    }

    pub fn subscribe_once(&self, tag: Tag, handler: Handler) {
        self.insert(tag, handler, true);
    }

    pub fn unsubscribe_all(&self, tag: &Tag) {
        self.handlers.borrow_mut().remove(tag);
    }

    /// Whether anything is registered for `tag`
    pub fn has_subscribers(&self, tag: &Tag) -> bool {
        self.handlers.borrow().contains_key(tag)
    }

    /// Number of tags with at least one handler
    pub fn tag_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Run the handlers for `tag` in registration order.
    ///
    /// One-shot handlers are removed before any handler runs, so handlers
    /// may freely subscribe or unsubscribe. Returns the number invoked.
    pub fn dispatch(&self, tag: &Tag, payload: &Value) -> usize {
        let snapshot: Vec<Handler> = {
            let mut handlers = self.handlers.borrow_mut();
            let Some(entries) = handlers.get_mut(tag) else {
                return 0;
            };

            let snapshot = entries.iter().map(|s| Rc::clone(&s.handler)).collect();
            entries.retain(|s| !s.once);
            if entries.is_empty() {
                handlers.remove(tag);
            }
            snapshot
        };

        for handler in &snapshot {
            handler(payload);
        }

        snapshot.len()
    }

    fn insert(&self, tag: Tag, handler: Handler, once: bool) {
        self.handlers
            .borrow_mut()
            .entry(tag)
            .or_default()
            .push(Subscription { handler, once });
    }
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("tags", &self.tag_count())
            .finish()
    }
}
