//! fOS Extension Messaging
//!
//! The `runtime`, `extension` and `tabs` messaging surface of the extension
//! API, relayed to a privileged host over a tag-addressed [`Transport`].
//!
//! Features:
//! - Ports: named, disconnect-aware bidirectional channels
//! - One-shot messages (`runtime.sendMessage`, `tabs.sendMessage`)
//! - `tabs.executeScript` correlated by request id
//! - Tab created/removed notifications

mod api;
mod error;
mod event;
mod ids;
mod port;
mod runtime;
mod sender;
mod tabs;
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::ExtensionApi;
pub use error::{ExtensionError, TransportError};
pub use event::{Event, ListenerId};
pub use ids::IdGenerator;
pub use port::{Port, PortMessage, SendResponse};
pub use runtime::{
    ConnectEvent, ConnectInfo, ConnectOptions, MessageEvent, MessageOptions, Runtime,
    RuntimeMessage,
};
pub use sender::{MessageSender, Tab, EXTENSION_SCHEME};
pub use tabs::Tabs;
pub use transport::{ChannelGrant, Handler, HostMessage, Scope, Subscriptions, Tag, Transport};

/// Tab identifier assigned by the host
pub type TabId = u32;

/// Port identifier, unique within the host that allocated it
pub type PortId = u64;

/// Correlation id for one-shot host requests
pub type RequestId = u64;

/// Kind of extension context the API is injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ContextKind {
    /// The extension's background page. Cannot open ports or send runtime messages.
    BackgroundPage,
    /// A content script running inside a tab
    ContentScript,
}

impl ContextKind {
    /// Whether `runtime.connect` and `runtime.sendMessage` are available
    pub fn can_connect(self) -> bool {
        matches!(self, Self::ContentScript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_page_cannot_connect() {
        assert!(!ContextKind::BackgroundPage.can_connect());
        assert!(ContextKind::ContentScript.can_connect());
    }
}
