//! Ports
//!
//! One end of a named, bidirectional channel between two extension contexts,
//! multiplexed over the shared transport by port id.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::error::ExtensionError;
use crate::event::Event;
use crate::runtime::ConnectInfo;
use crate::sender::MessageSender;
use crate::transport::{Scope, Tag, Transport};
use crate::{ContextKind, PortId, TabId};

/// Response callback handed to port message listeners
///
/// Responses over ports are not supported; calling it only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendResponse;

impl SendResponse {
    pub fn send(&self, _response: Value) {
        tracing::error!("sendResponse is not implemented");
    }
}

/// Arguments of a port `onMessage` emission
pub type PortMessage = (Value, MessageSender, SendResponse);

/// Channel endpoint
///
/// Cheap to clone; clones share the same state. The transport keeps the port
/// alive until it disconnects. The port only holds a weak reference back to
/// the transport, so dropping the transport tears down its ports too.
#[derive(Clone)]
pub struct Port {
    inner: Rc<PortInner>,
}

struct PortInner {
    port_id: PortId,
    scope: Scope,
    name: String,
    sender: MessageSender,
    disconnected: Cell<bool>,
    on_message: Event<PortMessage>,
    on_disconnect: Event<()>,
    transport: Weak<dyn Transport>,
}

impl Port {
    /// Open a port to `target`'s background page
    ///
    /// Background pages cannot open ports; that is reported without
    /// contacting the host.
    pub fn open(
        transport: Rc<dyn Transport>,
        context: ContextKind,
        extension_id: &str,
        target: &str,
        info: ConnectInfo,
    ) -> Result<Port, ExtensionError> {
        if !context.can_connect() {
            tracing::error!("chrome.runtime.connect is not supported in background page");
            return Err(ExtensionError::NotSupported("chrome.runtime.connect in background page"));
        }

        let grant = transport.request_channel(target, &info)?;
        tracing::debug!("Opened port {} ({:?}) to {}", grant.port_id, info.name, grant.scope);

        let sender = MessageSender::new(grant.scope.tab_id(), extension_id);
        Ok(Self::new(&transport, grant.port_id, grant.scope, sender, info.name))
    }

    /// Wrap a port the remote side opened
    ///
    /// `extension_id` is the opener's extension. Subscriptions are in place
    /// when this returns, so no later delivery for `port_id` is missed.
    pub fn accept(
        transport: Rc<dyn Transport>,
        port_id: PortId,
        tab_id: Option<TabId>,
        extension_id: &str,
        name: &str,
    ) -> Port {
        let scope = match tab_id {
            Some(id) => Scope::Tab(id),
            None => Scope::Extension(extension_id.to_string()),
        };
        tracing::debug!("Accepted port {} ({:?}) from {}", port_id, name, scope);

        let sender = MessageSender::new(tab_id, extension_id);
        Self::new(&transport, port_id, scope, sender, name.to_string())
    }

    fn new(
        transport: &Rc<dyn Transport>,
        port_id: PortId,
        scope: Scope,
        sender: MessageSender,
        name: String,
    ) -> Port {
        let port = Port {
            inner: Rc::new(PortInner {
                port_id,
                scope,
                name,
                sender,
                disconnected: Cell::new(false),
                on_message: Event::new(),
                on_disconnect: Event::new(),
                transport: Rc::downgrade(transport),
            }),
        };

        let p = port.clone();
        transport.subscribe_once(
            Tag::PortDisconnect(port_id),
            Rc::new(move |_: &Value| p.finish_disconnect(false)),
        );

        let p = port.clone();
        transport.subscribe(
            Tag::PortPostMessage(port_id),
            Rc::new(move |message: &Value| p.deliver(message)),
        );

        port
    }

    pub fn port_id(&self) -> PortId {
        self.inner.port_id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Identity of the remote end
    pub fn sender(&self) -> &MessageSender {
        &self.inner.sender
    }

    /// Where messages posted on this port are delivered
    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.disconnected.get()
    }

    /// Listeners receive `(message, sender, send_response)`
    pub fn on_message(&self) -> &Event<PortMessage> {
        &self.inner.on_message
    }

    pub fn on_disconnect(&self) -> &Event<()> {
        &self.inner.on_disconnect
    }

    /// Send `message` to the other end. Does nothing once disconnected.
    pub fn post_message(&self, message: Value) {
        if self.is_disconnected() {
            return;
        }
        let Some(transport) = self.inner.transport.upgrade() else {
            tracing::debug!("Port {}: transport is gone, message dropped", self.inner.port_id);
            return;
        };

        transport.broadcast_to_scope(
            &self.inner.scope,
            Tag::PortPostMessage(self.inner.port_id),
            message,
        );
    }

    /// Close the port and tell the other end. Later calls are no-ops.
    pub fn disconnect(&self) {
        self.finish_disconnect(true);
    }

    fn deliver(&self, message: &Value) {
        if self.is_disconnected() {
            return;
        }

        // A listener may disconnect the port; later listeners must not run
        let args = (message.clone(), self.inner.sender.clone(), SendResponse);
        self.inner.on_message.emit_while(&args, || !self.is_disconnected());
    }

    fn finish_disconnect(&self, notify_peer: bool) {
        if self.inner.disconnected.replace(true) {
            return;
        }

        let inner = &self.inner;
        let side = if notify_peer { "local" } else { "remote" };
        tracing::debug!("Port {} disconnected ({})", inner.port_id, side);

        if let Some(transport) = inner.transport.upgrade() {
            if notify_peer {
                transport.broadcast_to_scope(
                    &inner.scope,
                    Tag::PortDisconnect(inner.port_id),
                    Value::Null,
                );
            }

            transport.unsubscribe_all(&Tag::PortPostMessage(inner.port_id));
            transport.unsubscribe_all(&Tag::PortDisconnect(inner.port_id));
        }

        inner.on_disconnect.emit(&());

        // Listeners may hold port handles; drop them so the port can be freed
        inner.on_message.clear();
        inner.on_disconnect.clear();
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("port_id", &self.inner.port_id)
            .field("name", &self.inner.name)
            .field("scope", &self.inner.scope)
            .field("disconnected", &self.inner.disconnected.get())
            .finish()
    }
}
