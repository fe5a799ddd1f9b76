//! `chrome.runtime`
//!
//! Port creation in both directions and one-shot runtime messages.

use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::ExtensionError;
use crate::event::Event;
use crate::port::Port;
use crate::sender::{MessageSender, EXTENSION_SCHEME};
use crate::transport::{HostMessage, Tag, Transport};
use crate::{ContextKind, PortId, TabId};

/// Connect info carried to the receiving side of a port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    #[serde(default)]
    pub name: String,
}

impl ConnectInfo {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Options for `runtime.connect`
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Target extension; defaults to the calling extension
    pub extension_id: Option<String>,
    pub connect_info: ConnectInfo,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_extension(mut self, extension_id: &str) -> Self {
        self.extension_id = Some(extension_id.to_string());
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.connect_info = ConnectInfo::named(name);
        self
    }
}

/// Options for `runtime.sendMessage`
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    /// Target extension; defaults to the calling extension
    pub extension_id: Option<String>,
}

impl MessageOptions {
    pub fn to_extension(extension_id: &str) -> Self {
        Self {
            extension_id: Some(extension_id.to_string()),
        }
    }
}

/// Payload of an inbound connect delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectEvent {
    /// Tab of the opening context, absent for non-tab contexts
    pub tab_id: Option<TabId>,
    /// Extension of the opening context
    pub extension_id: String,
    pub port_id: PortId,
    pub connect_info: ConnectInfo,
}

/// Payload of an inbound one-shot message delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub tab_id: Option<TabId>,
    /// Extension of the sending context
    pub extension_id: String,
    pub message: Value,
}

/// Arguments of a runtime `onMessage` emission
pub type RuntimeMessage = (Value, MessageSender);

/// The `runtime` namespace of one extension context
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

struct RuntimeInner {
    extension_id: String,
    context: ContextKind,
    transport: Rc<dyn Transport>,
    on_connect: Event<Port>,
    on_message: Event<RuntimeMessage>,
}

impl Runtime {
    /// Create the namespace and start listening for inbound connects and messages
    pub fn install(
        extension_id: &str,
        context: ContextKind,
        transport: Rc<dyn Transport>,
    ) -> Runtime {
        let runtime = Runtime {
            inner: Rc::new(RuntimeInner {
                extension_id: extension_id.to_string(),
                context,
                transport,
                on_connect: Event::new(),
                on_message: Event::new(),
            }),
        };

        let weak = Rc::downgrade(&runtime.inner);
        runtime.inner.transport.subscribe(
            Tag::RuntimeOnConnect(extension_id.to_string()),
            Rc::new(move |payload: &Value| {
                if let Some(runtime) = upgrade(&weak) {
                    if let Err(err) = runtime.handle_connect(payload) {
                        tracing::warn!("Dropping inbound connect for {}: {}", runtime.id(), err);
                    }
                }
            }),
        );

        let weak = Rc::downgrade(&runtime.inner);
        runtime.inner.transport.subscribe(
            Tag::RuntimeOnMessage(extension_id.to_string()),
            Rc::new(move |payload: &Value| {
                if let Some(runtime) = upgrade(&weak) {
                    if let Err(err) = runtime.handle_message(payload) {
                        tracing::warn!("Dropping inbound message for {}: {}", runtime.id(), err);
                    }
                }
            }),
        );

        runtime
    }

    /// Extension id
    pub fn id(&self) -> &str {
        &self.inner.extension_id
    }

    pub fn context(&self) -> ContextKind {
        self.inner.context
    }

    /// Absolute URL of a resource inside the extension
    pub fn get_url(&self, path: &str) -> Result<Url, ExtensionError> {
        let mut url = Url::parse(&format!("{}://{}/", EXTENSION_SCHEME, self.inner.extension_id))?;

        if path.starts_with('/') {
            url.set_path(path);
        } else {
            url.set_path(&format!("/{}", path));
        }

        Ok(url)
    }

    /// Open a port to an extension's background page
    pub fn connect(&self, options: ConnectOptions) -> Result<Port, ExtensionError> {
        let target = options
            .extension_id
            .as_deref()
            .unwrap_or(&self.inner.extension_id);

        Port::open(
            Rc::clone(&self.inner.transport),
            self.inner.context,
            &self.inner.extension_id,
            target,
            options.connect_info,
        )
    }

    /// Send a one-shot message to an extension's background page
    pub fn send_message(
        &self,
        message: Value,
        options: MessageOptions,
    ) -> Result<(), ExtensionError> {
        if !self.inner.context.can_connect() {
            tracing::error!("chrome.runtime.sendMessage is not supported in background page");
            return Err(ExtensionError::NotSupported(
                "chrome.runtime.sendMessage in background page",
            ));
        }

        let target = options
            .extension_id
            .unwrap_or_else(|| self.inner.extension_id.clone());
        self.inner
            .transport
            .send(HostMessage::RuntimeSendMessage { target, message });

        Ok(())
    }

    /// Fired with each port another context opens to this extension
    pub fn on_connect(&self) -> &Event<Port> {
        &self.inner.on_connect
    }

    /// Listeners receive `(message, sender)`
    pub fn on_message(&self) -> &Event<RuntimeMessage> {
        &self.inner.on_message
    }

    fn handle_connect(&self, payload: &Value) -> Result<(), ExtensionError> {
        let event: ConnectEvent = serde_json::from_value(payload.clone())?;

        let port = Port::accept(
            Rc::clone(&self.inner.transport),
            event.port_id,
            event.tab_id,
            &event.extension_id,
            &event.connect_info.name,
        );
        self.inner.on_connect.emit(&port);

        Ok(())
    }

    fn handle_message(&self, payload: &Value) -> Result<(), ExtensionError> {
        let event: MessageEvent = serde_json::from_value(payload.clone())?;

        let sender = MessageSender::new(event.tab_id, &event.extension_id);
        self.inner.on_message.emit(&(event.message, sender));

        Ok(())
    }
}

fn upgrade(weak: &Weak<RuntimeInner>) -> Option<Runtime> {
    weak.upgrade().map(|inner| Runtime { inner })
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.inner.extension_id)
            .field("context", &self.inner.context)
            .finish()
    }
}
