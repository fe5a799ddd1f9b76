//! Extension host
//!
//! Owns the registry of attached contexts and routes every renderer request.
//! Runs on its own thread; renderers talk to it over channels.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use fos_extensions::{
    ChannelGrant, ConnectEvent, ConnectInfo, ContextKind, HostMessage, IdGenerator, MessageEvent,
    PortId, Scope, TabId, Tag, TransportError,
};
use serde_json::Value;
use smol::channel::{self, Receiver, Sender};

use crate::config::IpcConfig;
use crate::protocol::{ContextId, Delivery, HostRequest};
use crate::renderer::IpcRenderer;

/// Evaluates `tabs.executeScript` details for `(tab_id, extension_id)`
pub type ScriptRunner = Box<dyn Fn(TabId, &str, &Value) -> Value + Send>;

struct ContextEntry {
    kind: ContextKind,
    scope: Scope,
    extension_id: String,
    inbox: Sender<Delivery>,
}

/// The two contexts joined by an open port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortLink {
    opener: ContextId,
    acceptor: ContextId,
}

impl PortLink {
    fn peer_of(&self, id: ContextId) -> Option<ContextId> {
        if self.opener == id {
            Some(self.acceptor)
        } else if self.acceptor == id {
            Some(self.opener)
        } else {
            None
        }
    }
}

/// Host-side router
pub struct HostProcess {
    requests: Receiver<HostRequest>,
    contexts: BTreeMap<ContextId, ContextEntry>,
    ports: BTreeMap<PortId, PortLink>,
    port_ids: IdGenerator,
    script_runner: Option<ScriptRunner>,
}

/// Cloneable handle for attaching renderers and stopping the host
#[derive(Debug, Clone)]
pub struct HostHandle {
    requests: Sender<HostRequest>,
    context_ids: Arc<IdGenerator>,
    config: IpcConfig,
}

impl HostProcess {
    pub fn new(config: IpcConfig) -> (Self, HostHandle) {
        let (tx, rx) = channel::unbounded();

        let host = Self {
            requests: rx,
            contexts: BTreeMap::new(),
            ports: BTreeMap::new(),
            port_ids: IdGenerator::new(),
            script_runner: None,
        };
        let handle = HostHandle {
            requests: tx,
            context_ids: Arc::new(IdGenerator::new()),
            config,
        };

        (host, handle)
    }

    /// Install the evaluator behind `tabs.executeScript`. Without one every
    /// script yields `null`.
    pub fn with_script_runner(
        mut self,
        runner: impl Fn(TabId, &str, &Value) -> Value + Send + 'static,
    ) -> Self {
        self.script_runner = Some(Box::new(runner));
        self
    }

    /// Run on a dedicated thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("fos-ext-host".to_string())
            .spawn(move || smol::block_on(self.run()))
    }

    /// Serve requests until shutdown or until every handle and renderer is gone
    pub async fn run(mut self) {
        tracing::info!("Extension host started");

        while let Ok(request) = self.requests.recv().await {
            if !self.handle(request) {
                break;
            }
        }

        tracing::info!("Extension host stopped");
    }

    fn handle(&mut self, request: HostRequest) -> bool {
        match request {
            HostRequest::Attach { id, kind, scope, extension_id, inbox } => {
                self.attach(id, ContextEntry { kind, scope, extension_id, inbox });
            }
            HostRequest::Detach { id } => self.detach(id),
            HostRequest::Connect { from, target, info, reply } => {
                if reply.is_closed() {
                    tracing::debug!(
                        "Connect from context {} to {} abandoned by requester",
                        from,
                        target
                    );
                    return true;
                }

                let result = self.connect(from, &target, info);
                if let Err(e) = reply.try_send(result) {
                    // The requester gave up after the background page was told
                    if let Ok(grant) = e.into_inner() {
                        self.abandon_port(grant.port_id);
                    }
                }
            }
            HostRequest::SendToAll { from, scope, tag, payload } => {
                if let Tag::PortDisconnect(port_id) = tag {
                    self.ports.remove(&port_id);
                }

                let targets: Vec<ContextId> = self
                    .contexts
                    .iter()
                    .filter(|(id, entry)| **id != from && entry.scope == scope)
                    .map(|(id, _)| *id)
                    .collect();

                if targets.is_empty() {
                    tracing::debug!("{} to {}: no listeners", tag, scope);
                }
                for id in targets {
                    self.deliver(id, tag.clone(), payload.clone());
                }
            }
            HostRequest::Message { from, message } => self.route_message(from, message),
            HostRequest::Shutdown => return false,
        }

        true
    }

    fn attach(&mut self, id: ContextId, entry: ContextEntry) {
        tracing::debug!(
            "Attached context {} ({:?}, {}) for {}",
            id,
            entry.kind,
            entry.scope,
            entry.extension_id
        );

        let new_tab = entry.scope.tab_id().filter(|tab_id| !self.tab_is_open(*tab_id));
        self.contexts.insert(id, entry);

        if let Some(tab_id) = new_tab {
            self.announce(Tag::TabsOnCreated, Value::from(tab_id));
        }
    }

    fn detach(&mut self, id: ContextId) {
        let Some(entry) = self.contexts.remove(&id) else {
            return;
        };
        tracing::debug!("Detached context {} ({})", id, entry.scope);

        let orphaned: Vec<(PortId, ContextId)> = self
            .ports
            .iter()
            .filter_map(|(port_id, link)| link.peer_of(id).map(|peer| (*port_id, peer)))
            .collect();
        for (port_id, peer) in orphaned {
            self.ports.remove(&port_id);
            tracing::debug!("Port {} closed with context {}", port_id, id);
            self.deliver(peer, Tag::PortDisconnect(port_id), Value::Null);
        }

        if let Some(tab_id) = entry.scope.tab_id() {
            if !self.tab_is_open(tab_id) {
                self.announce(Tag::TabsOnRemoved, Value::from(tab_id));
            }
        }
    }

    fn connect(
        &mut self,
        from: ContextId,
        target: &str,
        info: ConnectInfo,
    ) -> Result<ChannelGrant, TransportError> {
        let Some(background) = self.background_of(target) else {
            tracing::warn!("Connect to {} refused: no background page", target);
            return Err(TransportError::Rejected(format!(
                "extension {} has no background page",
                target
            )));
        };

        let port_id = self.port_ids.next_id();
        let event = ConnectEvent {
            tab_id: self.tab_of(from),
            extension_id: self.extension_of(from),
            port_id,
            connect_info: info,
        };
        let payload =
            serde_json::to_value(&event).map_err(|e| TransportError::Rejected(e.to_string()))?;

        tracing::debug!("Port {} allocated from context {} to {}", port_id, from, target);
        self.ports.insert(port_id, PortLink { opener: from, acceptor: background });
        self.deliver(background, Tag::RuntimeOnConnect(target.to_string()), payload);

        Ok(ChannelGrant {
            port_id,
            scope: Scope::Extension(target.to_string()),
        })
    }

    /// Close the accepting side of a port whose opener never got the grant
    fn abandon_port(&mut self, port_id: PortId) {
        let Some(link) = self.ports.remove(&port_id) else {
            return;
        };

        tracing::warn!("Port {} abandoned by context {}, closing it", port_id, link.opener);
        self.deliver(link.acceptor, Tag::PortDisconnect(port_id), Value::Null);
    }

    fn route_message(&mut self, from: ContextId, message: HostMessage) {
        match message {
            HostMessage::RuntimeSendMessage { target, message } => {
                let Some(background) = self.background_of(&target) else {
                    tracing::warn!("Message to {} dropped: no background page", target);
                    return;
                };

                let event = MessageEvent {
                    tab_id: self.tab_of(from),
                    extension_id: self.extension_of(from),
                    message,
                };
                self.deliver_event(background, Tag::RuntimeOnMessage(target), &event);
            }
            HostMessage::TabsSendMessage { tab_id, extension_id, from_background, message } => {
                let event = MessageEvent {
                    tab_id: if from_background { None } else { self.tab_of(from) },
                    extension_id: extension_id.clone(),
                    message,
                };

                let targets: Vec<ContextId> = self
                    .contexts
                    .iter()
                    .filter(|(_, entry)| {
                        entry.scope == Scope::Tab(tab_id) && entry.extension_id == extension_id
                    })
                    .map(|(id, _)| *id)
                    .collect();

                for id in targets {
                    self.deliver_event(id, Tag::RuntimeOnMessage(extension_id.clone()), &event);
                }
            }
            HostMessage::TabsExecuteScript { request_id, tab_id, extension_id, details } => {
                let result = match &self.script_runner {
                    Some(runner) => runner(tab_id, &extension_id, &details),
                    None => {
                        tracing::debug!("No script runner installed, executeScript yields null");
                        Value::Null
                    }
                };
                self.deliver(from, Tag::TabsExecuteScriptResult(request_id), result);
            }
        }
    }

    fn deliver_event(&self, id: ContextId, tag: Tag, event: &MessageEvent) {
        match serde_json::to_value(event) {
            Ok(payload) => self.deliver(id, tag, payload),
            Err(e) => tracing::warn!("Could not encode {}: {}", tag, e),
        }
    }

    fn deliver(&self, id: ContextId, tag: Tag, payload: Value) {
        let Some(entry) = self.contexts.get(&id) else {
            return;
        };

        if entry.inbox.try_send(Delivery { tag, payload }).is_err() {
            tracing::debug!("Context {} inbox closed", id);
        }
    }

    /// Send to every background page
    fn announce(&self, tag: Tag, payload: Value) {
        for (id, entry) in &self.contexts {
            if entry.kind == ContextKind::BackgroundPage {
                self.deliver(*id, tag.clone(), payload.clone());
            }
        }
    }

    fn background_of(&self, extension_id: &str) -> Option<ContextId> {
        self.contexts
            .iter()
            .find(|(_, entry)| {
                entry.kind == ContextKind::BackgroundPage && entry.extension_id == extension_id
            })
            .map(|(id, _)| *id)
    }

    fn tab_of(&self, id: ContextId) -> Option<TabId> {
        self.contexts.get(&id).and_then(|entry| entry.scope.tab_id())
    }

    fn extension_of(&self, id: ContextId) -> String {
        self.contexts
            .get(&id)
            .map(|entry| entry.extension_id.clone())
            .unwrap_or_default()
    }

    fn tab_is_open(&self, tab_id: TabId) -> bool {
        self.contexts.values().any(|entry| entry.scope == Scope::Tab(tab_id))
    }
}

impl HostHandle {
    /// Register a new context with the host
    ///
    /// The returned renderer is bound to the calling thread.
    pub fn attach(
        &self,
        kind: ContextKind,
        scope: Scope,
        extension_id: &str,
    ) -> Result<IpcRenderer, TransportError> {
        let id = self.context_ids.next_id();
        let (inbox_tx, inbox_rx) = channel::unbounded();

        self.requests
            .try_send(HostRequest::Attach {
                id,
                kind,
                scope: scope.clone(),
                extension_id: extension_id.to_string(),
                inbox: inbox_tx,
            })
            .map_err(|_| TransportError::Closed)?;

        Ok(IpcRenderer::new(
            id,
            kind,
            scope,
            extension_id,
            self.requests.clone(),
            inbox_rx,
            self.config.clone(),
        ))
    }

    /// Attach an extension's background page
    pub fn attach_background(&self, extension_id: &str) -> Result<IpcRenderer, TransportError> {
        self.attach(
            ContextKind::BackgroundPage,
            Scope::Extension(extension_id.to_string()),
            extension_id,
        )
    }

    /// Attach a content script of `extension_id` running in `tab_id`
    pub fn attach_content_script(
        &self,
        extension_id: &str,
        tab_id: TabId,
    ) -> Result<IpcRenderer, TransportError> {
        self.attach(ContextKind::ContentScript, Scope::Tab(tab_id), extension_id)
    }

    /// Ask the host loop to exit
    pub fn shutdown(&self) {
        let _ = self.requests.try_send(HostRequest::Shutdown);
    }

    pub fn config(&self) -> &IpcConfig {
        &self.config
    }
}
