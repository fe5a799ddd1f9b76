//! Renderer side of the IPC link

use std::rc::Rc;
use std::time::{Duration, Instant};

use fos_extensions::{
    ChannelGrant, ConnectInfo, ContextKind, ExtensionApi, Handler, HostMessage, Scope,
    Subscriptions, Tag, Transport, TransportError,
};
use serde_json::Value;
use smol::channel::{self, Receiver, Sender};
use smol::future::FutureExt;

use crate::config::IpcConfig;
use crate::protocol::{ContextId, Delivery, HostRequest};

/// One extension context attached to the host
///
/// Deliveries queue in an inbox until the owner pumps them, so listeners
/// always run on the renderer's thread, one delivery at a time.
#[derive(Debug)]
pub struct IpcRenderer {
    id: ContextId,
    kind: ContextKind,
    scope: Scope,
    extension_id: String,
    requests: Sender<HostRequest>,
    inbox: Receiver<Delivery>,
    subscriptions: Subscriptions,
    config: IpcConfig,
}

impl IpcRenderer {
    pub(crate) fn new(
        id: ContextId,
        kind: ContextKind,
        scope: Scope,
        extension_id: &str,
        requests: Sender<HostRequest>,
        inbox: Receiver<Delivery>,
        config: IpcConfig,
    ) -> Self {
        Self {
            id,
            kind,
            scope,
            extension_id: extension_id.to_string(),
            requests,
            inbox,
            subscriptions: Subscriptions::new(),
            config,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Inject the extension API for this context
    pub fn inject_api(self: &Rc<Self>) -> ExtensionApi {
        ExtensionApi::inject(&self.extension_id, self.kind, Rc::clone(self) as Rc<dyn Transport>)
    }

    /// Dispatch everything already queued. Returns the number of deliveries.
    pub fn pump(&self) -> usize {
        let mut count = 0;
        while let Ok(delivery) = self.inbox.try_recv() {
            self.dispatch(delivery);
            count += 1;
        }
        count
    }

    /// Wait up to `timeout` for a delivery, then dispatch everything queued
    pub fn pump_timeout(&self, timeout: Duration) -> usize {
        let first = smol::block_on(async {
            let recv = async { self.inbox.recv().await.ok() };
            let timer = async {
                smol::Timer::after(timeout).await;
                None
            };
            recv.or(timer).await
        });

        match first {
            Some(delivery) => {
                self.dispatch(delivery);
                1 + self.pump()
            }
            None => 0,
        }
    }

    /// [`pump_timeout`](Self::pump_timeout) with the configured wait
    pub fn pump_wait(&self) -> usize {
        self.pump_timeout(self.config.pump_timeout)
    }

    /// Pump until `done` holds or `timeout` elapses. Returns the final `done()`.
    pub fn pump_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            if done() {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return done();
            }
            self.pump_timeout(remaining);
        }
    }

    fn dispatch(&self, delivery: Delivery) {
        let handled = self.subscriptions.dispatch(&delivery.tag, &delivery.payload);
        if handled == 0 {
            tracing::trace!("Context {}: no listener for {}", self.id, delivery.tag);
        }
    }

    fn request(&self, request: HostRequest) -> Result<(), TransportError> {
        self.requests.try_send(request).map_err(|_| TransportError::Closed)
    }
}

impl Transport for IpcRenderer {
    fn request_channel(
        &self,
        target: &str,
        info: &ConnectInfo,
    ) -> Result<ChannelGrant, TransportError> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.request(HostRequest::Connect {
            from: self.id,
            target: target.to_string(),
            info: info.clone(),
            reply: reply_tx,
        })?;

        let timeout = self.config.request_timeout;
        let result = smol::block_on(async {
            let reply = async { reply_rx.recv().await.unwrap_or(Err(TransportError::Closed)) };
            let timer = async {
                smol::Timer::after(timeout).await;
                Err(TransportError::Timeout(timeout))
            };
            reply.or(timer).await
        });

        if matches!(result, Err(TransportError::Timeout(_))) {
            // Closing makes a later host reply fail, so the host tears the
            // channel down. A reply that raced in is still honored.
            reply_rx.close();
            if let Ok(late) = reply_rx.try_recv() {
                return late;
            }
        }

        result
    }

    fn subscribe(&self, tag: Tag, handler: Handler) {
        self.subscriptions.subscribe(tag, handler);
    }

    fn subscribe_once(&self, tag: Tag, handler: Handler) {
        self.subscriptions.subscribe_once(tag, handler);
    }

    fn unsubscribe_all(&self, tag: &Tag) {
        self.subscriptions.unsubscribe_all(tag);
    }

    fn broadcast_to_scope(&self, scope: &Scope, tag: Tag, payload: Value) {
        let request = HostRequest::SendToAll {
            from: self.id,
            scope: scope.clone(),
            tag,
            payload,
        };
        if let Err(e) = self.request(request) {
            tracing::warn!("Context {}: broadcast to {} dropped: {}", self.id, scope, e);
        }
    }

    fn send(&self, message: HostMessage) {
        if let Err(e) = self.request(HostRequest::Message { from: self.id, message }) {
            tracing::warn!("Context {}: host message dropped: {}", self.id, e);
        }
    }
}

impl Drop for IpcRenderer {
    fn drop(&mut self) {
        let _ = self.requests.try_send(HostRequest::Detach { id: self.id });
    }
}
