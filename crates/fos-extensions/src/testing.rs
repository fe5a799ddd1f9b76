//! Recording transport for unit tests

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::error::TransportError;
use crate::runtime::ConnectInfo;
use crate::transport::{ChannelGrant, Handler, HostMessage, Scope, Subscriptions, Tag, Transport};

/// A call made on the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    RequestChannel { target: String, name: String },
    Broadcast { scope: Scope, tag: Tag, payload: Value },
    Send(HostMessage),
}

/// Spy transport: records outbound calls, lets tests inject deliveries
pub struct MockTransport {
    pub calls: RefCell<Vec<Call>>,
    pub subscriptions: Subscriptions,
    grant: RefCell<Result<ChannelGrant, TransportError>>,
}

impl MockTransport {
    pub fn new() -> Rc<Self> {
        Self::granting(Ok(ChannelGrant {
            port_id: 1,
            scope: Scope::Extension("ext-a".into()),
        }))
    }

    pub fn granting(grant: Result<ChannelGrant, TransportError>) -> Rc<Self> {
        Rc::new(Self {
            calls: RefCell::new(Vec::new()),
            subscriptions: Subscriptions::new(),
            grant: RefCell::new(grant),
        })
    }

    /// Simulate an inbound delivery
    pub fn deliver(&self, tag: Tag, payload: Value) -> usize {
        self.subscriptions.dispatch(&tag, &payload)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn broadcasts(&self) -> Vec<(Scope, Tag, Value)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Broadcast { scope, tag, payload } => {
                    Some((scope.clone(), tag.clone(), payload.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

impl Transport for MockTransport {
    fn request_channel(
        &self,
        target: &str,
        info: &ConnectInfo,
    ) -> Result<ChannelGrant, TransportError> {
        self.calls.borrow_mut().push(Call::RequestChannel {
            target: target.to_string(),
            name: info.name.clone(),
        });
        self.grant.borrow().clone()
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
        self.calls.borrow_mut().push(Call::Broadcast {
            scope: scope.clone(),
            tag,
            payload,
        });
    }

    fn send(&self, message: HostMessage) {
        self.calls.borrow_mut().push(Call::Send(message));
    }
}
