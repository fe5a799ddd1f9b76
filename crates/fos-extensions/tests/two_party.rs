//! Two contexts wired back to back through an in-memory transport

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use fos_extensions::{
    ChannelGrant, ConnectInfo, ContextKind, ExtensionApi, Handler, HostMessage, MessageSender, Port,
    Scope, Subscriptions, Tag, Transport, TransportError,
};
use serde_json::{json, Value};

/// Queued deliveries shared by both ends; nothing runs until `flush`
#[derive(Default)]
struct Wire {
    ends: RefCell<Vec<Weak<End>>>,
    queue: RefCell<VecDeque<(usize, Tag, Value)>>,
    next_port: Cell<u64>,
}

impl Wire {
    fn end(self: &Rc<Self>, scope: Scope) -> Rc<End> {
        let index = self.ends.borrow().len();
        let end = Rc::new(End {
            index,
            scope,
            wire: Rc::downgrade(self),
            subscriptions: Subscriptions::new(),
        });
        self.ends.borrow_mut().push(Rc::downgrade(&end));
        end
    }

    fn push(&self, from: usize, scope: &Scope, tag: Tag, payload: Value) {
        for (index, end) in self.ends.borrow().iter().enumerate() {
            let Some(end) = end.upgrade() else { continue };
            if index != from && &end.scope == scope {
                self.queue.borrow_mut().push_back((index, tag.clone(), payload.clone()));
            }
        }
    }

    fn flush(&self) -> usize {
        let mut count = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some((index, tag, payload)) = next else { break };
            let end = self.ends.borrow()[index].upgrade();
            if let Some(end) = end {
                end.subscriptions.dispatch(&tag, &payload);
            }
            count += 1;
        }
        count
    }
}

struct End {
    index: usize,
    scope: Scope,
    wire: Weak<Wire>,
    subscriptions: Subscriptions,
}

impl Transport for End {
    fn request_channel(
        &self,
        target: &str,
        info: &ConnectInfo,
    ) -> Result<ChannelGrant, TransportError> {
        let wire = self.wire.upgrade().ok_or(TransportError::Closed)?;
        let port_id = wire.next_port.get() + 1;
        wire.next_port.set(port_id);

        let scope = Scope::Extension(target.to_string());
        let event = json!({
            "tab_id": self.scope.tab_id(),
            "extension_id": "ext-a",
            "port_id": port_id,
            "connect_info": info,
        });
        wire.push(self.index, &scope, Tag::RuntimeOnConnect(target.to_string()), event);

        Ok(ChannelGrant { port_id, scope })
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
        if let Some(wire) = self.wire.upgrade() {
            wire.push(self.index, scope, tag, payload);
        }
    }

    fn send(&self, _message: HostMessage) {}
}

fn open_content_port(content: &Rc<End>, info: ConnectInfo) -> Port {
    Port::open(content.clone(), ContextKind::ContentScript, "ext-a", "ext-a", info).unwrap()
}

fn pair() -> (Rc<Wire>, Rc<End>, Rc<End>) {
    let wire = Rc::new(Wire::default());
    let content = wire.end(Scope::Tab(7));
    let background = wire.end(Scope::Extension("ext-a".into()));
    (wire, content, background)
}

// ============================================================================
// PORT TESTS
// ============================================================================

#[test]
fn test_open_and_accept_share_a_channel() {
    let (wire, content, background) = pair();
    let bg_api = ExtensionApi::inject("ext-a", ContextKind::BackgroundPage, background.clone());
    let accepted = Rc::new(RefCell::new(Vec::new()));
    let a = accepted.clone();
    bg_api.runtime.on_connect().subscribe(move |port| a.borrow_mut().push(port.clone()));

    let port = open_content_port(&content, ConnectInfo::named("x"));
    wire.flush();

    let remote = accepted.borrow()[0].clone();
    assert_eq!(remote.port_id(), port.port_id());
    assert_eq!(remote.sender(), &MessageSender::new(Some(7), "ext-a"));

    let inbox = Rc::new(RefCell::new(Vec::new()));
    let i = inbox.clone();
    port.on_message().subscribe(move |(message, _, _)| i.borrow_mut().push(message.clone()));

    remote.post_message(json!("hi"));
    remote.post_message(json!("there"));
    wire.flush();

    assert_eq!(*inbox.borrow(), vec![json!("hi"), json!("there")]);
}

#[test]
fn test_remote_disconnect_fires_once_and_unsubscribes() {
    let (wire, content, background) = pair();
    let port = open_content_port(&content, ConnectInfo::default());
    let remote = Port::accept(background.clone(), port.port_id(), Some(7), "ext-a", "");
    wire.flush();

    let fired = Rc::new(Cell::new(0));
    let f = fired.clone();
    port.on_disconnect().subscribe(move |_| f.set(f.get() + 1));

    remote.disconnect();
    remote.disconnect();
    wire.flush();

    assert_eq!(fired.get(), 1);
    assert!(port.is_disconnected());
    assert!(!content.subscriptions.has_subscribers(&Tag::PortPostMessage(port.port_id())));
    assert!(!background.subscriptions.has_subscribers(&Tag::PortPostMessage(port.port_id())));
}

#[test]
fn test_messages_after_disconnect_are_dropped() {
    let (wire, content, background) = pair();
    let port = open_content_port(&content, ConnectInfo::default());
    let remote = Port::accept(background.clone(), port.port_id(), Some(7), "ext-a", "");
    wire.flush();

    let received = Rc::new(Cell::new(0));
    let r = received.clone();
    remote.on_message().subscribe(move |_| r.set(r.get() + 1));

    port.disconnect();
    port.post_message(json!("late"));
    wire.flush();

    assert_eq!(received.get(), 0);
    assert!(remote.is_disconnected());
}

#[test]
fn test_port_is_freed_once_both_sides_disconnect() {
    let (wire, content, background) = pair();
    let port = open_content_port(&content, ConnectInfo::default());
    let remote = Port::accept(background.clone(), port.port_id(), Some(7), "ext-a", "");
    wire.flush();

    port.disconnect();
    wire.flush();

    assert_eq!(content.subscriptions.tag_count(), 0);
    assert_eq!(background.subscriptions.tag_count(), 0);
    drop(remote);
}
