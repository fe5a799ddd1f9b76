//! `chrome.tabs`

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::event::Event;
use crate::ids::IdGenerator;
use crate::sender::Tab;
use crate::transport::{HostMessage, Tag, Transport};
use crate::{ContextKind, TabId};

/// The `tabs` namespace of one extension context
#[derive(Clone)]
pub struct Tabs {
    inner: Rc<TabsInner>,
}

struct TabsInner {
    extension_id: String,
    context: ContextKind,
    transport: Rc<dyn Transport>,
    request_ids: Rc<IdGenerator>,
    on_created: Event<Tab>,
    on_removed: Event<TabId>,
}

impl Tabs {
    pub fn install(
        extension_id: &str,
        context: ContextKind,
        transport: Rc<dyn Transport>,
        request_ids: Rc<IdGenerator>,
    ) -> Tabs {
        let tabs = Tabs {
            inner: Rc::new(TabsInner {
                extension_id: extension_id.to_string(),
                context,
                transport,
                request_ids,
                on_created: Event::new(),
                on_removed: Event::new(),
            }),
        };

        let weak = Rc::downgrade(&tabs.inner);
        tabs.inner.transport.subscribe(
            Tag::TabsOnCreated,
            Rc::new(move |payload: &Value| {
                let Some(inner) = weak.upgrade() else { return };
                match parse_tab_id(payload) {
                    Some(tab_id) => inner.on_created.emit(&Tab::new(tab_id)),
                    None => {
                        tracing::warn!(
                            "Ignoring {} with bad tab id: {}",
                            Tag::TabsOnCreated,
                            payload
                        );
                    }
                }
            }),
        );

        let weak = Rc::downgrade(&tabs.inner);
        tabs.inner.transport.subscribe(
            Tag::TabsOnRemoved,
            Rc::new(move |payload: &Value| {
                let Some(inner) = weak.upgrade() else { return };
                match parse_tab_id(payload) {
                    Some(tab_id) => inner.on_removed.emit(&tab_id),
                    None => {
                        tracing::warn!(
                            "Ignoring {} with bad tab id: {}",
                            Tag::TabsOnRemoved,
                            payload
                        );
                    }
                }
            }),
        );

        tabs
    }

    /// Run a script in `tab_id`; `callback` receives the results
    pub fn execute_script(
        &self,
        tab_id: TabId,
        details: Value,
        callback: impl FnOnce(Vec<Value>) + 'static,
    ) {
        let request_id = self.inner.request_ids.next_id();

        let callback = RefCell::new(Some(callback));
        self.inner.transport.subscribe_once(
            Tag::TabsExecuteScriptResult(request_id),
            Rc::new(move |result: &Value| {
                if let Some(callback) = callback.borrow_mut().take() {
                    callback(vec![result.clone()]);
                }
            }),
        );

        self.inner.transport.send(HostMessage::TabsExecuteScript {
            request_id,
            tab_id,
            extension_id: self.inner.extension_id.clone(),
            details,
        });
    }

    /// Send a one-shot message to every context of this extension in `tab_id`
    pub fn send_message(&self, tab_id: TabId, message: Value) {
        self.inner.transport.send(HostMessage::TabsSendMessage {
            tab_id,
            extension_id: self.inner.extension_id.clone(),
            from_background: self.inner.context == ContextKind::BackgroundPage,
            message,
        });
    }

    pub fn on_created(&self) -> &Event<Tab> {
        &self.inner.on_created
    }

    pub fn on_removed(&self) -> &Event<TabId> {
        &self.inner.on_removed
    }
}

fn parse_tab_id(payload: &Value) -> Option<TabId> {
    payload.as_u64().and_then(|id| TabId::try_from(id).ok())
}

impl std::fmt::Debug for Tabs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tabs")
            .field("extension_id", &self.inner.extension_id)
            .field("context", &self.inner.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MockTransport};
    use serde_json::json;

    fn install(mock: &Rc<MockTransport>, context: ContextKind) -> Tabs {
        Tabs::install("ext-a", context, mock.clone(), Rc::new(IdGenerator::new()))
    }

    #[test]
    fn test_execute_script_correlates_by_request_id() {
        let mock = MockTransport::new();
        let tabs = install(&mock, ContextKind::BackgroundPage);
        let results = Rc::new(RefCell::new(Vec::new()));

        for label in ["first", "second"] {
            let r = results.clone();
            tabs.execute_script(4, json!({"code": label}), move |values| {
                r.borrow_mut().push((label, values));
            });
        }

        assert_eq!(
            mock.calls(),
            vec![
                Call::Send(HostMessage::TabsExecuteScript {
                    request_id: 1,
                    tab_id: 4,
                    extension_id: "ext-a".into(),
                    details: json!({"code": "first"}),
                }),
                Call::Send(HostMessage::TabsExecuteScript {
                    request_id: 2,
                    tab_id: 4,
                    extension_id: "ext-a".into(),
                    details: json!({"code": "second"}),
                }),
            ]
        );

        mock.deliver(Tag::TabsExecuteScriptResult(2), json!("two"));
        mock.deliver(Tag::TabsExecuteScriptResult(1), json!("one"));
        mock.deliver(Tag::TabsExecuteScriptResult(1), json!("again"));

        assert_eq!(
            *results.borrow(),
            vec![("second", vec![json!("two")]), ("first", vec![json!("one")])]
        );
    }

    #[test]
    fn test_send_message_marks_background() {
        let mock = MockTransport::new();
        install(&mock, ContextKind::BackgroundPage).send_message(9, json!("hi"));
        install(&mock, ContextKind::ContentScript).send_message(9, json!("yo"));

        assert_eq!(
            mock.calls(),
            vec![
                Call::Send(HostMessage::TabsSendMessage {
                    tab_id: 9,
                    extension_id: "ext-a".into(),
                    from_background: true,
                    message: json!("hi"),
                }),
                Call::Send(HostMessage::TabsSendMessage {
                    tab_id: 9,
                    extension_id: "ext-a".into(),
                    from_background: false,
                    message: json!("yo"),
                }),
            ]
        );
    }

    #[test]
    fn test_tab_events() {
        let mock = MockTransport::new();
        let tabs = install(&mock, ContextKind::BackgroundPage);
        let created = Rc::new(RefCell::new(Vec::new()));
        let removed = Rc::new(RefCell::new(Vec::new()));

        let c = created.clone();
        tabs.on_created().subscribe(move |tab| c.borrow_mut().push(*tab));
        let r = removed.clone();
        tabs.on_removed().subscribe(move |id| r.borrow_mut().push(*id));

        mock.deliver(Tag::TabsOnCreated, json!(3));
        mock.deliver(Tag::TabsOnCreated, json!("garbage"));
        mock.deliver(Tag::TabsOnRemoved, json!(3));

        assert_eq!(*created.borrow(), vec![Tab::new(3)]);
        assert_eq!(*removed.borrow(), vec![3]);
    }
}
