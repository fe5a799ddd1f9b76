//! Event containers
//!
//! Multi-subscriber listener lists behind `onMessage`, `onConnect` and friends.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Handle returned by [`Event::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Rc<dyn Fn(&T)>;

/// Ordered list of listeners invoked synchronously on emit
///
/// Listeners run in subscription order. Duplicates are not collapsed.
/// Emission iterates a snapshot, so a listener may subscribe or unsubscribe
/// (itself included) while running; the change applies to the next emission.
pub struct Event<T> {
    listeners: RefCell<Vec<(ListenerId, Listener<T>)>>,
    next_id: Cell<u64>,
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    /// Add a listener
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Invoke every listener with `args`
    pub fn emit(&self, args: &T) {
        self.emit_while(args, || true);
    }

    /// Like [`emit`](Self::emit), but stop as soon as `proceed` returns false.
    /// `proceed` is checked before each listener.
    pub fn emit_while(&self, args: &T, proceed: impl Fn() -> bool) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        for listener in snapshot {
            if !proceed() {
                break;
            }
            listener(args);
        }
    }

    /// Drop all listeners
    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("listeners", &self.len())
            .finish()
    }
}
