// ── Typed event subscription lists ───────────────────────────────────────────
//
// Each observable entity (window, web view) owns one `Subscribers<A>` per
// event.  Handlers run in subscription order, on the loop thread, and may
// subscribe or unsubscribe from inside a handler: `raise` works on a snapshot
// so the list is never borrowed while user code runs.

use std::{cell::RefCell, rc::Rc};

/// Identifies one subscription; returned by `subscribe`, accepted by
/// `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<A> = Rc<dyn Fn(&A)>;

/// An ordered list of handlers for events carrying an `A`.
pub struct Subscribers<A> {
    inner: RefCell<Inner<A>>,
}

struct Inner<A> {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler<A>)>,
}

impl<A> Default for Subscribers<A> {
    fn default() -> Self {
        Self {
            inner: RefCell::new(Inner {
                next_id: 0,
                handlers: Vec::new(),
            }),
        }
    }
}

impl<A> Subscribers<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: impl Fn(&A) + 'static) -> SubscriptionId {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.handlers.push((id, Rc::new(handler)));
        id
    }

    /// Remove a handler.  Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.handlers.len();
        inner.handlers.retain(|(h, _)| *h != id);
        inner.handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every handler subscribed at the moment of the call, in order.
    pub fn raise(&self, args: &A) {
        let snapshot: Vec<Handler<A>> = self
            .inner
            .borrow()
            .handlers
            .iter()
            .map(|(_, h)| Rc::clone(h))
            .collect();
        for handler in snapshot {
            handler(args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn raise_runs_in_subscription_order() {
        let subs = Subscribers::<i32>::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            subs.subscribe(move |v| log.borrow_mut().push(format!("{tag}{v}")));
        }
        subs.raise(&1);
        assert_eq!(*log.borrow(), ["a1", "b1", "c1"]);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let subs = Subscribers::<()>::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let first = subs.subscribe(move |_| h.set(h.get() + 1));
        let h = Rc::clone(&hits);
        subs.subscribe(move |_| h.set(h.get() + 10));

        assert!(subs.unsubscribe(first));
        assert!(!subs.unsubscribe(first));
        subs.raise(&());
        assert_eq!(hits.get(), 10);
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn handler_may_subscribe_while_raising() {
        let subs = Rc::new(Subscribers::<()>::new());
        let hits = Rc::new(Cell::new(0));
        let (s, h) = (Rc::clone(&subs), Rc::clone(&hits));
        subs.subscribe(move |_| {
            let h = Rc::clone(&h);
            s.subscribe(move |_| h.set(h.get() + 1));
        });

        // The handler added during the first raise is not part of its snapshot.
        subs.raise(&());
        assert_eq!(hits.get(), 0);
        subs.raise(&());
        assert_eq!(hits.get(), 1);
    }
}
