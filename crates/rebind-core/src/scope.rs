use std::cell::RefCell;
use std::rc::Rc;

use crate::{Cell, SubscriptionHandle};

/// Groups subscriptions (and arbitrary cleanups) so they can be torn down
/// together.
///
/// Disposal runs children first, then this scope's disposers in the order
/// they were added. It happens on [`dispose`](Scope::dispose) or when the last
/// clone is dropped, whichever comes first, and never twice.
pub struct Scope {
    inner: Rc<ScopeInner>,
}

#[derive(Default)]
struct ScopeInner {
    disposers: RefCell<Vec<Box<dyn FnOnce()>>>,
    children: RefCell<Vec<Scope>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ScopeInner::default()),
        }
    }

    pub fn add_disposer(&self, disposer: impl FnOnce() + 'static) {
        self.inner.disposers.borrow_mut().push(Box::new(disposer));
    }

    /// Subscribes to `cell`; the subscription is removed when this scope is
    /// disposed.
    pub fn subscribe<V: Clone + PartialEq + 'static>(
        &self,
        cell: &Cell<V>,
        f: impl Fn(&V, &V, &str) + 'static,
    ) -> SubscriptionHandle {
        let handle = cell.subscribe(f);
        self.track(cell, &handle);
        handle
    }

    pub fn subscribe_fallible<V: Clone + PartialEq + 'static>(
        &self,
        cell: &Cell<V>,
        f: impl Fn(&V, &V, &str) -> anyhow::Result<()> + 'static,
    ) -> SubscriptionHandle {
        let handle = cell.subscribe_fallible(f);
        self.track(cell, &handle);
        handle
    }

    fn track<V: Clone + PartialEq + 'static>(&self, cell: &Cell<V>, handle: &SubscriptionHandle) {
        let cell = cell.clone();
        let handle = handle.clone();
        self.add_disposer(move || {
            cell.unsubscribe(&handle);
        });
    }

    pub fn child(&self) -> Scope {
        let child = Scope::new();
        self.inner.children.borrow_mut().push(child.clone());
        child
    }

    /// Number of cleanups still waiting to run in this scope (children not
    /// included).
    pub fn pending(&self) -> usize {
        self.inner.disposers.borrow().len()
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl ScopeInner {
    fn dispose(&self) {
        let children = std::mem::take(&mut *self.children.borrow_mut());
        for child in children {
            child.dispose();
        }

        let disposers = std::mem::take(&mut *self.disposers.borrow_mut());
        for disposer in disposers {
            disposer();
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell as StdCell;

    use super::*;
    use crate::Registry;

    #[test]
    fn explicit_dispose_unsubscribes() {
        let registry = Registry::new();
        let cell = registry.get_or_create("x", 0);
        let hits = Rc::new(StdCell::new(0));

        let scope = Scope::new();
        let h = hits.clone();
        scope.subscribe(&cell, move |_, _, _| h.set(h.get() + 1));
        cell.write(1);
        assert_eq!(hits.get(), 1);

        scope.dispose();
        assert_eq!(scope.pending(), 0);
        assert_eq!(cell.subscriber_count(), 0);
        cell.write(2);
        assert_eq!(hits.get(), 1);

        // second dispose is a no-op
        scope.dispose();
    }

    #[test]
    fn fallible_subscription_is_tracked() {
        let registry = Registry::new();
        let cell = registry.get_or_create("age", 0);
        let failures = Rc::new(StdCell::new(0));
        let f = failures.clone();
        registry.on_delivery_failure(move |_| f.set(f.get() + 1));

        let scope = Scope::new();
        scope.subscribe_fallible(&cell, |new: &i32, _, _| {
            anyhow::ensure!(*new >= 0, "negative age {new}");
            Ok(())
        });
        assert_eq!(scope.pending(), 1);

        cell.write(-1);
        cell.write(3);
        assert_eq!(failures.get(), 1);

        scope.dispose();
        assert_eq!(cell.subscriber_count(), 0);
        cell.write(-5);
        assert_eq!(failures.get(), 1);
    }

    #[test]
    fn drop_disposes_children_first() {
        let order = Rc::new(RefCell::new(Vec::new()));
        {
            let parent = Scope::new();
            let child = parent.child();
            let o = order.clone();
            parent.add_disposer(move || o.borrow_mut().push("parent"));
            let o = order.clone();
            child.add_disposer(move || o.borrow_mut().push("child"));
        }
        assert_eq!(*order.borrow(), vec!["child", "parent"]);
    }

    #[test]
    fn dispose_after_cell_removed_is_harmless() {
        let registry = Registry::new();
        let cell = registry.get_or_create("x", 0);
        let scope = Scope::new();
        scope.subscribe(&cell, |_, _, _| {});
        registry.remove("x");
        scope.dispose();
        assert_eq!(cell.subscriber_count(), 0);
    }
}
