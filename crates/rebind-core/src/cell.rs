use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::dispatch::WriteOutcome;
use crate::registry::RegistryInner;

slotmap::new_key_type! {
    /// Generational id of a cell. A removed cell's id is never reused for a
    /// later cell under the same key.
    pub struct CellId;
}

/// Unique id of one subscription, stable for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receives `(new, old, key)`.
pub(crate) type Callback<V> = Rc<dyn Fn(&V, &V, &str) -> anyhow::Result<()>>;

pub(crate) struct Subscriber<V> {
    pub(crate) id: SubscriptionId,
    pub(crate) callback: Callback<V>,
}

impl<V> Clone for Subscriber<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: self.callback.clone(),
        }
    }
}

pub(crate) type Subscribers<V> = SmallVec<[Subscriber<V>; 4]>;

struct SlotState<V> {
    value: V,
    subscribers: Subscribers<V>,
    attached: bool,
}

/// Storage behind a cell. Owned by the registry; handles share it.
pub(crate) struct Slot<V> {
    pub(crate) key: Rc<str>,
    state: RefCell<SlotState<V>>,
}

impl<V: Clone + PartialEq> Slot<V> {
    pub(crate) fn new(key: Rc<str>, value: V) -> Self {
        Self {
            key,
            state: RefCell::new(SlotState {
                value,
                subscribers: SmallVec::new(),
                attached: true,
            }),
        }
    }

    pub(crate) fn value(&self) -> V {
        self.state.borrow().value.clone()
    }

    pub(crate) fn differs(&self, candidate: &V) -> bool {
        self.state.borrow().value != *candidate
    }

    /// Stores `next` if it differs from the current value and returns the
    /// value it replaced.
    pub(crate) fn replace_if_changed(&self, next: V) -> Option<V> {
        let mut state = self.state.borrow_mut();
        if state.value == next {
            return None;
        }
        Some(std::mem::replace(&mut state.value, next))
    }

    /// Subscriber list as of now. Later pushes do not show up in it.
    pub(crate) fn snapshot(&self) -> Subscribers<V> {
        self.state.borrow().subscribers.clone()
    }

    fn push(&self, subscriber: Subscriber<V>) {
        self.state.borrow_mut().subscribers.push(subscriber);
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut state = self.state.borrow_mut();
            state
                .subscribers
                .iter()
                .position(|s| s.id == id)
                .map(|pos| state.subscribers.remove(pos))
        };
        // Dropped outside the borrow: a callback may own something whose
        // drop calls back into this slot.
        removed.is_some()
    }

    pub(crate) fn detach(&self) {
        let subscribers = {
            let mut state = self.state.borrow_mut();
            state.attached = false;
            std::mem::take(&mut state.subscribers)
        };
        drop(subscribers);
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.state.borrow().attached
    }

    fn subscriber_count(&self) -> usize {
        self.state.borrow().subscribers.len()
    }
}

/// Returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub(crate) cell: CellId,
    pub(crate) id: SubscriptionId,
    key: Rc<str>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// A cloneable handle to one observable value in a [`Registry`](crate::Registry).
///
/// Writes go through the registry's dispatcher. A handle outlives removal of
/// its cell: after [`Registry::remove`](crate::Registry::remove) it still
/// reads the last value, but writes report [`WriteOutcome::Detached`] and no
/// subscriber ever fires again.
pub struct Cell<V: 'static> {
    id: CellId,
    slot: Rc<Slot<V>>,
    registry: Weak<RegistryInner<V>>,
}

impl<V> Clone for Cell<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            slot: self.slot.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<V: Clone + PartialEq + 'static> Cell<V> {
    pub(crate) fn new(id: CellId, slot: Rc<Slot<V>>, registry: Weak<RegistryInner<V>>) -> Self {
        Self { id, slot, registry }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.slot.key
    }

    pub fn read(&self) -> V {
        self.slot.value()
    }

    /// Stores `value` and notifies subscribers, unless it equals the current
    /// value.
    pub fn write(&self, value: V) -> WriteOutcome {
        match self.registry.upgrade() {
            Some(registry) => registry.dispatcher.write(self.id, &self.slot, value),
            None => {
                log::debug!("write to '{}' after its registry was dropped", self.key());
                WriteOutcome::Detached
            }
        }
    }

    /// Functional write: edits a copy of the latest value, then writes it.
    ///
    /// Inside a notification cycle of this cell, "latest" is the last queued
    /// write, so consecutive updates compose instead of overwriting each
    /// other.
    pub fn update<F: FnOnce(&mut V)>(&self, f: F) -> WriteOutcome {
        let Some(registry) = self.registry.upgrade() else {
            log::debug!("update of '{}' after its registry was dropped", self.key());
            return WriteOutcome::Detached;
        };
        let mut next = registry.dispatcher.latest(self.id, &self.slot);
        f(&mut next);
        registry.dispatcher.write(self.id, &self.slot, next)
    }

    pub fn subscribe(&self, f: impl Fn(&V, &V, &str) + 'static) -> SubscriptionHandle {
        self.subscribe_fallible(move |new, old, key| {
            f(new, old, key);
            Ok(())
        })
    }

    /// Like [`subscribe`](Self::subscribe), but an `Err` from the callback is
    /// reported as a delivery failure.
    pub fn subscribe_fallible(
        &self,
        f: impl Fn(&V, &V, &str) -> anyhow::Result<()> + 'static,
    ) -> SubscriptionHandle {
        let id = SubscriptionId::next();
        if self.is_attached() {
            self.slot.push(Subscriber {
                id,
                callback: Rc::new(f),
            });
        } else {
            log::warn!(
                "subscribe on removed cell '{}'; the callback will never run",
                self.key()
            );
        }
        SubscriptionHandle {
            cell: self.id,
            id,
            key: self.slot.key.clone(),
        }
    }

    /// Removes one subscription. Unknown or already removed handles are a
    /// no-op; returns whether anything was removed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        handle.cell == self.id && self.slot.remove(handle.id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.slot.subscriber_count()
    }

    pub fn is_attached(&self) -> bool {
        self.slot.is_attached() && self.registry.strong_count() > 0
    }
}

impl<V> fmt::Debug for Cell<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("key", &self.slot.key)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(value: i32) -> Slot<i32> {
        Slot::new(Rc::from("k"), value)
    }

    fn noop() -> Subscriber<i32> {
        Subscriber {
            id: SubscriptionId::next(),
            callback: Rc::new(|_: &i32, _: &i32, _: &str| -> anyhow::Result<()> { Ok(()) }),
        }
    }

    #[test]
    fn replace_if_changed_skips_equal_values() {
        let s = slot(1);
        assert_eq!(s.replace_if_changed(1), None);
        assert_eq!(s.replace_if_changed(2), Some(1));
        assert_eq!(s.value(), 2);
    }

    #[test]
    fn snapshot_is_not_affected_by_later_pushes() {
        let s = slot(0);
        s.push(noop());
        let snap = s.snapshot();
        s.push(noop());
        assert_eq!(snap.len(), 1);
        assert_eq!(s.subscriber_count(), 2);
    }

    #[test]
    fn detach_drops_subscribers() {
        let s = slot(0);
        let sub = noop();
        let id = sub.id;
        s.push(sub);
        s.detach();
        assert!(!s.is_attached());
        assert_eq!(s.subscriber_count(), 0);
        assert!(!s.remove(id));
    }

    #[test]
    fn subscription_ids_are_unique() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert_ne!(a, b);
    }
}
