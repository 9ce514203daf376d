//! Change delivery.
//!
//! Each write that changes a cell's value starts a notification cycle: the
//! subscriber list is snapshotted and every subscriber runs once, in
//! subscription order. While a cell is being notified it is "in flight";
//! writes to it from inside a callback are queued and drained afterwards,
//! one cycle per queued change, instead of recursing.
//!
//! Subscriber panics and errors are caught per subscriber, reported through
//! the log and the registry's failure hook, and never stop the cycle.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use crate::cell::{CellId, Slot};
use crate::config::RegistryConfig;
use crate::error::{DeliveryFailure, FailureReason};

pub(crate) type FailureHook = Rc<dyn Fn(&DeliveryFailure)>;

/// What a single write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The key did not exist; a cell was created holding the value.
    Created,
    /// Value equal to the current one; nothing fired.
    Unchanged,
    /// The value changed and `cycles` notification cycles ran (more than one
    /// when subscribers wrote back to the same cell).
    Notified { cycles: usize, failures: usize },
    /// The cell is mid-notification; the write was queued and will be applied
    /// once the current cycle finishes. The equality check happens when the
    /// queue drains, so a queued value equal to the current one still reports
    /// `Deferred` here and is skipped later without a cycle.
    Deferred,
    /// The cell was removed from its registry (or the registry dropped).
    Detached,
    /// Subscribers kept writing back to the cell; the queue was abandoned.
    CycleLimitReached { cycles: usize, dropped: usize },
}

impl WriteOutcome {
    /// True if the stored value changed as part of this write.
    pub fn changed(&self) -> bool {
        matches!(
            self,
            WriteOutcome::Created
                | WriteOutcome::Notified { .. }
                | WriteOutcome::CycleLimitReached { .. }
        )
    }
}

type InFlight<V> = RefCell<HashMap<CellId, VecDeque<V>>>;

pub(crate) struct Dispatcher<V> {
    pub(crate) config: RegistryConfig,
    in_flight: InFlight<V>,
    failure_hook: RefCell<Option<FailureHook>>,
}

impl<V: Clone + PartialEq + 'static> Dispatcher<V> {
    pub(crate) fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            in_flight: RefCell::new(HashMap::new()),
            failure_hook: RefCell::new(None),
        }
    }

    pub(crate) fn set_failure_hook(&self, hook: Option<FailureHook>) {
        *self.failure_hook.borrow_mut() = hook;
    }

    pub(crate) fn is_notifying(&self, id: CellId) -> bool {
        self.in_flight.borrow().contains_key(&id)
    }

    /// Value the cell will hold once its queue drains: the last queued write
    /// while in flight, otherwise the stored value.
    pub(crate) fn latest(&self, id: CellId, slot: &Slot<V>) -> V {
        let queued = self
            .in_flight
            .borrow()
            .get(&id)
            .and_then(|pending| pending.back().cloned());
        queued.unwrap_or_else(|| slot.value())
    }

    pub(crate) fn write(&self, id: CellId, slot: &Slot<V>, value: V) -> WriteOutcome {
        if !slot.is_attached() {
            log::debug!("write to removed cell '{}' ignored", slot.key);
            return WriteOutcome::Detached;
        }

        if let Some(pending) = self.in_flight.borrow_mut().get_mut(&id) {
            pending.push_back(value);
            log::trace!(
                "'{}' is notifying; queued write ({} pending)",
                slot.key,
                pending.len()
            );
            return WriteOutcome::Deferred;
        }

        let Some(mut old) = slot.replace_if_changed(value) else {
            return WriteOutcome::Unchanged;
        };

        let _guard = InFlightGuard::enter(&self.in_flight, id);
        let limit = self.config.drain_limit();
        let mut cycles = 0;
        let mut failures = 0;

        loop {
            cycles += 1;
            failures += self.deliver(slot, &old);

            let next = loop {
                let Some(queued) = self.pop_pending(id) else {
                    break None;
                };
                if !slot.is_attached() {
                    let dropped = 1 + self.take_pending(id);
                    log::debug!(
                        "'{}' removed during notification; dropped {dropped} queued write(s)",
                        slot.key
                    );
                    break None;
                }
                if !slot.differs(&queued) {
                    continue;
                }
                if cycles >= limit {
                    let dropped = 1 + self.take_pending(id);
                    self.report(DeliveryFailure {
                        key: slot.key.to_string(),
                        subscription: None,
                        reason: FailureReason::CycleLimitExceeded { cycles, dropped },
                    });
                    return WriteOutcome::CycleLimitReached { cycles, dropped };
                }
                break slot.replace_if_changed(queued);
            };

            match next {
                Some(previous) => old = previous,
                None => break,
            }
        }

        WriteOutcome::Notified { cycles, failures }
    }

    /// One notification cycle. Returns how many subscribers failed.
    fn deliver(&self, slot: &Slot<V>, old: &V) -> usize {
        let new = slot.value();
        let subscribers = slot.snapshot();
        log::trace!(
            "notifying {} subscriber(s) of '{}'",
            subscribers.len(),
            slot.key
        );

        let mut failures = 0;
        for sub in subscribers.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| (sub.callback)(&new, old, &*slot.key)));
            let reason = match result {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => FailureReason::Rejected(err),
                Err(payload) => FailureReason::from_panic(payload),
            };
            failures += 1;
            self.report(DeliveryFailure {
                key: slot.key.to_string(),
                subscription: Some(sub.id),
                reason,
            });
        }
        failures
    }

    fn pop_pending(&self, id: CellId) -> Option<V> {
        self.in_flight
            .borrow_mut()
            .get_mut(&id)
            .and_then(VecDeque::pop_front)
    }

    fn take_pending(&self, id: CellId) -> usize {
        let drained = self
            .in_flight
            .borrow_mut()
            .get_mut(&id)
            .map(std::mem::take)
            .unwrap_or_default();
        drained.len()
    }

    fn report(&self, failure: DeliveryFailure) {
        if self.config.log_failures {
            if failure.reason.is_cycle_limit() {
                log::error!("{failure}");
            } else {
                log::warn!("{failure}");
            }
        }
        let hook = self.failure_hook.borrow().clone();
        if let Some(hook) = hook {
            hook(&failure);
        }
    }
}

/// Marks a cell in flight; clears the mark (and any queue) on drop, so a
/// panic escaping the dispatcher does not wedge the cell.
struct InFlightGuard<'a, V> {
    in_flight: &'a InFlight<V>,
    id: CellId,
}

impl<'a, V> InFlightGuard<'a, V> {
    fn enter(in_flight: &'a InFlight<V>, id: CellId) -> Self {
        in_flight.borrow_mut().insert(id, VecDeque::new());
        Self { in_flight, id }
    }
}

impl<V> Drop for InFlightGuard<'_, V> {
    fn drop(&mut self) {
        let leftover = self.in_flight.borrow_mut().remove(&self.id);
        drop(leftover);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as StdCell;

    use slotmap::SlotMap;

    fn fixture(value: i32) -> (Dispatcher<i32>, CellId, Rc<Slot<i32>>) {
        let mut ids: SlotMap<CellId, ()> = SlotMap::with_key();
        let id = ids.insert(());
        (
            Dispatcher::new(RegistryConfig::default()),
            id,
            Rc::new(Slot::new(Rc::from("k"), value)),
        )
    }

    #[test]
    fn unchanged_write_does_not_enter_flight() {
        let (d, id, slot) = fixture(3);
        assert_eq!(d.write(id, &slot, 3), WriteOutcome::Unchanged);
        assert!(!d.is_notifying(id));
    }

    #[test]
    fn in_flight_cleared_after_write() {
        let (d, id, slot) = fixture(0);
        assert_eq!(
            d.write(id, &slot, 1),
            WriteOutcome::Notified {
                cycles: 1,
                failures: 0
            }
        );
        assert!(!d.is_notifying(id));
    }

    #[test]
    fn queued_write_is_deferred() {
        let (d, id, slot) = fixture(0);
        let _guard = InFlightGuard::enter(&d.in_flight, id);
        assert_eq!(d.write(id, &slot, 9), WriteOutcome::Deferred);
        assert_eq!(slot.value(), 0);
        assert_eq!(d.pop_pending(id), Some(9));
    }

    #[test]
    fn latest_sees_queued_writes() {
        let (d, id, slot) = fixture(0);
        assert_eq!(d.latest(id, &slot), 0);
        let _guard = InFlightGuard::enter(&d.in_flight, id);
        assert_eq!(d.latest(id, &slot), 0);
        d.write(id, &slot, 4);
        d.write(id, &slot, 7);
        assert_eq!(d.latest(id, &slot), 7);
        assert_eq!(slot.value(), 0);
    }

    #[test]
    fn guard_clears_on_drop() {
        let (d, id, _slot) = fixture(0);
        {
            let _guard = InFlightGuard::enter(&d.in_flight, id);
            assert!(d.is_notifying(id));
        }
        assert!(!d.is_notifying(id));
    }

    #[test]
    fn failure_hook_sees_reports() {
        let (d, _id, _slot) = fixture(0);
        let seen = Rc::new(StdCell::new(0));
        let s = seen.clone();
        d.set_failure_hook(Some(Rc::new(move |_: &DeliveryFailure| s.set(s.get() + 1))));
        d.report(DeliveryFailure {
            key: "k".into(),
            subscription: None,
            reason: FailureReason::Panicked("x".into()),
        });
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn hook_fires_with_logging_disabled() {
        let config = RegistryConfig::default().with_log_failures(false);
        let d: Dispatcher<i32> = Dispatcher::new(config);
        assert!(!d.config.log_failures);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        d.set_failure_hook(Some(Rc::new(move |f: &DeliveryFailure| {
            s.borrow_mut().push(f.key.clone())
        })));
        d.report(DeliveryFailure {
            key: "quiet".into(),
            subscription: None,
            reason: FailureReason::Rejected(anyhow::anyhow!("bad input")),
        });
        d.report(DeliveryFailure {
            key: "quiet".into(),
            subscription: None,
            reason: FailureReason::CycleLimitExceeded {
                cycles: 3,
                dropped: 1,
            },
        });
        assert_eq!(*seen.borrow(), vec!["quiet", "quiet"]);
    }

    #[test]
    fn outcome_changed() {
        assert!(WriteOutcome::Created.changed());
        assert!(
            WriteOutcome::Notified {
                cycles: 1,
                failures: 0
            }
            .changed()
        );
        assert!(!WriteOutcome::Deferred.changed());
        assert!(!WriteOutcome::Unchanged.changed());
        assert!(!WriteOutcome::Detached.changed());
    }
}
