use crate::{Cell, Registry, WriteOutcome};

/// Write half of a [`keyed_state`] pair.
pub struct Setter<V: 'static> {
    cell: Cell<V>,
}

impl<V> Clone for Setter<V> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<V: Clone + PartialEq + 'static> Setter<V> {
    pub fn set(&self, value: V) -> WriteOutcome {
        self.cell.write(value)
    }

    pub fn update<F: FnOnce(&mut V)>(&self, f: F) -> WriteOutcome {
        self.cell.update(f)
    }

    pub fn get(&self) -> V {
        self.cell.read()
    }

    pub fn cell(&self) -> &Cell<V> {
        &self.cell
    }
}

/// Key-based state slot: the current value plus a setter.
///
/// Identity comes from `key`, never from call order, so conditional callers
/// cannot shift each other's state. `init` runs only when the key is new.
pub fn keyed_state<V: Clone + PartialEq + 'static>(
    registry: &Registry<V>,
    key: &str,
    init: impl FnOnce() -> V,
) -> (V, Setter<V>) {
    let cell = registry.get_or_create_with(key, init);
    (cell.read(), Setter { cell })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_runs_once_per_key() {
        let registry = Registry::new();
        let (count, set_count) = keyed_state(&registry, "count", || 0);
        assert_eq!(count, 0);
        set_count.update(|c| *c += 1);

        let (count, _) = keyed_state(&registry, "count", || 99);
        assert_eq!(count, 1);
    }

    #[test]
    fn keys_do_not_depend_on_call_order() {
        let registry = Registry::new();
        let render = |show_first: bool| {
            if show_first {
                keyed_state(&registry, "first", || 10).1.set(11);
            }
            keyed_state(&registry, "second", || 20).0
        };

        assert_eq!(render(true), 20);
        assert_eq!(render(false), 20);
        assert_eq!(registry.read("first").unwrap(), 11);
    }

    #[test]
    fn setter_notifies_subscribers() {
        let registry = Registry::new();
        let (_, set_name) = keyed_state(&registry, "name", || "React".to_string());
        let seen = std::rc::Rc::new(std::cell::RefCell::new(None));
        let s = seen.clone();
        set_name
            .cell()
            .subscribe(move |new: &String, _, _| *s.borrow_mut() = Some(new.clone()));

        assert_eq!(
            set_name.set("Vue".into()),
            WriteOutcome::Notified {
                cycles: 1,
                failures: 0
            }
        );
        assert_eq!(seen.borrow().as_deref(), Some("Vue"));
        assert_eq!(set_name.get(), "Vue");
    }
}
