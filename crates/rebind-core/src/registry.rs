use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use slotmap::SlotMap;

use crate::cell::{Cell, CellId, Slot, SubscriptionHandle};
use crate::config::RegistryConfig;
use crate::dispatch::{Dispatcher, WriteOutcome};
use crate::error::{DeliveryFailure, Error, Result};

pub(crate) struct RegistryInner<V: 'static> {
    cells: RefCell<SlotMap<CellId, Rc<Slot<V>>>>,
    keys: RefCell<HashMap<Rc<str>, CellId>>,
    pub(crate) dispatcher: Dispatcher<V>,
}

/// Owner of every cell, keyed by string.
///
/// `Registry` is a cheap, cloneable handle. Subscribers that need to write
/// back should capture a [`WeakRegistry`] (see [`Registry::downgrade`]);
/// a strong handle captured by a subscriber keeps the registry alive forever.
pub struct Registry<V: 'static> {
    inner: Rc<RegistryInner<V>>,
}

impl<V> Clone for Registry<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V: Clone + PartialEq + 'static> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + PartialEq + 'static> Registry<V> {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                cells: RefCell::new(SlotMap::with_key()),
                keys: RefCell::new(HashMap::new()),
                dispatcher: Dispatcher::new(config),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.dispatcher.config
    }

    /// Returns the cell for `key`, creating it with `initial` if absent.
    /// `initial` is ignored when the cell already exists.
    pub fn get_or_create(&self, key: &str, initial: V) -> Cell<V> {
        self.get_or_create_with(key, || initial)
    }

    /// Like [`get_or_create`](Self::get_or_create) but only builds the
    /// initial value when the cell is created.
    pub fn get_or_create_with(&self, key: &str, init: impl FnOnce() -> V) -> Cell<V> {
        if let Some(cell) = self.lookup(key) {
            return cell;
        }
        let value = init();
        // `init` may itself have touched the registry.
        if let Some(cell) = self.lookup(key) {
            return cell;
        }

        let key: Rc<str> = Rc::from(key);
        let slot = Rc::new(Slot::new(key.clone(), value));
        let id = self.inner.cells.borrow_mut().insert(slot.clone());
        self.inner.keys.borrow_mut().insert(key, id);
        log::trace!("created cell '{}'", slot.key);
        Cell::new(id, slot, Rc::downgrade(&self.inner))
    }

    /// Non-creating lookup.
    pub fn get(&self, key: &str) -> Result<Cell<V>> {
        self.lookup(key).ok_or_else(|| Error::not_found(key))
    }

    fn lookup(&self, key: &str) -> Option<Cell<V>> {
        let id = *self.inner.keys.borrow().get(key)?;
        let slot = self.inner.cells.borrow().get(id)?.clone();
        Some(Cell::new(id, slot, Rc::downgrade(&self.inner)))
    }

    /// Destroys the cell and every subscription on it. Returns `false` if the
    /// key was absent. A later `get_or_create` builds a fresh cell.
    pub fn remove(&self, key: &str) -> bool {
        let Some(id) = self.inner.keys.borrow_mut().remove(key) else {
            return false;
        };
        let slot = self.inner.cells.borrow_mut().remove(id);
        if let Some(slot) = slot {
            slot.detach();
        }
        log::debug!("removed cell '{key}'");
        true
    }

    pub fn clear(&self) {
        for key in self.keys() {
            self.remove(&key);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.keys.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.keys.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .keys
            .borrow()
            .keys()
            .map(|k| k.to_string())
            .collect();
        keys.sort();
        keys
    }

    pub fn read(&self, key: &str) -> Result<V> {
        self.get(key).map(|cell| cell.read())
    }

    /// Writes through the cell for `key`, creating it on first write.
    pub fn write(&self, key: &str, value: V) -> WriteOutcome {
        match self.lookup(key) {
            Some(cell) => cell.write(value),
            None => {
                self.get_or_create(key, value);
                WriteOutcome::Created
            }
        }
    }

    pub fn update(&self, key: &str, f: impl FnOnce(&mut V)) -> Result<WriteOutcome> {
        Ok(self.get(key)?.update(f))
    }

    /// Removes one subscription. Handles from removed cells, or already
    /// removed handles, are a silent no-op.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let slot = self.inner.cells.borrow().get(handle.cell).cloned();
        slot.is_some_and(|slot| slot.remove(handle.id))
    }

    /// True while `key` is in the middle of a notification cycle.
    pub fn is_notifying(&self, key: &str) -> bool {
        let id = self.inner.keys.borrow().get(key).copied();
        id.is_some_and(|id| self.inner.dispatcher.is_notifying(id))
    }

    /// Installs the side channel for subscriber failures. Replaces any
    /// previous hook.
    pub fn on_delivery_failure(&self, hook: impl Fn(&DeliveryFailure) + 'static) {
        self.inner.dispatcher.set_failure_hook(Some(Rc::new(hook)));
    }

    pub fn clear_delivery_failure_hook(&self) {
        self.inner.dispatcher.set_failure_hook(None);
    }

    /// Point-in-time copy of every value.
    pub fn snapshot(&self) -> BTreeMap<String, V> {
        let slots: Vec<Rc<Slot<V>>> = self.inner.cells.borrow().values().cloned().collect();
        slots
            .into_iter()
            .map(|slot| (slot.key.to_string(), slot.value()))
            .collect()
    }

    pub fn downgrade(&self) -> WeakRegistry<V> {
        WeakRegistry {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl<V: Clone + PartialEq + Default + 'static> Registry<V> {
    /// Subscribes to `key`, creating the cell with `V::default()` if needed.
    pub fn subscribe(&self, key: &str, f: impl Fn(&V, &V, &str) + 'static) -> SubscriptionHandle {
        self.get_or_create_with(key, V::default).subscribe(f)
    }

    pub fn subscribe_fallible(
        &self,
        key: &str,
        f: impl Fn(&V, &V, &str) -> anyhow::Result<()> + 'static,
    ) -> SubscriptionHandle {
        self.get_or_create_with(key, V::default)
            .subscribe_fallible(f)
    }
}

impl<V> fmt::Debug for Registry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("cells", &self.inner.keys.borrow().len())
            .field("config", &self.inner.dispatcher.config)
            .finish()
    }
}

/// Non-owning registry handle, for subscribers that write back.
pub struct WeakRegistry<V: 'static> {
    inner: Weak<RegistryInner<V>>,
}

impl<V> Clone for WeakRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> WeakRegistry<V> {
    pub fn upgrade(&self) -> Option<Registry<V>> {
        self.inner.upgrade().map(|inner| Registry { inner })
    }
}
