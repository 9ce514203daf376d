//! # Cells, Registry, and Dispatch
//!
//! `rebind-core` is a small keyed reactive store. There are three pieces:
//!
//! - [`Cell`]: one observable value plus its ordered subscribers.
//! - [`Registry`]: owns every cell, keyed by string.
//! - the dispatcher: delivers changes, in subscription order, with a guard
//!   against re-entrant write loops.
//!
//! ## Cells
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use rebind_core::*;
//!
//! let registry = Registry::new();
//! let x = registry.get_or_create("x", 0);
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! x.subscribe({
//!     let seen = seen.clone();
//!     move |new, old, key| seen.borrow_mut().push((*new, *old, key.to_string()))
//! });
//!
//! x.write(1);
//! x.write(1); // equal value: no notification
//! assert_eq!(*seen.borrow(), vec![(1, 0, "x".to_string())]);
//! assert_eq!(registry.read("x").unwrap(), 1);
//! ```
//!
//! Writing a value equal to the current one is a no-op. Every other write
//! runs one notification cycle over a snapshot of the subscriber list, so a
//! subscriber added mid-cycle waits for the next change.
//!
//! ## Writing back from a subscriber
//!
//! A subscriber may write to the cell it is observing. That write is queued
//! and applied after the current cycle, as a cycle of its own:
//!
//! ```rust
//! use rebind_core::*;
//!
//! let registry = Registry::new();
//! let volume = registry.get_or_create("volume", 0);
//! volume.subscribe({
//!     let registry = registry.downgrade();
//!     move |new, _, key| {
//!         if *new > 10 {
//!             if let Some(registry) = registry.upgrade() {
//!                 registry.write(key, 10);
//!             }
//!         }
//!     }
//! });
//!
//! assert_eq!(volume.write(42), WriteOutcome::Notified { cycles: 2, failures: 0 });
//! assert_eq!(volume.read(), 10);
//! ```
//!
//! Subscribers capture a [`WeakRegistry`] so the registry does not keep
//! itself alive. A chain that never settles stops after
//! [`RegistryConfig::max_drain_cycles`] and is reported as a
//! [`DeliveryFailure`].
//!
//! ## Failures
//!
//! A panicking subscriber, or one registered with
//! [`Cell::subscribe_fallible`] that returns `Err`, does not disturb the
//! others. The failure is logged and handed to the hook installed with
//! [`Registry::on_delivery_failure`]. Only structural errors such as
//! [`Error::NotFound`] are returned to callers.
//!
//! ## Keyed state and scopes
//!
//! [`keyed_state`] returns `(value, setter)` for a key, and [`Scope`] groups
//! subscriptions so a consumer can drop all of them at once.
//!
//! With the `serde` feature, [`Registry::to_json`] and
//! [`Registry::restore_json`] snapshot and restore values.

pub mod cell;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod scope;
#[cfg(feature = "serde")]
pub mod snapshot;
pub mod state;

pub use cell::{Cell, CellId, SubscriptionHandle, SubscriptionId};
pub use config::RegistryConfig;
pub use dispatch::WriteOutcome;
pub use error::{DeliveryFailure, Error, FailureReason, Result};
pub use registry::{Registry, WeakRegistry};
pub use scope::Scope;
pub use state::{Setter, keyed_state};
