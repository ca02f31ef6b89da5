//! Typed signals and scoped listeners.
//!
//! A [`Signal<E, D>`] carries events of type `E` to listeners that also
//! receive mutable access to shared data `D` (the compositor state, in
//! practice). This mirrors how calloop hands `&mut D` to every event source
//! callback, so handlers never need `Rc<RefCell<State>>`.
//!
//! Emission is synchronous and happens in the caller's context. The listener
//! list is snapshotted before the first callback runs, which gives the
//! following guarantees:
//! - a listener subscribed during an emission is not invoked by that emission;
//! - a listener removed during an emission (by itself or by another listener)
//!   is not invoked afterwards, even if it was part of the snapshot.
//!
//! [`Listener`] is the subscription handle. Dropping it unsubscribes, so an
//! entity that owns its listeners cannot outlive its subscriptions.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::warn;

type Callback<E, D> = Rc<RefCell<dyn FnMut(&mut D, &E)>>;

struct Slot<E, D> {
    id: u64,
    callback: Callback<E, D>,
}

struct SignalInner<E, D> {
    name: &'static str,
    next_id: u64,
    slots: Vec<Slot<E, D>>,
}

impl<E, D> SignalInner<E, D> {
    fn contains(&self, id: u64) -> bool {
        self.slots.iter().any(|slot| slot.id == id)
    }

    fn take(&mut self, id: u64) -> Option<Slot<E, D>> {
        let index = self.slots.iter().position(|slot| slot.id == id)?;
        Some(self.slots.remove(index))
    }
}

/// A named event source with zero or more listeners.
///
/// Cloning a `Signal` yields another handle to the same listener list.
pub struct Signal<E, D> {
    inner: Rc<RefCell<SignalInner<E, D>>>,
}

impl<E, D> Signal<E, D> {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SignalInner {
                name,
                next_id: 1,
                slots: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.borrow().name
    }

    /// Registers `callback` to run on every subsequent emission.
    ///
    /// Listeners run in subscription order.
    pub fn subscribe<F>(&self, callback: F) -> Listener<E, D>
    where
        F: FnMut(&mut D, &E) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let callback: Callback<E, D> = Rc::new(RefCell::new(callback));
        inner.slots.push(Slot { id, callback });
        Listener {
            id,
            name: inner.name,
            signal: Rc::downgrade(&self.inner),
        }
    }

    /// Invokes every currently subscribed listener with `data` and `event`.
    ///
    /// Returns the number of listeners that ran.
    pub fn emit(&self, data: &mut D, event: &E) -> usize {
        let snapshot: Vec<(u64, Callback<E, D>)> = self
            .inner
            .borrow()
            .slots
            .iter()
            .map(|slot| (slot.id, Rc::clone(&slot.callback)))
            .collect();

        let mut invoked = 0;
        for (id, callback) in snapshot {
            if !self.inner.borrow().contains(id) {
                continue;
            }
            let Ok(mut callback) = callback.try_borrow_mut() else {
                // The listener is emitting this signal from inside its own callback.
                warn!(signal = self.name(), listener = id, "Skipping re-entrant listener");
                continue;
            };
            (&mut *callback)(data, event);
            invoked += 1;
        }
        invoked
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listener_count() == 0
    }
}

impl<E, D> Clone for Signal<E, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E, D> fmt::Debug for Signal<E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Signal")
            .field("name", &inner.name)
            .field("listeners", &inner.slots.len())
            .finish()
    }
}

/// A subscription to a [`Signal`].
///
/// The subscription lasts exactly as long as this handle. It may be dropped
/// from inside its own callback.
#[must_use = "dropping a Listener unsubscribes it"]
pub struct Listener<E, D> {
    id: u64,
    name: &'static str,
    signal: Weak<RefCell<SignalInner<E, D>>>,
}

impl<E, D> Listener<E, D> {
    /// Returns `true` while the listener is still registered on a live signal.
    pub fn is_subscribed(&self) -> bool {
        self.signal
            .upgrade()
            .is_some_and(|inner| inner.borrow().contains(self.id))
    }

    /// Unsubscribes the listener. Equivalent to dropping it.
    pub fn unsubscribe(self) {}
}

impl<E, D> Drop for Listener<E, D> {
    fn drop(&mut self) {
        let Some(inner) = self.signal.upgrade() else {
            return;
        };
        // Release the borrow before the callback is dropped: its captures may
        // hold listeners on this same signal.
        let removed = inner.borrow_mut().take(self.id);
        drop(removed);
    }
}

impl<E, D> fmt::Debug for Listener<E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("signal", &self.name)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
