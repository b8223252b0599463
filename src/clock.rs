//! The steady-clock capability (`SPEC_FULL.md` §9, §10.D).
//!
//! Nothing in this crate reads wall-clock time directly; every component
//! that schedules a timeout is handed a [`Clock`] so tests can drive the
//! whole stack with a [`VirtualClock`] instead of real time.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;

/// Monotonic milliseconds since some unspecified epoch, stable for the
/// lifetime of one [`Clock`].
pub type Millis = u64;

/// An opaque handle that cancels a scheduled callback when dropped-handling
/// is requested via [`Clock::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// A source of monotonic time and a scheduler for deadline-based callbacks.
///
/// Real deployments back this with the system clock and an event loop's
/// timer wheel; tests back it with [`VirtualClock`], which only advances
/// when told to.
pub trait Clock {
    fn now(&self) -> Millis;

    /// Schedules `callback` to run no earlier than `deadline`. Returns a
    /// handle that can be passed to [`Clock::cancel`].
    fn schedule(&self, deadline: Millis, callback: Box<dyn FnOnce()>) -> TimerId;

    /// Cancels a previously scheduled callback. A no-op if it already fired
    /// or was already cancelled.
    fn cancel(&self, id: TimerId);
}

struct Scheduled {
    deadline: Millis,
    id: TimerId,
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// A clock whose time only moves when [`VirtualClock::advance`] is called,
/// used throughout this crate's test suite so scenarios are deterministic
/// and instantaneous to run (`SPEC_FULL.md` §10.D).
pub struct VirtualClock {
    inner: Rc<RefCell<Inner>>,
}

struct Inner {
    now: Millis,
    next_id: u64,
    // Min-heap on deadline, ties broken by insertion order via the id.
    timers: BinaryHeap<Reverse<(Millis, u64)>>,
    pending: std::collections::HashMap<u64, Scheduled>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                now: 0,
                next_id: 0,
                timers: BinaryHeap::new(),
                pending: std::collections::HashMap::new(),
            })),
        }
    }

    /// Returns a handle that can be shared with components that need a
    /// `Clock` capability without owning this one.
    pub fn handle(&self) -> VirtualClockHandle {
        VirtualClockHandle {
            inner: self.inner.clone(),
        }
    }

    /// Moves time forward by `delta_ms`, firing every callback whose
    /// deadline falls at or before the new time, in deadline order (ties
    /// broken by scheduling order).
    pub fn advance(&self, delta_ms: Millis) {
        let target = self.inner.borrow().now + delta_ms;
        self.advance_to(target);
    }

    /// Moves time forward to the absolute timestamp `target`, firing every
    /// due callback along the way. A no-op if `target` is not ahead of the
    /// current time.
    pub fn advance_to(&self, target: Millis) {
        loop {
            let due = {
                let mut inner = self.inner.borrow_mut();
                if inner.now < target {
                    inner.now = target;
                }
                match inner.timers.peek().copied() {
                    Some(Reverse((deadline, id))) if deadline <= inner.now => {
                        inner.timers.pop();
                        inner.pending.remove(&id)
                    }
                    _ => None,
                }
            };
            match due {
                Some(scheduled) => {
                    if let Some(callback) = scheduled.callback.into_inner() {
                        callback();
                    }
                }
                None => break,
            }
        }
    }

    pub fn now(&self) -> Millis {
        self.inner.borrow().now
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable handle to a [`VirtualClock`]'s shared state; implements
/// [`Clock`] so it can be passed into `Endpoint`/`Transaction`/`Exchange`
/// constructors.
#[derive(Clone)]
pub struct VirtualClockHandle {
    inner: Rc<RefCell<Inner>>,
}

impl Clock for VirtualClockHandle {
    fn now(&self) -> Millis {
        self.inner.borrow().now
    }

    fn schedule(&self, deadline: Millis, callback: Box<dyn FnOnce()>) -> TimerId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.timers.push(Reverse((deadline, id)));
        inner.pending.insert(
            id,
            Scheduled {
                deadline,
                id: TimerId(id),
                callback: RefCell::new(Some(callback)),
            },
        );
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        self.inner.borrow_mut().pending.remove(&id.0);
    }
}
