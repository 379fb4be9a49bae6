use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::error::ResourceError;

enum Slot<T> {
    Unconstructed,
    Constructing(ThreadId),
    Ready(T),
    Failed(ResourceError),
}

/// A lazily constructed, memoized resource.
///
/// The first `get_or_init` runs the constructor; every later call returns the
/// cached value or the cached error. Another thread asking while construction
/// is in progress waits for it; the constructing thread asking again is a
/// dependency cycle.
pub struct MemoCell<T> {
    name: &'static str,
    slot: Mutex<Slot<T>>,
    condition: Condvar,
}

impl<T: Clone> MemoCell<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot::Unconstructed),
            condition: Condvar::new(),
        }
    }

    pub fn get_or_init<F>(&self, init: F) -> Result<T, ResourceError>
    where
        F: FnOnce() -> Result<T, ResourceError>,
    {
        let me = thread::current().id();
        {
            let slot = self.lock();
            let mut slot = self
                .condition
                .wait_while(slot, |slot| {
                    matches!(slot, Slot::Constructing(owner) if *owner != me)
                })
                .unwrap_or_else(PoisonError::into_inner);
            match &*slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::Failed(err) => return Err(err.clone()),
                Slot::Constructing(_) => return Err(ResourceError::Cycle(self.name)),
                Slot::Unconstructed => {}
            }
            *slot = Slot::Constructing(me);
        }

        let outcome = init();

        let mut slot = self.lock();
        *slot = match &outcome {
            Ok(value) => Slot::Ready(value.clone()),
            Err(err) => Slot::Failed(err.clone()),
        };
        self.condition.notify_all();
        outcome
    }

    /// Drops a memoized value or error so the next read constructs again.
    ///
    /// Returns true if something was dropped.
    pub fn invalidate(&self) -> bool {
        let mut slot = self.lock();
        match *slot {
            Slot::Ready(_) | Slot::Failed(_) => {
                *slot = Slot::Unconstructed;
                true
            }
            Slot::Unconstructed | Slot::Constructing(_) => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
