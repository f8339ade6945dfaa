use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Single-shot, auto-resettable latch. `set` marks the event signalled and
/// wakes one waiter; a successful `wait` consumes the mark, so repeated sets
/// without an intervening wait coalesce into one wakeup.
pub struct Signal {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    #[inline]
    pub fn new() -> Signal {
        Signal {
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Block up to `timeout` for the event. `Duration::ZERO` means wait
    /// forever. Returns true iff the event was signalled before the deadline;
    /// spurious wakeups are filtered by re-checking the flag under the lock.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut signalled = self.state.lock();

        if timeout == Duration::ZERO {
            while !*signalled {
                self.cond.wait(&mut signalled);
            }
        } else {
            let deadline = Instant::now() + timeout;
            while !*signalled {
                if self.cond.wait_until(&mut signalled, deadline).timed_out() {
                    break;
                }
            }
        }

        let was_signalled = *signalled;
        *signalled = false;
        was_signalled
    }

    /// Mark the event signalled, waking one waiter (or remembering the set
    /// for the next one).
    pub fn set(&self) {
        let mut signalled = self.state.lock();
        *signalled = true;
        self.cond.notify_one();
    }
}

impl Default for Signal {
    fn default() -> Signal {
        Signal::new()
    }
}
