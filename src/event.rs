use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Auto-reset waitable event.
///
/// SDK callbacks and notification sources signal it; exactly one waiter is
/// released per signal and the state resets on wakeup, mirroring the
/// auto-reset event handles the capture loops block on.
pub struct Event {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Event {
            signalled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        let mut state = self.signalled.lock();
        *state = true;
        self.cond.notify_one();
    }

    /// Blocks until signalled or the timeout elapses. Returns true when the
    /// event fired, false on timeout. Consumes the signal either way it was
    /// observed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.signalled.lock();
        if !*state {
            let deadline = std::time::Instant::now() + timeout;
            while !*state {
                if self.cond.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }
        let fired = *state;
        *state = false;
        fired
    }

    /// Clears a pending signal without waiting.
    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_wakes_a_waiter() {
        let ev = Arc::new(Event::new());
        let ev2 = ev.clone();
        let waiter = thread::spawn(move || ev2.wait_timeout(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(10));
        ev.signal();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_times_out_when_unsignalled() {
        let ev = Event::new();
        assert!(!ev.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn signal_is_consumed_by_the_wait() {
        let ev = Event::new();
        ev.signal();
        assert!(ev.wait_timeout(Duration::from_millis(1)));
        assert!(!ev.wait_timeout(Duration::from_millis(1)));
    }
}
