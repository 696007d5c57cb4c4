// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! One-shot event a single thread can block on until another thread signals it

use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Empty,
    Ready,
    Waiting,
}

pub struct MonoBarrier {
    lock: Mutex<State>,
    cond: Condvar,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MonoBarrierError {
    Occupied,
    PoisonError,
}

impl MonoBarrier {
    /// Create a new `MonoBarrier`
    pub fn new() -> MonoBarrier {
        MonoBarrier {
            lock: Mutex::new(State::Empty),
            cond: Condvar::new(),
        }
    }

    /// Try to wait the `MonoBarrier`, fail if someone is already waiting
    pub fn wait(&self) -> Result<(), MonoBarrierError> {
        let mut guard = self.lock.lock().map_err(|_| MonoBarrierError::PoisonError)?;

        loop {
            match *guard {
                State::Ready => return Ok(()),
                State::Empty => {
                    *guard = State::Waiting;
                    guard = self.cond.wait(guard).map_err(|_| MonoBarrierError::PoisonError)?;
                }
                State::Waiting => {
                    // Spurious wakeup of the thread that registered itself
                    guard = self.cond.wait(guard).map_err(|_| MonoBarrierError::PoisonError)?;
                }
            }
        }
    }

    /// Wait for at most `dur`. Returns `Ok(true)` if the barrier was notified in time.
    ///
    /// A `dur` too large to be represented as a deadline waits without a timeout.
    pub fn wait_timeout(&self, dur: Duration) -> Result<bool, MonoBarrierError> {
        let deadline = match Instant::now().checked_add(dur) {
            Some(deadline) => deadline,
            None => return self.wait().map(|_| true),
        };
        let mut guard = self.lock.lock().map_err(|_| MonoBarrierError::PoisonError)?;

        if *guard == State::Empty {
            *guard = State::Waiting;
        } else if *guard == State::Waiting {
            return Err(MonoBarrierError::Occupied);
        }

        while *guard != State::Ready {
            let now = Instant::now();
            if now >= deadline {
                *guard = State::Empty;
                return Ok(false);
            }

            guard = match self.cond.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return Err(MonoBarrierError::PoisonError),
            };
        }

        Ok(true)
    }

    /// Wake up the waiting thread, or mark the barrier so the next `wait` returns at once
    pub fn notify(&self) {
        let mut guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let waiting = *guard == State::Waiting;
        *guard = State::Ready;

        if waiting {
            self.cond.notify_one();
        }
    }

    pub fn is_ready(&self) -> bool {
        match self.lock.lock() {
            Ok(guard) => *guard == State::Ready,
            Err(poisoned) => *poisoned.into_inner() == State::Ready,
        }
    }
}

impl Default for MonoBarrier {
    fn default() -> MonoBarrier {
        MonoBarrier::new()
    }
}

impl fmt::Debug for MonoBarrier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.lock.try_lock() {
            Ok(guard) => write!(f, "MonoBarrier({:?})", *guard),
            Err(_) => write!(f, "MonoBarrier(<locked>)"),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_mono_barrier_thread_notify() {
        let barrier = Arc::new(MonoBarrier::new());
        let state = Arc::new(AtomicUsize::new(0));

        let h = {
            let barrier = barrier.clone();
            let state = state.clone();

            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                state.store(1, Ordering::SeqCst);
                barrier.notify();
            })
        };

        barrier.wait().unwrap();
        assert_eq!(state.load(Ordering::SeqCst), 1);

        h.join().unwrap();
    }

    #[test]
    fn test_mono_barrier_notify_before_wait() {
        let barrier = MonoBarrier::new();
        barrier.notify();
        barrier.notify();

        assert!(barrier.is_ready());
        assert_eq!(barrier.wait(), Ok(()));
    }

    #[test]
    fn test_mono_barrier_wait_timeout() {
        let barrier = Arc::new(MonoBarrier::new());
        assert_eq!(barrier.wait_timeout(Duration::from_millis(10)), Ok(false));

        let h = {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.notify())
        };

        assert_eq!(barrier.wait_timeout(Duration::from_secs(5)), Ok(true));
        h.join().unwrap();
    }

    #[test]
    fn test_mono_barrier_wait_unbounded_timeout() {
        let barrier = Arc::new(MonoBarrier::new());

        let h = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                barrier.notify();
            })
        };

        assert_eq!(barrier.wait_timeout(Duration::from_secs(u64::MAX)), Ok(true));
        h.join().unwrap();
    }
}
