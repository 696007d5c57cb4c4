// The MIT License (MIT)

// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Timekeepers hand out futures that complete after a delay

use std::cmp::{Eq, Ord, Ordering, PartialOrd};
use std::collections::BinaryHeap;
use std::io;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::future::{make_future, make_promise_contract, Future, Promise};
use crate::options::Options;

/// Source of sleep futures
pub trait Timekeeper: Send + Sync {
    /// A future completing no earlier than `dur` from now
    fn after(&self, dur: Duration) -> Future<()>;

    /// A future completing no earlier than `deadline`
    fn at(&self, deadline: Instant) -> Future<()> {
        let now = Instant::now();
        if deadline <= now {
            return make_future(());
        }
        self.after(deadline - now)
    }
}

struct SleepingTask {
    promise: Promise<()>,
    expected_wakeup_time: Instant,
    seq: u64,
}

impl PartialEq for SleepingTask {
    fn eq(&self, other: &SleepingTask) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SleepingTask {}

impl PartialOrd<SleepingTask> for SleepingTask {
    fn partial_cmp(&self, other: &SleepingTask) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SleepingTask {
    // Earliest wakeup on top of the heap, ties in insertion order
    fn cmp(&self, other: &SleepingTask) -> Ordering {
        other.expected_wakeup_time
            .cmp(&self.expected_wakeup_time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    sleeping_tasks: BinaryHeap<SleepingTask>,
    // Sleeps whose deadline does not fit in an `Instant`, only broken at shutdown
    unbounded: Vec<Promise<()>>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

fn lock(shared: &TimerShared) -> MutexGuard<TimerState> {
    match shared.state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl TimerShared {
    fn run(&self) {
        let mut state = lock(self);

        loop {
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            let wait = match state.sleeping_tasks.peek() {
                Some(task) if task.expected_wakeup_time <= now => None,
                Some(task) => Some(task.expected_wakeup_time - now),
                None => Some(Duration::from_secs(3600)),
            };

            match wait {
                None => {
                    if let Some(task) = state.sleeping_tasks.pop() {
                        drop(state);
                        debug!("Timer expired after deadline {:?}", task.expected_wakeup_time);
                        task.promise.complete(Ok(()));
                        state = lock(self);
                    }
                }
                Some(dur) => {
                    state = match self.cond.wait_timeout(state, dur) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    };
                }
            }
        }

        // Whatever is still sleeping breaks its promise when dropped
        let leftover = mem::replace(&mut state.sleeping_tasks, BinaryHeap::new());
        let unbounded = mem::replace(&mut state.unbounded, Vec::new());
        drop(state);
        if !leftover.is_empty() || !unbounded.is_empty() {
            debug!("Timer shut down with {} pending sleeps", leftover.len() + unbounded.len());
        }
    }
}

/// A timekeeper backed by one dedicated thread sleeping on a deadline heap.
///
/// Dropping it stops the thread. Futures still sleeping at that point fail
/// with `BrokenPromise`.
pub struct ThreadTimekeeper {
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadTimekeeper {
    pub fn new() -> io::Result<ThreadTimekeeper> {
        let mut opts = Options::new();
        opts.name("coio-timer".to_owned());
        ThreadTimekeeper::with_options(opts)
    }

    /// Only `name` and `stack_size` are used
    pub fn with_options(opts: Options) -> io::Result<ThreadTimekeeper> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                sleeping_tasks: BinaryHeap::new(),
                unbounded: Vec::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let mut builder = thread::Builder::new().stack_size(opts.stack_size);
        if let Some(name) = opts.name {
            builder = builder.name(name);
        }

        let s = shared.clone();
        let thread = builder.spawn(move || s.run())?;

        Ok(ThreadTimekeeper {
            shared: shared,
            thread: Some(thread),
        })
    }

    /// Number of sleeps not yet expired
    pub fn pending(&self) -> usize {
        let state = lock(&self.shared);
        state.sleeping_tasks.len() + state.unbounded.len()
    }
}

impl Timekeeper for ThreadTimekeeper {
    fn after(&self, dur: Duration) -> Future<()> {
        if dur == Duration::from_secs(0) {
            return make_future(());
        }

        let (promise, future) = make_promise_contract();
        let wakeup = Instant::now().checked_add(dur);
        {
            let mut state = lock(&self.shared);
            if state.shutdown {
                return future;
            }
            let wakeup = match wakeup {
                Some(wakeup) => wakeup,
                None => {
                    state.unbounded.push(promise);
                    return future;
                }
            };
            let seq = state.next_seq;
            state.next_seq += 1;
            state.sleeping_tasks.push(SleepingTask {
                promise: promise,
                expected_wakeup_time: wakeup,
                seq: seq,
            });
        }
        self.shared.cond.notify_one();

        future
    }
}

impl Drop for ThreadTimekeeper {
    fn drop(&mut self) {
        lock(&self.shared).shutdown = true;
        self.shared.cond.notify_all();

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                error!("Timer thread panicked");
            }
        }
    }
}

static GLOBAL_TIMEKEEPER: OnceLock<Option<Arc<ThreadTimekeeper>>> = OnceLock::new();

/// The process-wide timekeeper, started on first use.
///
/// Returns `None` if its thread could not be spawned.
pub fn global() -> Option<Arc<ThreadTimekeeper>> {
    let tk = GLOBAL_TIMEKEEPER.get_or_init(|| {
        match ThreadTimekeeper::new() {
            Ok(tk) => Some(Arc::new(tk)),
            Err(err) => {
                error!("Failed to start the global timer thread: {}", err);
                None
            }
        }
    });
    tk.clone()
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::error::FutureError;

    #[test]
    fn test_after_waits_at_least() {
        let tk = ThreadTimekeeper::new().unwrap();
        let start = Instant::now();
        tk.after(Duration::from_millis(20)).get().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_zero_duration_is_ready() {
        let tk = ThreadTimekeeper::new().unwrap();
        assert!(tk.after(Duration::from_secs(0)).is_ready());
        assert!(tk.at(Instant::now()).is_ready());
    }

    #[test]
    fn test_deadlines_fire_in_order() {
        let tk = ThreadTimekeeper::new().unwrap();
        let late = tk.after(Duration::from_millis(200));
        let early = tk.after(Duration::from_millis(10));

        early.get().unwrap();
        assert!(!late.is_ready());
        late.get().unwrap();
        assert_eq!(tk.pending(), 0);
    }

    #[test]
    fn test_drop_breaks_pending_sleeps() {
        let tk = ThreadTimekeeper::new().unwrap();
        let f = tk.after(Duration::from_secs(60));
        drop(tk);
        assert_eq!(f.get().unwrap_err(), FutureError::BrokenPromise);
    }

    #[test]
    fn test_unbounded_sleep_never_fires() {
        let tk = ThreadTimekeeper::new().unwrap();
        let f = tk.after(Duration::from_secs(u64::MAX));
        assert!(!f.is_ready());
        assert_eq!(tk.pending(), 1);

        drop(tk);
        assert_eq!(f.get().unwrap_err(), FutureError::BrokenPromise);
    }

    #[test]
    fn test_global_is_shared() {
        let a = global().unwrap();
        let b = global().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
