// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The state shared between one `Promise` and one `Future`
//!
//! A `Core` moves through a small state machine:
//!
//! ```text
//!            set_result              set_callback
//!   Start ---------------> OnlyResult ------------+
//!     |                                           v
//!     +------------------> OnlyCallback -------> Done
//!          set_callback               set_result
//! ```
//!
//! Whoever performs the second transition into `Done` dispatches the callback,
//! so it runs exactly once no matter which side arrives last. All transitions
//! happen under a spinlock and the callback always runs after it is released.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, FutureError, Try};
use crate::executor::{Executor, Job, MID_PRI};
use crate::sync::Spinlock;

pub type Callback<T> = Box<dyn FnOnce(Try<T>) + Send + 'static>;

/// Receives `Future::raise` signals on the producer side
pub type InterruptHandler = Arc<dyn Fn(&Error) + Send + Sync + 'static>;

enum State<T> {
    Start,
    OnlyResult(Try<T>),
    OnlyCallback(Callback<T>),
    Done,
}

impl<T> State<T> {
    fn name(&self) -> &'static str {
        match *self {
            State::Start => "Start",
            State::OnlyResult(..) => "OnlyResult",
            State::OnlyCallback(..) => "OnlyCallback",
            State::Done => "Done",
        }
    }
}

struct Inner<T> {
    state: State<T>,
    executor: Option<Arc<dyn Executor>>,
    priority: i8,
}

struct Interrupt {
    handler: Option<InterruptHandler>,
    raised: Option<Error>,
}

pub struct Core<T: Send + 'static> {
    inner: Spinlock<Inner<T>>,
    interrupt: Spinlock<Interrupt>,
    future_detached: AtomicBool,
    promise_detached: AtomicBool,
}

impl<T: Send + 'static> Core<T> {
    /// A core waiting for both its result and its callback
    pub fn new() -> Arc<Core<T>> {
        Arc::new(Core::with_state(State::Start, false))
    }

    /// A core that is already fulfilled and has no promise attached
    pub fn with_result(result: Try<T>) -> Arc<Core<T>> {
        Arc::new(Core::with_state(State::OnlyResult(result), true))
    }

    fn with_state(state: State<T>, promise_detached: bool) -> Core<T> {
        Core {
            inner: Spinlock::new(Inner {
                state: state,
                executor: None,
                priority: MID_PRI,
            }),
            interrupt: Spinlock::new(Interrupt {
                handler: None,
                raised: None,
            }),
            future_detached: AtomicBool::new(false),
            promise_detached: AtomicBool::new(promise_detached),
        }
    }

    pub fn has_result(&self) -> bool {
        match self.inner.lock().state {
            State::OnlyResult(..) | State::Done => true,
            _ => false,
        }
    }

    pub fn has_callback(&self) -> bool {
        match self.inner.lock().state {
            State::OnlyCallback(..) | State::Done => true,
            _ => false,
        }
    }

    /// Whether a result is stored and can still be taken by the future side
    pub fn is_ready(&self) -> bool {
        match self.inner.lock().state {
            State::OnlyResult(..) => true,
            _ => false,
        }
    }

    /// Inspect the stored result without taking it
    pub fn with_result_ref<R, F: FnOnce(&Try<T>) -> R>(&self, f: F) -> Option<R> {
        match self.inner.lock().state {
            State::OnlyResult(ref result) => Some(f(result)),
            _ => None,
        }
    }

    /// Install the continuation. Runs it right away if the result is already there.
    pub fn set_callback(&self, callback: Callback<T>) {
        let mut inner = self.inner.lock();

        match mem::replace(&mut inner.state, State::Done) {
            State::Start => {
                inner.state = State::OnlyCallback(callback);
            }
            State::OnlyResult(result) => {
                let executor = inner.executor.take();
                let priority = inner.priority;
                drop(inner);
                Core::dispatch(callback, result, executor, priority);
            }
            other => {
                let name = other.name();
                inner.state = other;
                drop(inner);
                panic!("Core::set_callback called in state {}", name);
            }
        }
    }

    /// Store the result. Runs the continuation if one is already installed.
    pub fn set_result(&self, result: Try<T>) -> Result<(), FutureError> {
        let mut inner = self.inner.lock();

        match mem::replace(&mut inner.state, State::Done) {
            State::Start => {
                inner.state = State::OnlyResult(result);
                Ok(())
            }
            State::OnlyCallback(callback) => {
                let executor = inner.executor.take();
                let priority = inner.priority;
                drop(inner);
                Core::dispatch(callback, result, executor, priority);
                Ok(())
            }
            other => {
                inner.state = other;
                Err(FutureError::PromiseAlreadySatisfied)
            }
        }
    }

    /// Move the stored result out to the future side
    pub fn take_result(&self) -> Option<Try<T>> {
        let mut inner = self.inner.lock();

        match mem::replace(&mut inner.state, State::Done) {
            State::OnlyResult(result) => Some(result),
            other => {
                inner.state = other;
                None
            }
        }
    }

    fn dispatch(callback: Callback<T>, result: Try<T>, executor: Option<Arc<dyn Executor>>, priority: i8) {
        match executor {
            None => callback(result),
            Some(executor) => {
                trace!("Dispatching continuation to executor with priority {}", priority);
                let job: Job = Box::new(move || callback(result));
                if executor.num_priorities() == 1 {
                    executor.add(job);
                } else {
                    executor.add_with_priority(job, priority);
                }
            }
        }
    }

    pub fn set_executor(&self, executor: Option<Arc<dyn Executor>>, priority: i8) {
        let mut inner = self.inner.lock();
        inner.executor = executor;
        inner.priority = priority;
    }

    pub fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.inner.lock().executor.clone()
    }

    pub fn priority(&self) -> i8 {
        self.inner.lock().priority
    }

    /// Deliver a cooperative interrupt to the producer.
    ///
    /// Only the first interrupt is kept, and nothing happens once the core has a result.
    pub fn raise(&self, err: Error) {
        let mut interrupt = self.interrupt.lock();

        if interrupt.raised.is_some() || self.has_result() {
            return;
        }

        interrupt.raised = Some(err.clone());
        let handler = interrupt.handler.clone();
        drop(interrupt);

        if let Some(handler) = handler {
            handler(&err);
        }
    }

    /// Register the producer's interrupt handler. An interrupt raised earlier is replayed at once.
    pub fn set_interrupt_handler(&self, handler: InterruptHandler) {
        let mut interrupt = self.interrupt.lock();

        if self.has_result() {
            return;
        }

        match interrupt.raised.clone() {
            Some(err) => {
                drop(interrupt);
                handler(&err);
            }
            None => interrupt.handler = Some(handler),
        }
    }

    /// Copy a handler from an upstream core without replaying anything
    pub fn inherit_interrupt_handler(&self, handler: Option<InterruptHandler>) {
        self.interrupt.lock().handler = handler;
    }

    pub fn interrupt_handler(&self) -> Option<InterruptHandler> {
        self.interrupt.lock().handler.clone()
    }

    pub fn detach_future(&self) {
        self.future_detached.store(true, Ordering::Release);
    }

    /// The producer is gone. A core still lacking a result is broken.
    pub fn detach_promise(&self) {
        if !self.has_result() {
            debug!("Promise dropped before it was fulfilled");
            let _ = self.set_result(Err(Error::new(FutureError::BrokenPromise)));
        }
        self.promise_detached.store(true, Ordering::Release);
    }

    pub fn is_future_detached(&self) -> bool {
        self.future_detached.load(Ordering::Acquire)
    }

    pub fn is_promise_detached(&self) -> bool {
        self.promise_detached.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> fmt::Debug for Core<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.try_lock() {
            Some(inner) => write!(f, "Core({})", inner.state.name()),
            None => write!(f, "Core(<locked>)"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    use crate::executor::ManualExecutor;

    fn counting_callback(counter: &Arc<AtomicUsize>, expected: i32) -> Callback<i32> {
        let counter = counter.clone();
        Box::new(move |t: Try<i32>| {
            assert_eq!(t.unwrap(), expected);
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_result_then_callback() {
        let counter = Arc::new(AtomicUsize::new(0));
        let core = Core::new();

        core.set_result(Ok(1)).unwrap();
        assert!(core.is_ready());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        core.set_callback(counting_callback(&counter, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!core.is_ready());
        assert!(core.has_result());
    }

    #[test]
    fn test_callback_then_result() {
        let counter = Arc::new(AtomicUsize::new(0));
        let core = Core::new();

        core.set_callback(counting_callback(&counter, 2));
        assert!(core.has_callback());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        core.set_result(Ok(2)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_assignment() {
        let core = Core::new();
        core.set_result(Ok(1)).unwrap();
        assert_eq!(core.set_result(Ok(2)), Err(FutureError::PromiseAlreadySatisfied));
        assert_eq!(core.take_result().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_racing_handoff_runs_once() {
        for _ in 0..200 {
            let counter = Arc::new(AtomicUsize::new(0));
            let core = Core::new();
            let barrier = Arc::new(Barrier::new(2));

            let producer = {
                let core = core.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    core.set_result(Ok(7)).unwrap();
                })
            };

            barrier.wait();
            core.set_callback(counting_callback(&counter, 7));
            producer.join().unwrap();

            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_dispatch_on_executor() {
        let counter = Arc::new(AtomicUsize::new(0));
        let executor = Arc::new(ManualExecutor::new());
        let core = Core::new();

        core.set_executor(Some(executor.clone() as Arc<dyn Executor>), MID_PRI);
        core.set_callback(counting_callback(&counter, 3));
        core.set_result(Ok(3)).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(executor.run(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_promise_breaks_core() {
        let core: Arc<Core<i32>> = Core::new();
        let seen = Arc::new(Spinlock::new(None));

        let s = seen.clone();
        core.set_callback(Box::new(move |t| *s.lock() = Some(t)));
        core.detach_promise();

        assert!(core.is_promise_detached());
        let err = seen.lock().take().unwrap().unwrap_err();
        assert_eq!(err, FutureError::BrokenPromise);
    }

    #[test]
    fn test_interrupt_replayed_to_late_handler() {
        let core: Arc<Core<i32>> = Core::new();
        let hits = Arc::new(AtomicUsize::new(0));

        core.raise(Error::msg("stop"));
        core.raise(Error::msg("ignored"));

        let h = hits.clone();
        core.set_interrupt_handler(Arc::new(move |err: &Error| {
            assert_eq!(err.to_string(), "stop");
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interrupt_ignored_after_result() {
        let core: Arc<Core<i32>> = Core::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        core.set_interrupt_handler(Arc::new(move |_: &Error| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        core.set_result(Ok(1)).unwrap();
        core.raise(Error::msg("late"));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
