// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The consumer side of a future and its continuation methods

use std::error::Error as StdError;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{catch, Error, FutureError, Try};
use crate::executor::{DrivableExecutor, Executor, MID_PRI};
use crate::future::collect::collect_all2;
use crate::future::core::{Core, InterruptHandler};
use crate::future::{make_promise_contract, IntoNext, Next, Promise};
use crate::sync::MonoBarrier;

/// Read side of a one-shot value.
///
/// Every continuation method consumes the receiver and hands back a new
/// `Future` for the continuation's result. Dropping a `Future` only detaches
/// it; the producer is not told.
pub struct Future<T: Send + 'static> {
    core: Option<Arc<Core<T>>>,
}

impl<T: Send + 'static> Future<T> {
    pub(crate) fn from_core(core: Arc<Core<T>>) -> Future<T> {
        Future { core: Some(core) }
    }

    pub(crate) fn from_try(result: Try<T>) -> Future<T> {
        Future::from_core(Core::with_result(result))
    }

    pub(crate) fn from_error(err: FutureError) -> Future<T> {
        Future::from_try(Err(Error::new(err)))
    }

    /// A future without a core
    pub fn make_empty() -> Future<T> {
        Future { core: None }
    }

    pub fn valid(&self) -> bool {
        self.core.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.core.as_ref().map_or(false, |core| core.is_ready())
    }

    pub fn has_value(&self) -> bool {
        self.core
            .as_ref()
            .and_then(|core| core.with_result_ref(|result| result.is_ok()))
            .unwrap_or(false)
    }

    pub fn has_exception(&self) -> bool {
        self.core
            .as_ref()
            .and_then(|core| core.with_result_ref(|result| result.is_err()))
            .unwrap_or(false)
    }

    /// Take the result without blocking.
    ///
    /// Fails with `FutureNotReady` if nothing has been produced yet, or `NoState`
    /// on an empty handle.
    pub fn value(mut self) -> Try<T> {
        let core = self.core.take().ok_or(FutureError::NoState)?;
        core.detach_future();

        match core.take_result() {
            Some(result) => result,
            None => Err(Error::new(FutureError::FutureNotReady)),
        }
    }

    /// Take the result if there is one.
    ///
    /// The handle stays usable while nothing is ready and becomes empty once
    /// the result has been handed out.
    pub fn poll(&mut self) -> Option<Try<T>> {
        let result = match self.core {
            None => return Some(Err(Error::new(FutureError::NoState))),
            Some(ref core) => core.take_result(),
        };

        if result.is_some() {
            if let Some(core) = self.core.take() {
                core.detach_future();
            }
        }
        result
    }

    /// Signal the producer's interrupt handler. Never completes the future by itself.
    pub fn raise<E: Into<Error>>(&self, err: E) {
        if let Some(ref core) = self.core {
            core.raise(err.into());
        }
    }

    /// Ask the producer to give up, raising `FutureCancellation`
    pub fn cancel(&self) {
        self.raise(FutureError::FutureCancellation);
    }

    /// The executor the next continuation will be dispatched to
    pub fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.core.as_ref().and_then(|core| core.executor())
    }

    pub fn via(self, executor: Arc<dyn Executor>) -> Future<T> {
        self.via_with_priority(executor, MID_PRI)
    }

    /// Run the next continuation on `executor`
    pub fn via_with_priority(self, executor: Arc<dyn Executor>, priority: i8) -> Future<T> {
        if let Some(ref core) = self.core {
            core.set_executor(Some(executor), priority);
        }
        self
    }

    /// Move the result into a fresh future bound to `executor`.
    ///
    /// The receiver's own executor is left alone; the receiver is emptied.
    pub fn via_ref(&mut self, executor: Arc<dyn Executor>, priority: i8) -> Future<T> {
        let this = mem::replace(self, Future::make_empty());
        if !this.valid() {
            return Future::from_error(FutureError::NoState);
        }

        let (promise, future) = make_promise_contract();
        this.forward_to(promise);
        future.via_with_priority(executor, priority)
    }

    pub(crate) fn set_executor(&self, executor: Option<Arc<dyn Executor>>, priority: i8) {
        if let Some(ref core) = self.core {
            core.set_executor(executor, priority);
        }
    }

    pub(crate) fn set_callback<F>(mut self, f: F)
        where F: FnOnce(Try<T>) + Send + 'static
    {
        match self.core.take() {
            Some(core) => {
                core.set_callback(Box::new(f));
                core.detach_future();
            }
            None => f(Err(Error::new(FutureError::NoState))),
        }
    }

    pub(crate) fn forward_to(self, promise: Promise<T>) {
        self.set_callback(move |result| promise.complete(result));
    }

    fn then_impl<U, F>(self, f: F) -> Future<U>
        where U: Send + 'static,
              F: FnOnce(Try<T>) -> Next<U> + Send + 'static
    {
        let core = match self.core {
            Some(ref core) => core.clone(),
            None => return Future::from_error(FutureError::NoState),
        };

        let (promise, future) = make_promise_contract::<U>();
        if let Some(ref next) = future.core {
            next.inherit_interrupt_handler(core.interrupt_handler().map(|handler| {
                // Stays quiet once the upstream result exists, even if this continuation is still queued
                let upstream = Arc::downgrade(&core);
                Arc::new(move |err: &Error| {
                    if upstream.upgrade().map_or(false, |up| !up.has_result()) {
                        handler(err);
                    }
                }) as InterruptHandler
            }));
            next.set_executor(core.executor(), core.priority());
        }
        drop(core);

        self.set_callback(move |result| {
            match catch(move || f(result)) {
                Ok(Next::Value(result)) => promise.complete(result),
                Ok(Next::Chain(inner)) => inner.forward_to(promise),
                Err(err) => promise.complete(Err(err)),
            }
        });

        future
    }

    /// Continue with the whole `Try`, success or failure
    pub fn then_try<R, F>(self, f: F) -> Future<R::Output>
        where F: FnOnce(Try<T>) -> R + Send + 'static,
              R: IntoNext
    {
        self.then_impl(move |result| f(result).into_next())
    }

    /// Continue with the value. Errors skip `f` and are forwarded unchanged.
    pub fn then<R, F>(self, f: F) -> Future<R::Output>
        where F: FnOnce(T) -> R + Send + 'static,
              R: IntoNext
    {
        self.then_impl(move |result| {
            match result {
                Ok(value) => f(value).into_next(),
                Err(err) => Next::Value(Err(err)),
            }
        })
    }

    /// Run only `f` on `executor`. Later continuations go back to the receiver's executor.
    pub fn then_via<R, F>(self, executor: Arc<dyn Executor>, f: F) -> Future<R::Output>
        where F: FnOnce(T) -> R + Send + 'static,
              R: IntoNext
    {
        let (previous, priority) = match self.core {
            Some(ref core) => (core.executor(), core.priority()),
            None => (None, MID_PRI),
        };

        let next = self.via(executor).then(f);
        if let Some(ref core) = next.core {
            core.set_executor(previous, priority);
        }
        next
    }

    pub fn map<U, F>(self, f: F) -> Future<U>
        where F: FnOnce(T) -> U + Send + 'static,
              U: Send + 'static
    {
        self.then_impl(move |result| Next::Value(result.map(f)))
    }

    /// Recover from any error. Values pass through untouched.
    pub fn on_error<R, F>(self, f: F) -> Future<T>
        where F: FnOnce(Error) -> R + Send + 'static,
              R: IntoNext<Output = T>
    {
        self.then_impl(move |result| {
            match result {
                Ok(value) => Next::Value(Ok(value)),
                Err(err) => f(err).into_next(),
            }
        })
    }

    /// Recover from errors of type `E` only. Other errors pass through.
    pub fn then_error<E, R, F>(self, f: F) -> Future<T>
        where E: StdError + 'static,
              F: FnOnce(&E) -> R + Send + 'static,
              R: IntoNext<Output = T>
    {
        self.then_impl(move |result| {
            match result {
                Ok(value) => Next::Value(Ok(value)),
                Err(err) => {
                    match err.downcast_ref::<E>().map(f) {
                        Some(recovered) => recovered.into_next(),
                        None => Next::Value(Err(err)),
                    }
                }
            }
        })
    }

    /// Run `f` after completion whatever the outcome, keeping the original result
    pub fn ensure<F>(self, f: F) -> Future<T>
        where F: FnOnce() + Send + 'static
    {
        self.then_impl(move |result| {
            f();
            Next::Value(result)
        })
    }

    /// Fail with `PredicateDoesNotObtain` unless `predicate` holds for the value
    pub fn filter<F>(self, predicate: F) -> Future<T>
        where F: FnOnce(&T) -> bool + Send + 'static
    {
        self.then(move |value| {
            if predicate(&value) {
                Ok(value)
            } else {
                Err(Error::new(FutureError::PredicateDoesNotObtain))
            }
        })
    }

    pub fn unit(self) -> Future<()> {
        self.map(|_| ())
    }

    /// Whether both futures succeed with equal values
    pub fn will_equal(self, other: Future<T>) -> Future<bool>
        where T: PartialEq
    {
        collect_all2(self, other).map(|(a, b)| {
            match (a, b) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
        })
    }

    /// Block the calling thread until the result is ready
    pub fn wait(self) -> Future<T> {
        self.wait_impl(None)
    }

    /// Block at most `dur`. The returned future is not ready if time ran out.
    pub fn wait_timeout(self, dur: Duration) -> Future<T> {
        self.wait_impl(Some(dur))
    }

    fn wait_impl(self, dur: Option<Duration>) -> Future<T> {
        let core = match self.core {
            Some(ref core) => core.clone(),
            None => return self,
        };
        if core.is_ready() {
            return self;
        }

        // The waiter must be woken even if nobody drives the executor
        core.set_executor(None, MID_PRI);
        drop(core);

        let baton = Arc::new(MonoBarrier::new());
        let (promise, future) = make_promise_contract();

        let notifier = baton.clone();
        self.set_callback(move |result| {
            promise.complete(result);
            notifier.notify();
        });

        let waited = match dur {
            None => baton.wait().map(|_| true),
            Some(dur) => baton.wait_timeout(dur),
        };
        match waited {
            Ok(true) => {}
            Ok(false) => debug!("Future not ready after waiting {:?}", dur),
            Err(err) => warn!("Failed to wait on future: {:?}", err),
        }

        future
    }

    /// Block until ready and take the result
    pub fn get(self) -> Try<T> {
        self.wait().value()
    }

    /// Like `get`, failing with `TimedOut` if nothing arrives within `dur`
    pub fn get_timeout(self, dur: Duration) -> Try<T> {
        if !self.valid() {
            return Err(Error::new(FutureError::NoState));
        }

        let future = self.wait_timeout(dur);
        if future.is_ready() {
            future.value()
        } else {
            Err(Error::new(FutureError::TimedOut))
        }
    }

    /// Drive `executor` on the calling thread until the result is ready
    pub fn wait_via<E>(self, executor: &Arc<E>) -> Future<T>
        where E: DrivableExecutor + 'static
    {
        if !self.valid() {
            return self;
        }

        let future = self.via(executor.clone()).then_try(|result| result);
        while !future.is_ready() {
            executor.drive();
        }
        future
    }

    /// Like `wait_via`, giving up after `dur`
    pub fn wait_via_timeout<E>(self, executor: &Arc<E>, dur: Duration) -> Future<T>
        where E: DrivableExecutor + 'static
    {
        if !self.valid() {
            return self;
        }

        let deadline = match Instant::now().checked_add(dur) {
            Some(deadline) => deadline,
            None => return self.wait_via(executor),
        };
        let future = self.via(executor.clone()).then_try(|result| result);
        while !future.is_ready() {
            if !executor.try_drive_until(deadline) && Instant::now() >= deadline {
                break;
            }
        }
        future
    }

    pub fn get_via<E>(self, executor: &Arc<E>) -> Try<T>
        where E: DrivableExecutor + 'static
    {
        self.wait_via(executor).value()
    }
}

impl<T: Send + 'static> Drop for Future<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            core.detach_future();
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Future").field("core", &self.core).finish()
    }
}
