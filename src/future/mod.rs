// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Promises, futures and the combinators built on them

use std::sync::Arc;

use crate::error::{catch, Error, Try};
use crate::executor::Executor;

pub use self::collect::{collect, collect2, collect_all, collect_all2, collect_any, collect_any_without_exception,
                        collect_n};
pub use self::core::InterruptHandler;
pub use self::flow::{map_all, times, when, while_do};
pub use self::future::Future;
pub use self::promise::Promise;
pub use self::reduce::{reduce, reduce_try, unordered_reduce, unordered_reduce_try, window, window_times, window_via};
pub use self::retry::{retrying, retrying_policy_basic, retrying_policy_capped_jittered_exponential_backoff,
                      RetryPolicy};
pub use self::timeout::sleep;

mod collect;
mod core;
mod flow;
mod future;
mod promise;
mod reduce;
mod retry;
mod timeout;

/// What a continuation hands back: a finished `Try`, or another future to wait for
pub enum Next<U: Send + 'static> {
    Value(Try<U>),
    Chain(Future<U>),
}

/// Anything a continuation may return
pub trait IntoNext {
    type Output: Send + 'static;

    fn into_next(self) -> Next<Self::Output>;
}

impl<U: Send + 'static> IntoNext for Next<U> {
    type Output = U;

    fn into_next(self) -> Next<U> {
        self
    }
}

impl<U: Send + 'static> IntoNext for Result<U, Error> {
    type Output = U;

    fn into_next(self) -> Next<U> {
        Next::Value(self)
    }
}

impl<U: Send + 'static> IntoNext for Future<U> {
    type Output = U;

    fn into_next(self) -> Next<U> {
        Next::Chain(self)
    }
}

impl IntoNext for () {
    type Output = ();

    fn into_next(self) -> Next<()> {
        Next::Value(Ok(()))
    }
}

/// A connected promise and future
pub fn make_promise_contract<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let mut promise = Promise::new();
    let future = promise.get_future().unwrap_or_else(|_| Future::make_empty());
    (promise, future)
}

/// A future that already holds `value`
pub fn make_future<T: Send + 'static>(value: T) -> Future<T> {
    Future::from_try(Ok(value))
}

pub fn make_future_try<T: Send + 'static>(result: Try<T>) -> Future<T> {
    Future::from_try(result)
}

pub fn make_future_err<T, E>(err: E) -> Future<T>
    where T: Send + 'static,
          E: Into<Error>
{
    Future::from_try(Err(err.into()))
}

/// Run `f` now and wrap whatever it produces. A panic becomes the error.
pub fn make_future_with<R, F>(f: F) -> Future<R::Output>
    where F: FnOnce() -> R,
          R: IntoNext
{
    match catch(f) {
        Ok(r) => {
            match r.into_next() {
                Next::Value(result) => Future::from_try(result),
                Next::Chain(future) => future,
            }
        }
        Err(err) => Future::from_try(Err(err)),
    }
}

/// Run `f` on `executor`, returning a future of its outcome
pub fn via<R, F>(executor: Arc<dyn Executor>, f: F) -> Future<R::Output>
    where F: FnOnce() -> R + Send + 'static,
          R: IntoNext
{
    make_future(()).via(executor).then(move |()| f())
}
