// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Fan-in combinators
//!
//! Each combinator shares one context between the callbacks it installs on
//! its inputs. The downstream promise sits in an `Option` behind a spinlock,
//! so whichever callback takes it first is the only one able to complete it.
//! `collect_all` and `collect` complete from the context's `Drop`, which runs
//! once the last input callback has released its reference.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, FutureError, Try};
use crate::future::{make_future, make_future_err, make_promise_contract, Future, Promise};
use crate::sync::Spinlock;

pub(crate) type PromiseSlot<T> = Spinlock<Option<Promise<T>>>;

/// Complete the promise in `slot` unless someone already did
pub(crate) fn fulfil<T: Send + 'static>(slot: &PromiseSlot<T>, result: Try<T>) {
    let promise = slot.lock().take();
    if let Some(promise) = promise {
        promise.complete(result);
    }
}

fn broken() -> Error {
    Error::new(FutureError::BrokenPromise)
}

struct CollectAllContext<T: Send + 'static> {
    results: Spinlock<Vec<Option<Try<T>>>>,
    promise: PromiseSlot<Vec<Try<T>>>,
}

impl<T: Send + 'static> Drop for CollectAllContext<T> {
    fn drop(&mut self) {
        let results = mem::replace(&mut *self.results.lock(), Vec::new());
        let results = results.into_iter().map(|r| r.unwrap_or_else(|| Err(broken()))).collect();
        fulfil(&self.promise, Ok(results));
    }
}

/// Wait for every input. The results keep the input order.
pub fn collect_all<T, I>(futures: I) -> Future<Vec<Try<T>>>
    where T: Send + 'static,
          I: IntoIterator<Item = Future<T>>
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    let (promise, future) = make_promise_contract();

    let ctx = Arc::new(CollectAllContext {
        results: Spinlock::new((0..futures.len()).map(|_| None).collect()),
        promise: Spinlock::new(Some(promise)),
    });

    for (idx, f) in futures.into_iter().enumerate() {
        let ctx = ctx.clone();
        f.set_callback(move |result| {
            ctx.results.lock()[idx] = Some(result);
        });
    }

    future
}

struct CollectContext<T: Send + 'static> {
    results: Spinlock<Vec<Option<T>>>,
    failed: AtomicBool,
    promise: PromiseSlot<Vec<T>>,
}

impl<T: Send + 'static> Drop for CollectContext<T> {
    fn drop(&mut self) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }
        let results = mem::replace(&mut *self.results.lock(), Vec::new());
        let values = results.into_iter().collect::<Option<Vec<T>>>().ok_or_else(broken);
        fulfil(&self.promise, values);
    }
}

/// Wait for every value, failing as soon as any input fails
pub fn collect<T, I>(futures: I) -> Future<Vec<T>>
    where T: Send + 'static,
          I: IntoIterator<Item = Future<T>>
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    let (promise, future) = make_promise_contract();

    let ctx = Arc::new(CollectContext {
        results: Spinlock::new((0..futures.len()).map(|_| None).collect()),
        failed: AtomicBool::new(false),
        promise: Spinlock::new(Some(promise)),
    });

    for (idx, f) in futures.into_iter().enumerate() {
        let ctx = ctx.clone();
        f.set_callback(move |result| {
            match result {
                Ok(value) => ctx.results.lock()[idx] = Some(value),
                Err(err) => {
                    if !ctx.failed.swap(true, Ordering::AcqRel) {
                        fulfil(&ctx.promise, Err(err));
                    }
                }
            }
        });
    }

    future
}

struct CollectAnyContext<T: Send + 'static> {
    done: AtomicBool,
    promise: PromiseSlot<(usize, Try<T>)>,
}

/// The first input to complete, with its index. Fails with `NotEnoughFutures` on empty input.
pub fn collect_any<T, I>(futures: I) -> Future<(usize, Try<T>)>
    where T: Send + 'static,
          I: IntoIterator<Item = Future<T>>
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    if futures.is_empty() {
        return make_future_err(FutureError::NotEnoughFutures);
    }

    let (promise, future) = make_promise_contract();
    let ctx = Arc::new(CollectAnyContext {
        done: AtomicBool::new(false),
        promise: Spinlock::new(Some(promise)),
    });

    for (idx, f) in futures.into_iter().enumerate() {
        let ctx = ctx.clone();
        f.set_callback(move |result| {
            if !ctx.done.swap(true, Ordering::AcqRel) {
                fulfil(&ctx.promise, Ok((idx, result)));
            }
        });
    }

    future
}

struct CollectAnyWithoutExceptionContext<T: Send + 'static> {
    done: AtomicBool,
    failures: AtomicUsize,
    total: usize,
    promise: PromiseSlot<(usize, T)>,
}

/// The first input to succeed, with its index.
///
/// If every input fails, the error of the last one to fail is forwarded.
pub fn collect_any_without_exception<T, I>(futures: I) -> Future<(usize, T)>
    where T: Send + 'static,
          I: IntoIterator<Item = Future<T>>
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    if futures.is_empty() {
        return make_future_err(FutureError::NotEnoughFutures);
    }

    let (promise, future) = make_promise_contract();
    let ctx = Arc::new(CollectAnyWithoutExceptionContext {
        done: AtomicBool::new(false),
        failures: AtomicUsize::new(0),
        total: futures.len(),
        promise: Spinlock::new(Some(promise)),
    });

    for (idx, f) in futures.into_iter().enumerate() {
        let ctx = ctx.clone();
        f.set_callback(move |result| {
            match result {
                Ok(value) => {
                    if !ctx.done.swap(true, Ordering::AcqRel) {
                        fulfil(&ctx.promise, Ok((idx, value)));
                    }
                }
                Err(err) => {
                    if ctx.failures.fetch_add(1, Ordering::AcqRel) + 1 == ctx.total {
                        fulfil(&ctx.promise, Err(err));
                    }
                }
            }
        });
    }

    future
}

struct CollectNContext<T: Send + 'static> {
    completed: AtomicUsize,
    n: usize,
    results: Spinlock<Vec<(usize, Try<T>)>>,
    promise: PromiseSlot<Vec<(usize, Try<T>)>>,
}

/// The first `n` inputs to complete, in completion order
pub fn collect_n<T, I>(futures: I, n: usize) -> Future<Vec<(usize, Try<T>)>>
    where T: Send + 'static,
          I: IntoIterator<Item = Future<T>>
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    if n == 0 {
        return make_future(Vec::new());
    }
    if futures.len() < n {
        return make_future_err(FutureError::NotEnoughFutures);
    }

    let (promise, future) = make_promise_contract();
    let ctx = Arc::new(CollectNContext {
        completed: AtomicUsize::new(0),
        n: n,
        results: Spinlock::new(Vec::with_capacity(n)),
        promise: Spinlock::new(Some(promise)),
    });

    for (idx, f) in futures.into_iter().enumerate() {
        let ctx = ctx.clone();
        f.set_callback(move |result| {
            if ctx.completed.fetch_add(1, Ordering::AcqRel) >= ctx.n {
                return;
            }

            let full = {
                let mut results = ctx.results.lock();
                results.push((idx, result));
                if results.len() == ctx.n {
                    Some(mem::replace(&mut *results, Vec::new()))
                } else {
                    None
                }
            };
            if let Some(results) = full {
                fulfil(&ctx.promise, Ok(results));
            }
        });
    }

    future
}

struct CollectAll2Context<A: Send + 'static, B: Send + 'static> {
    first: Spinlock<Option<Try<A>>>,
    second: Spinlock<Option<Try<B>>>,
    promise: PromiseSlot<(Try<A>, Try<B>)>,
}

impl<A: Send + 'static, B: Send + 'static> Drop for CollectAll2Context<A, B> {
    fn drop(&mut self) {
        let first = self.first.lock().take().unwrap_or_else(|| Err(broken()));
        let second = self.second.lock().take().unwrap_or_else(|| Err(broken()));
        fulfil(&self.promise, Ok((first, second)));
    }
}

/// `collect_all` over two futures of different types
pub fn collect_all2<A, B>(a: Future<A>, b: Future<B>) -> Future<(Try<A>, Try<B>)>
    where A: Send + 'static,
          B: Send + 'static
{
    let (promise, future) = make_promise_contract();
    let ctx = Arc::new(CollectAll2Context {
        first: Spinlock::new(None),
        second: Spinlock::new(None),
        promise: Spinlock::new(Some(promise)),
    });

    let c = ctx.clone();
    a.set_callback(move |result| *c.first.lock() = Some(result));
    b.set_callback(move |result| *ctx.second.lock() = Some(result));

    future
}

struct Collect2Context<A: Send + 'static, B: Send + 'static> {
    first: Spinlock<Option<A>>,
    second: Spinlock<Option<B>>,
    failed: AtomicBool,
    promise: PromiseSlot<(A, B)>,
}

impl<A: Send + 'static, B: Send + 'static> Collect2Context<A, B> {
    fn fail(&self, err: Error) {
        if !self.failed.swap(true, Ordering::AcqRel) {
            fulfil(&self.promise, Err(err));
        }
    }
}

impl<A: Send + 'static, B: Send + 'static> Drop for Collect2Context<A, B> {
    fn drop(&mut self) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }
        let first = self.first.lock().take();
        let second = self.second.lock().take();
        match (first, second) {
            (Some(a), Some(b)) => fulfil(&self.promise, Ok((a, b))),
            _ => fulfil(&self.promise, Err(broken())),
        }
    }
}

/// `collect` over two futures of different types
pub fn collect2<A, B>(a: Future<A>, b: Future<B>) -> Future<(A, B)>
    where A: Send + 'static,
          B: Send + 'static
{
    let (promise, future) = make_promise_contract();
    let ctx = Arc::new(Collect2Context {
        first: Spinlock::new(None),
        second: Spinlock::new(None),
        failed: AtomicBool::new(false),
        promise: Spinlock::new(Some(promise)),
    });

    let c = ctx.clone();
    a.set_callback(move |result| {
        match result {
            Ok(value) => *c.first.lock() = Some(value),
            Err(err) => c.fail(err),
        }
    });
    b.set_callback(move |result| {
        match result {
            Ok(value) => *ctx.second.lock() = Some(value),
            Err(err) => ctx.fail(err),
        }
    });

    future
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_collect_all_empty() {
        let f = collect_all(Vec::<Future<i32>>::new());
        assert!(f.value().unwrap().is_empty());
    }

    #[test]
    fn test_collect_all_keeps_order() {
        let mut promises: Vec<Promise<usize>> = (0..4).map(|_| Promise::new()).collect();
        let futures: Vec<_> = promises.iter_mut().map(|p| p.get_future().unwrap()).collect();
        let mut all = collect_all(futures);

        for (idx, p) in promises.iter_mut().enumerate().rev() {
            assert!(all.poll().is_none());
            p.set_value(idx * 10).unwrap();
        }

        let values: Vec<usize> = all.value().unwrap().into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_collect_any_empty() {
        let f = collect_any(Vec::<Future<i32>>::new());
        assert_eq!(f.value().unwrap_err(), FutureError::NotEnoughFutures);
    }

    #[test]
    fn test_collect_n_not_enough() {
        let f = collect_n(vec![make_future(1)], 2);
        assert_eq!(f.value().unwrap_err(), FutureError::NotEnoughFutures);
        assert!(collect_n(Vec::<Future<i32>>::new(), 0).value().unwrap().is_empty());
    }

    #[test]
    fn test_collect2_fails_fast() {
        let (_p, pending) = make_promise_contract::<i32>();
        let f = collect2(pending, make_future_err::<&str, _>(FutureError::TimedOut));
        assert_eq!(f.value().unwrap_err(), FutureError::TimedOut);
    }
}
