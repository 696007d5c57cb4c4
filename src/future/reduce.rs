// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Folds over many futures and bounded-concurrency pipelines

use std::cmp;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{catch, Try};
use crate::executor::{Executor, QueuedImmediateExecutor, MID_PRI};
use crate::future::collect::{collect_all2, fulfil, PromiseSlot};
use crate::future::{make_future, make_future_with, make_promise_contract, Future, IntoNext, Next};
use crate::sync::Spinlock;

fn call<F, A, B, R>(func: &Spinlock<F>, a: A, b: B) -> R
    where F: FnMut(A, B) -> R
{
    let mut func = func.lock();
    (&mut *func)(a, b)
}

/// Fold the inputs in index order, seeing each input's full `Try`.
///
/// Step `i` starts only after step `i - 1` finished. A failed accumulator
/// skips every later step. Steps are bounced through a
/// `QueuedImmediateExecutor`, so a long fold whose head completes last runs
/// in a loop rather than one nested call per input.
pub fn reduce_try<T, U, I, F, R>(futures: I, initial: U, func: F) -> Future<U>
    where T: Send + 'static,
          U: Send + 'static,
          I: IntoIterator<Item = Future<T>>,
          F: FnMut(U, Try<T>) -> R + Send + 'static,
          R: IntoNext<Output = U>
{
    let mut futures = futures.into_iter();
    let first = match futures.next() {
        Some(first) => first,
        None => return make_future(initial),
    };

    let func = Arc::new(Spinlock::new(func));
    let queued: Arc<dyn Executor> = Arc::new(QueuedImmediateExecutor);

    let executor = first.executor();
    let f = func.clone();
    let mut acc = first.then_try(move |head| call(&*f, initial, head));

    let mut steps = 0;
    for next in futures {
        steps += 1;
        let f = func.clone();
        acc = collect_all2(acc, next).via(queued.clone()).then(move |(acc, item)| {
            match acc {
                Ok(acc) => call(&*f, acc, item).into_next(),
                Err(err) => Next::Value(Err(err)),
            }
        });
    }

    if steps > 0 {
        acc.set_executor(executor, MID_PRI);
    }
    acc
}

/// Fold the input values in index order. The first failure ends the fold with that error.
pub fn reduce<T, U, I, F, R>(futures: I, initial: U, mut func: F) -> Future<U>
    where T: Send + 'static,
          U: Send + 'static,
          I: IntoIterator<Item = Future<T>>,
          F: FnMut(U, T) -> R + Send + 'static,
          R: IntoNext<Output = U>
{
    reduce_try(futures, initial, move |acc, item| {
        match item {
            Ok(value) => func(acc, value).into_next(),
            Err(err) => Next::Value(Err(err)),
        }
    })
}

impl<T: Send + 'static> Future<Vec<T>> {
    /// Fold an already collected vector
    pub fn reduce<U, F>(self, initial: U, func: F) -> Future<U>
        where U: Send + 'static,
              F: FnMut(U, T) -> U + Send + 'static
    {
        self.map(move |values| values.into_iter().fold(initial, func))
    }
}

struct UnorderedReduceContext<U: Send + 'static, F> {
    // the future of the latest fold step, and how many inputs have chained onto it
    memo: Spinlock<(Future<U>, usize)>,
    func: Spinlock<F>,
    total: usize,
    promise: PromiseSlot<U>,
}

/// Fold the inputs in completion order, seeing each input's full `Try`
pub fn unordered_reduce_try<T, U, I, F, R>(futures: I, initial: U, func: F) -> Future<U>
    where T: Send + 'static,
          U: Send + 'static,
          I: IntoIterator<Item = Future<T>>,
          F: FnMut(U, Try<T>) -> R + Send + 'static,
          R: IntoNext<Output = U>
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    if futures.is_empty() {
        return make_future(initial);
    }

    let (promise, future) = make_promise_contract();
    let queued: Arc<dyn Executor> = Arc::new(QueuedImmediateExecutor);
    let ctx = Arc::new(UnorderedReduceContext {
        memo: Spinlock::new((make_future(initial), 0)),
        func: Spinlock::new(func),
        total: futures.len(),
        promise: Spinlock::new(Some(promise)),
    });

    for f in futures {
        let ctx = ctx.clone();
        let queued = queued.clone();
        f.set_callback(move |item| {
            let (step, next) = make_promise_contract();

            let (prev, last) = {
                let mut memo = ctx.memo.lock();
                let prev = mem::replace(&mut memo.0, next);
                memo.1 += 1;
                let last = if memo.1 == ctx.total {
                    Some(mem::replace(&mut memo.0, Future::make_empty()))
                } else {
                    None
                };
                (prev, last)
            };

            if let Some(last) = last {
                let c = ctx.clone();
                last.set_callback(move |result| fulfil(&c.promise, result));
            }

            prev.via(queued).set_callback(move |acc| {
                let acc = match acc {
                    Ok(acc) => acc,
                    Err(err) => return step.complete(Err(err)),
                };

                match catch(move || call(&ctx.func, acc, item).into_next()) {
                    Ok(Next::Value(result)) => step.complete(result),
                    Ok(Next::Chain(chained)) => chained.forward_to(step),
                    Err(err) => step.complete(Err(err)),
                }
            });
        });
    }

    future
}

/// Fold the input values in completion order. The first failure ends the fold with that error.
pub fn unordered_reduce<T, U, I, F, R>(futures: I, initial: U, mut func: F) -> Future<U>
    where T: Send + 'static,
          U: Send + 'static,
          I: IntoIterator<Item = Future<T>>,
          F: FnMut(U, T) -> R + Send + 'static,
          R: IntoNext<Output = U>
{
    unordered_reduce_try(futures, initial, move |acc, item| {
        match item {
            Ok(value) => func(acc, value).into_next(),
            Err(err) => Next::Value(Err(err)),
        }
    })
}

struct WindowContext<T, U: Send + 'static, F> {
    next: AtomicUsize,
    executor: Arc<dyn Executor>,
    inputs: Vec<Spinlock<Option<T>>>,
    promises: Vec<PromiseSlot<U>>,
    func: F,
}

fn spawn<T, F, R>(ctx: Arc<WindowContext<T, R::Output, F>>)
    where T: Send + 'static,
          F: Fn(T) -> R + Send + Sync + 'static,
          R: IntoNext
{
    let idx = ctx.next.fetch_add(1, Ordering::Relaxed);
    if idx >= ctx.inputs.len() {
        return;
    }

    let input = ctx.inputs[idx].lock().take();
    let input = match input {
        Some(input) => input,
        None => return,
    };

    let func = &ctx.func;
    let running = make_future_with(move || func(input));

    running.set_callback(move |result| {
        let executor = ctx.executor.clone();
        executor.add(Box::new(move || {
            fulfil(&ctx.promises[idx], result);
            spawn::<T, F, R>(ctx);
        }));
    });
}

/// Run `func` over `inputs` with at most `limit` calls in flight, on `executor`.
///
/// Returns one future per input, in input order. Each finished call starts the
/// next unstarted input. A `limit` of zero is treated as one.
pub fn window_via<T, F, R>(executor: Arc<dyn Executor>, inputs: Vec<T>, func: F, limit: usize) -> Vec<Future<R::Output>>
    where T: Send + 'static,
          F: Fn(T) -> R + Send + Sync + 'static,
          R: IntoNext
{
    let len = inputs.len();

    let mut promises = Vec::with_capacity(len);
    let mut futures = Vec::with_capacity(len);
    for _ in 0..len {
        let (promise, future) = make_promise_contract();
        promises.push(Spinlock::new(Some(promise)));
        futures.push(future.via(executor.clone()));
    }

    let ctx = Arc::new(WindowContext {
        next: AtomicUsize::new(0),
        executor: executor.clone(),
        inputs: inputs.into_iter().map(|input| Spinlock::new(Some(input))).collect(),
        promises: promises,
        func: func,
    });

    for _ in 0..cmp::min(cmp::max(limit, 1), len) {
        let ctx = ctx.clone();
        executor.add(Box::new(move || spawn::<T, F, R>(ctx)));
    }

    futures
}

/// `window_via` on a `QueuedImmediateExecutor`, so long chains do not grow the stack
pub fn window<T, F, R>(inputs: Vec<T>, func: F, limit: usize) -> Vec<Future<R::Output>>
    where T: Send + 'static,
          F: Fn(T) -> R + Send + Sync + 'static,
          R: IntoNext
{
    window_via(Arc::new(QueuedImmediateExecutor), inputs, func, limit)
}

/// `window` over the indices `0..times`
pub fn window_times<F, R>(times: usize, func: F, limit: usize) -> Vec<Future<R::Output>>
    where F: Fn(usize) -> R + Send + Sync + 'static,
          R: IntoNext
{
    window((0..times).collect(), func, limit)
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::error::{Error, FutureError};
    use crate::executor::ManualExecutor;
    use crate::future::{make_future_err, Promise};

    #[test]
    fn test_reduce_empty_returns_initial() {
        let f = reduce(Vec::<Future<i32>>::new(), 7, |acc, v| Ok(acc + v));
        assert_eq!(f.value().unwrap(), 7);
    }

    #[test]
    fn test_reduce_index_order() {
        let mut promises: Vec<Promise<&'static str>> = (0..3).map(|_| Promise::new()).collect();
        let futures: Vec<_> = promises.iter_mut().map(|p| p.get_future().unwrap()).collect();

        let f = reduce(futures, String::new(), |mut acc: String, s| {
            acc.push_str(s);
            Ok(acc)
        });

        promises[2].set_value("c").unwrap();
        promises[0].set_value("a").unwrap();
        promises[1].set_value("b").unwrap();

        assert_eq!(f.value().unwrap(), "abc");
    }

    #[test]
    fn test_reduce_try_sees_errors() {
        let futures = vec![make_future(1), make_future_err(Error::msg("skip")), make_future(2)];
        let f = reduce_try(futures, 0, |acc, item: Try<i32>| Ok(acc + item.unwrap_or(100)));
        assert_eq!(f.value().unwrap(), 103);
    }

    #[test]
    fn test_reduce_value_fold_stops_on_error() {
        let futures = vec![make_future(1), make_future_err(FutureError::TimedOut), make_future(2)];
        let f = reduce(futures, 0, |acc, v| Ok(acc + v));
        assert_eq!(f.value().unwrap_err(), FutureError::TimedOut);
    }

    #[test]
    fn test_vec_reduce() {
        let f = make_future(vec![1, 2, 3]).reduce(10, |acc, v| acc + v);
        assert_eq!(f.value().unwrap(), 16);
    }

    #[test]
    fn test_unordered_reduce_completion_order() {
        let mut promises: Vec<Promise<usize>> = (0..3).map(|_| Promise::new()).collect();
        let futures: Vec<_> = promises.iter_mut().map(|p| p.get_future().unwrap()).collect();

        let mut f = unordered_reduce(futures, Vec::new(), |mut acc: Vec<usize>, v| {
            acc.push(v);
            Ok(acc)
        });

        promises[1].set_value(1).unwrap();
        promises[2].set_value(2).unwrap();
        assert!(f.poll().is_none());
        promises[0].set_value(0).unwrap();

        assert_eq!(f.value().unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_reduce_long_chain_head_last() {
        let mut promises: Vec<Promise<u64>> = (0..20_000).map(|_| Promise::new()).collect();
        let futures: Vec<_> = promises.iter_mut().map(|p| p.get_future().unwrap()).collect();

        let f = reduce(futures, 0u64, |acc, v| Ok(acc + v));

        for (idx, promise) in promises.iter_mut().enumerate().skip(1) {
            promise.set_value(idx as u64).unwrap();
        }
        promises[0].set_value(0).unwrap();

        assert_eq!(f.value().unwrap(), (0..20_000u64).sum::<u64>());
    }

    #[test]
    fn test_unordered_reduce_long_chain() {
        let mut promises: Vec<Promise<u64>> = (0..20_000).map(|_| Promise::new()).collect();
        let futures: Vec<_> = promises.iter_mut().map(|p| p.get_future().unwrap()).collect();

        let f = unordered_reduce(futures, 0u64, |acc, v| Ok(acc + v));
        for (idx, promise) in promises.iter_mut().enumerate().rev() {
            promise.set_value(idx as u64).unwrap();
        }

        assert_eq!(f.value().unwrap(), (0..20_000u64).sum::<u64>());
    }

    #[test]
    fn test_reduce_keeps_head_executor() {
        let executor = Arc::new(ManualExecutor::new());
        let f = reduce(vec![make_future(1).via(executor.clone()), make_future(2)], 0, |acc, v| Ok(acc + v));

        assert!(f.executor().is_some());
        let f = f.map(|v| v * 10);
        executor.make_progress();
        assert_eq!(f.value().unwrap(), 30);
    }

    #[test]
    fn test_unordered_reduce_try_sees_errors() {
        let mut promises: Vec<Promise<i32>> = (0..3).map(|_| Promise::new()).collect();
        let futures: Vec<_> = promises.iter_mut().map(|p| p.get_future().unwrap()).collect();

        let f = unordered_reduce_try(futures, Vec::new(), |mut acc: Vec<String>, item: Try<i32>| {
            acc.push(match item {
                Ok(v) => v.to_string(),
                Err(err) => format!("err:{}", err),
            });
            Ok(acc)
        });

        promises[2].set_value(2).unwrap();
        promises[0].set_exception(Error::msg("zero")).unwrap();
        promises[1].set_value(1).unwrap();

        assert_eq!(f.value().unwrap(), vec!["2", "err:zero", "1"]);
    }

    #[test]
    fn test_unordered_reduce_stops_on_error() {
        let mut promises: Vec<Promise<i32>> = (0..3).map(|_| Promise::new()).collect();
        let futures: Vec<_> = promises.iter_mut().map(|p| p.get_future().unwrap()).collect();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let f = unordered_reduce(futures, 0, move |acc, v| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(acc + v)
        });

        promises[2].set_value(2).unwrap();
        promises[1].set_exception(FutureError::TimedOut).unwrap();
        promises[0].set_value(1).unwrap();

        assert_eq!(f.value().unwrap_err(), FutureError::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_window_empty_inputs() {
        let futures = window(Vec::<u32>::new(), |v| Ok(v), 4);
        assert!(futures.is_empty());
    }

    #[test]
    fn test_window_limit_zero_still_runs() {
        let futures = window_times(3, |i| Ok(i * 2), 0);
        let values: Vec<usize> = futures.into_iter().map(|f| f.value().unwrap()).collect();
        assert_eq!(values, vec![0, 2, 4]);
    }
}
