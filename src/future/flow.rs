// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Control flow over futures

use std::sync::Arc;

use crate::error::catch;
use crate::future::{make_future, make_future_with, make_promise_contract, Future, IntoNext, Promise};

/// Run `thunk` only if `condition` holds
pub fn when<R, F>(condition: bool, thunk: F) -> Future<()>
    where F: FnOnce() -> R,
          R: IntoNext
{
    if condition {
        make_future_with(thunk).unit()
    } else {
        make_future(())
    }
}

/// Run `thunk` again and again while `predicate` holds, each run after the previous one completed.
///
/// Stops with the error of the first failing run. Runs that complete right away
/// are looped over, so a long sequence does not grow the stack.
pub fn while_do<P, F, R>(predicate: P, thunk: F) -> Future<()>
    where P: FnMut() -> bool + Send + 'static,
          F: FnMut() -> R + Send + 'static,
          R: IntoNext
{
    let (promise, future) = make_promise_contract();
    while_do_from(predicate, thunk, promise);
    future
}

fn while_do_from<P, F, R>(mut predicate: P, mut thunk: F, promise: Promise<()>)
    where P: FnMut() -> bool + Send + 'static,
          F: FnMut() -> R + Send + 'static,
          R: IntoNext
{
    loop {
        match catch(|| predicate()) {
            Ok(true) => {}
            Ok(false) => return promise.complete(Ok(())),
            Err(err) => return promise.complete(Err(err)),
        }

        let mut run = make_future_with(|| thunk()).unit();
        match run.poll() {
            Some(Ok(())) => {}
            Some(Err(err)) => return promise.complete(Err(err)),
            None => {
                run.set_callback(move |result| {
                    match result {
                        Ok(()) => while_do_from(predicate, thunk, promise),
                        Err(err) => promise.complete(Err(err)),
                    }
                });
                return;
            }
        }
    }
}

/// Run `thunk` `n` times in sequence
pub fn times<F, R>(n: usize, thunk: F) -> Future<()>
    where F: FnMut() -> R + Send + 'static,
          R: IntoNext
{
    let mut count = 0;
    while_do(move || {
                 count += 1;
                 count <= n
             },
             thunk)
}

/// Attach `func` as the continuation of every input
pub fn map_all<T, I, F, R>(futures: I, func: F) -> Vec<Future<R::Output>>
    where T: Send + 'static,
          I: IntoIterator<Item = Future<T>>,
          F: Fn(T) -> R + Send + Sync + 'static,
          R: IntoNext
{
    let func = Arc::new(func);
    futures.into_iter()
        .map(|f| {
            let func = func.clone();
            f.then(move |value| func(value))
        })
        .collect()
}
