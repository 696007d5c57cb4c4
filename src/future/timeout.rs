// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Deadlines and delays

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::error::{Error, FutureError};
use crate::future::collect::{collect_all2, fulfil, PromiseSlot};
use crate::future::{make_promise_contract, Future, IntoNext, Next};
use crate::sync::Spinlock;
use crate::timer::Timekeeper;

/// A future completing after `dur`
pub fn sleep(dur: Duration, tk: &dyn Timekeeper) -> Future<()> {
    tk.after(dur)
}

struct WithinContext<T: Send + 'static> {
    // claimed by whichever of the receiver and the timer finishes first
    token: AtomicBool,
    error: Error,
    promise: PromiseSlot<T>,
    this_future: Spinlock<Future<()>>,
}

impl<T: Send + 'static> Future<T> {
    /// Fail with `TimedOut` unless the result arrives within `dur`
    pub fn within(self, dur: Duration, tk: &dyn Timekeeper) -> Future<T> {
        self.within_or(dur, Error::new(FutureError::TimedOut), tk)
    }

    /// Fail with `err` unless the result arrives within `dur`.
    ///
    /// On expiry the receiver is sent `raise(TimedOut)`; its work is not stopped.
    /// If the timer itself fails, its error is used instead of `err`.
    pub fn within_or(self, dur: Duration, err: Error, tk: &dyn Timekeeper) -> Future<T> {
        if self.is_ready() || !self.valid() {
            return self;
        }
        // A deadline past the end of time never expires
        if Instant::now().checked_add(dur).is_none() {
            return self;
        }

        let executor = self.executor();
        let (mut promise, future) = make_promise_contract();

        let ctx = Arc::new(WithinContext {
            token: AtomicBool::new(false),
            error: err,
            promise: Spinlock::new(None),
            this_future: Spinlock::new(Future::make_empty()),
        });

        let weak: Weak<WithinContext<T>> = Arc::downgrade(&ctx);
        let interrupted = promise.set_interrupt_handler(move |err| {
            if let Some(ctx) = weak.upgrade() {
                ctx.this_future.lock().raise(err.clone());
            }
        });
        if let Err(err) = interrupted {
            warn!("Failed to install interrupt handler: {}", err);
        }
        *ctx.promise.lock() = Some(promise);

        let c = ctx.clone();
        let this_future = self.then_try(move |result| {
            if !c.token.swap(true, Ordering::AcqRel) {
                fulfil(&c.promise, result);
            }
        });
        *ctx.this_future.lock() = this_future;

        let weak = Arc::downgrade(&ctx);
        drop(ctx);
        tk.after(dur).set_callback(move |fired| {
            let ctx = match weak.upgrade() {
                Some(ctx) => ctx,
                None => return,
            };
            if ctx.token.swap(true, Ordering::AcqRel) {
                return;
            }

            debug!("Deadline of {:?} passed before the result", dur);
            let err = match fired {
                Ok(()) => ctx.error.clone(),
                Err(err) => err,
            };
            ctx.this_future.lock().raise(FutureError::TimedOut);
            fulfil(&ctx.promise, Err(err));
        });

        match executor {
            Some(executor) => future.via(executor),
            None => future,
        }
    }

    /// Complete no sooner than `dur` from now, with the receiver's result
    pub fn delayed(self, dur: Duration, tk: &dyn Timekeeper) -> Future<T> {
        let executor = self.executor();
        let future = collect_all2(self, sleep(dur, tk)).then(|(result, _)| result);

        match executor {
            Some(executor) => future.via(executor),
            None => future,
        }
    }

    /// Substitute the outcome of `f` if the result does not arrive within `dur`
    pub fn on_timeout<R, F>(self, dur: Duration, f: F, tk: &dyn Timekeeper) -> Future<T>
        where F: FnOnce() -> R + Send + 'static,
              R: IntoNext<Output = T>
    {
        self.within(dur, tk).then_try(move |result| {
            match result {
                Err(ref err) if err.is_timeout() => f().into_next(),
                other => Next::Value(other),
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use crate::future::make_future;
    use crate::timer::ThreadTimekeeper;

    #[test]
    fn test_within_ready_passes_through() {
        let tk = ThreadTimekeeper::new().unwrap();
        let f = make_future(1).within(Duration::from_millis(1), &tk);
        assert_eq!(f.value().unwrap(), 1);
        assert_eq!(tk.pending(), 0);
    }

    #[test]
    fn test_within_expires_and_interrupts() {
        let tk = ThreadTimekeeper::new().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let (mut promise, future) = make_promise_contract::<i32>();

        let h = hits.clone();
        promise.set_interrupt_handler(move |err| {
            assert!(err.is_timeout());
            h.fetch_add(1, Ordering::SeqCst);
        }).unwrap();

        let err = future.within(Duration::from_millis(10), &tk).get().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // the late result goes nowhere
        promise.set_value(5).unwrap();
    }

    #[test]
    fn test_within_unbounded_duration() {
        let tk = ThreadTimekeeper::new().unwrap();
        let (mut promise, future) = make_promise_contract();

        let f = future.within(Duration::from_secs(u64::MAX), &tk);
        assert_eq!(tk.pending(), 0);

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            promise.set_value(8).unwrap();
        });
        assert_eq!(f.get().unwrap(), 8);
        producer.join().unwrap();
    }

    #[test]
    fn test_within_or_custom_error() {
        let tk = ThreadTimekeeper::new().unwrap();
        let (_promise, future) = make_promise_contract::<i32>();

        let err = future.within_or(Duration::from_millis(5), Error::msg("slow"), &tk).get().unwrap_err();
        assert_eq!(err.to_string(), "slow");
    }

    #[test]
    fn test_delayed_sets_floor() {
        let tk = ThreadTimekeeper::new().unwrap();
        let start = Instant::now();
        let value = make_future(3).delayed(Duration::from_millis(20), &tk).get().unwrap();

        assert_eq!(value, 3);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_on_timeout_substitutes() {
        let tk = ThreadTimekeeper::new().unwrap();
        let (_promise, future) = make_promise_contract::<i32>();

        let value = future.on_timeout(Duration::from_millis(5), || Ok(-1), &tk).get().unwrap();
        assert_eq!(value, -1);
    }
}
