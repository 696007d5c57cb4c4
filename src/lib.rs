// The MIT License (MIT)

// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>

//  Permission is hereby granted, free of charge, to any person obtaining a
//  copy of this software and associated documentation files (the "Software"),
//  to deal in the Software without restriction, including without limitation
//  the rights to use, copy, modify, merge, publish, distribute, sublicense,
//  and/or sell copies of the Software, and to permit persons to whom the
//  Software is furnished to do so, subject to the following conditions:
//
//  The above copyright notice and this permission notice shall be included in
//  all copies or substantial portions of the Software.
//
//  THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
//  OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//  FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//  AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//  LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
//  FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
//  DEALINGS IN THE SOFTWARE.

//! Promises and futures with continuations
//!
//! A `Promise` and a `Future` share one single-assignment cell. The producer
//! fulfils the promise once; the consumer attaches continuations with `then`,
//! `on_error` and friends, each returning a new `Future`. Continuations run
//! inline on whichever thread completes the cell, or on the `Executor`
//! attached with `via`.
//!
//! ```no_run
//! use std::time::Duration;
//! use coio_futures::{make_promise_contract, timer};
//!
//! let (mut promise, future) = make_promise_contract::<i32>();
//! let doubled = future.map(|v| v * 2);
//!
//! promise.set_value(21).unwrap();
//! assert_eq!(doubled.get().unwrap(), 42);
//!
//! let tk = timer::global().unwrap();
//! let (_promise, never) = make_promise_contract::<i32>();
//! assert!(never.within(Duration::from_millis(10), &*tk).get().unwrap_err().is_timeout());
//! ```

#[macro_use]
extern crate log;

use std::io;

pub use crate::error::{catch, Error, FutureError, Try};
pub use crate::executor::{DrivableExecutor, Executor, InlineExecutor, ManualExecutor, QueuedImmediateExecutor,
                          ThreadPoolExecutor, HI_PRI, LO_PRI, MID_PRI};
pub use crate::future::{collect, collect2, collect_all, collect_all2, collect_any, collect_any_without_exception,
                        collect_n, make_future, make_future_err, make_future_try, make_future_with,
                        make_promise_contract, map_all, reduce, reduce_try, retrying, retrying_policy_basic,
                        retrying_policy_capped_jittered_exponential_backoff, sleep, times, unordered_reduce,
                        unordered_reduce_try, via, when, while_do, window, window_times, window_via, Future, IntoNext,
                        Next, Promise, RetryPolicy};
pub use crate::options::{BackoffOptions, Options};
pub use crate::timer::{ThreadTimekeeper, Timekeeper};

pub mod error;
pub mod executor;
pub mod future;
pub mod options;
pub mod sync;
pub mod timer;

/// Thread pool configuration. Provides detailed control over the worker threads of a new pool.
pub struct Builder {
    opts: Options,
}

impl Builder {
    /// Generates the base configuration, from which configuration methods can be chained.
    pub fn new() -> Builder {
        Builder { opts: Options::new() }
    }

    /// Sets the number of worker threads.
    #[inline]
    pub fn workers(mut self, workers: usize) -> Builder {
        self.opts.workers = workers;
        self
    }

    /// Sets the size of the stack for each worker.
    #[inline]
    pub fn stack_size(mut self, stack_size: usize) -> Builder {
        self.opts.stack_size = stack_size;
        self
    }

    /// Names the workers. Threads are called `{name}-{index}`.
    #[inline]
    pub fn name(mut self, name: String) -> Builder {
        self.opts.name = Some(name);
        self
    }

    /// Spawn the workers
    pub fn build(self) -> io::Result<ThreadPoolExecutor> {
        ThreadPoolExecutor::with_options(self.opts)
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}
