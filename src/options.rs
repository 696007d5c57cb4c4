// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker thread options

use std::default::Default;
use std::time::Duration;

/// Options for the threads spawned by executors and timekeepers
#[derive(Debug, Clone)]
pub struct Options {
    pub workers: usize,
    pub stack_size: usize,
    pub name: Option<String>,
}

/// Default worker stack size, 2MB
pub const DEFAULT_STACK: usize = 2 * 1024 * 1024; // 2MB

impl Options {
    pub fn new() -> Options {
        Options {
            workers: num_cpus::get(),
            stack_size: DEFAULT_STACK,
            name: None,
        }
    }

    pub fn workers(&mut self, workers: usize) -> &mut Options {
        self.workers = workers;
        self
    }

    pub fn stack_size(&mut self, size: usize) -> &mut Options {
        self.stack_size = size;
        self
    }

    pub fn name(&mut self, name: String) -> &mut Options {
        self.name = Some(name);
        self
    }
}

impl Default for Options {
    fn default() -> Options {
        Options::new()
    }
}

/// Parameters of the capped, jittered exponential backoff retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffOptions {
    /// Attempt count at which retrying stops
    pub max_tries: usize,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// Standard deviation of the normal distribution the jitter exponent is drawn from
    pub jitter: f64,
}

impl BackoffOptions {
    pub fn new(max_tries: usize, backoff_min: Duration, backoff_max: Duration) -> BackoffOptions {
        BackoffOptions {
            max_tries: max_tries,
            backoff_min: backoff_min,
            backoff_max: backoff_max,
            jitter: 0.0,
        }
    }

    pub fn jitter(&mut self, jitter: f64) -> &mut BackoffOptions {
        self.jitter = jitter;
        self
    }
}

impl Default for BackoffOptions {
    fn default() -> BackoffOptions {
        BackoffOptions::new(3, Duration::from_millis(100), Duration::from_secs(30))
    }
}
