// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The producer side of a future

use std::fmt;
use std::sync::Arc;

use crate::error::{catch_try, Error, FutureError, Try};
use crate::future::core::Core;
use crate::future::Future;

/// Write side of a one-shot value.
///
/// Dropping a `Promise` that was never fulfilled completes its future with
/// `FutureError::BrokenPromise`.
pub struct Promise<T: Send + 'static> {
    core: Option<Arc<Core<T>>>,
    retrieved: bool,
}

impl<T: Send + 'static> Promise<T> {
    pub fn new() -> Promise<T> {
        Promise {
            core: Some(Core::new()),
            retrieved: false,
        }
    }

    /// A promise without a core. Every operation on it fails with `NoState`.
    pub fn make_empty() -> Promise<T> {
        Promise {
            core: None,
            retrieved: false,
        }
    }

    pub fn valid(&self) -> bool {
        self.core.is_some()
    }

    /// Hand out the read side. Can be called only once.
    pub fn get_future(&mut self) -> Result<Future<T>, FutureError> {
        let core = self.core.as_ref().ok_or(FutureError::NoState)?;
        if self.retrieved {
            return Err(FutureError::FutureAlreadyRetrieved);
        }
        self.retrieved = true;
        Ok(Future::from_core(core.clone()))
    }

    pub fn is_fulfilled(&self) -> bool {
        self.core.as_ref().map_or(false, |core| core.has_result())
    }

    pub fn set_try(&mut self, result: Try<T>) -> Result<(), FutureError> {
        let core = self.core.as_ref().ok_or(FutureError::NoState)?;
        core.set_result(result)
    }

    pub fn set_value(&mut self, value: T) -> Result<(), FutureError> {
        self.set_try(Ok(value))
    }

    pub fn set_exception<E: Into<Error>>(&mut self, err: E) -> Result<(), FutureError> {
        self.set_try(Err(err.into()))
    }

    /// Fulfil with whatever `f` returns. A panic inside `f` becomes the error.
    pub fn set_with<F>(&mut self, f: F) -> Result<(), FutureError>
        where F: FnOnce() -> Try<T>
    {
        if self.core.is_none() {
            return Err(FutureError::NoState);
        }
        if self.is_fulfilled() {
            return Err(FutureError::PromiseAlreadySatisfied);
        }
        self.set_try(catch_try(f))
    }

    /// Called with the error passed to `Future::raise` on this promise's future
    /// or on any continuation derived from it.
    pub fn set_interrupt_handler<F>(&mut self, handler: F) -> Result<(), FutureError>
        where F: Fn(&Error) + Send + Sync + 'static
    {
        let core = self.core.as_ref().ok_or(FutureError::NoState)?;
        core.set_interrupt_handler(Arc::new(handler));
        Ok(())
    }

    /// Fulfil and give up the promise. Losing the race to another writer is not an error here.
    pub(crate) fn complete(mut self, result: Try<T>) {
        if let Err(err) = self.set_try(result) {
            warn!("Discarding completion: {}", err);
        }
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Promise<T> {
        Promise::new()
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            core.detach_promise();
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Promise")
            .field("core", &self.core)
            .field("retrieved", &self.retrieved)
            .finish()
    }
}
