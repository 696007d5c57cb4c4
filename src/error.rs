// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors carried through futures
//!
//! A completed future holds a [`Try<T>`](type.Try.html): either the value or an
//! [`Error`](struct.Error.html). `Error` is an opaque, clonable wrapper that can
//! hold any `std::error::Error`, including the engine's own
//! [`FutureError`](enum.FutureError.html) taxonomy.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// The outcome of a completed future.
pub type Try<T> = Result<T, Error>;

/// Failures raised by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FutureError {
    #[error("no state: the handle does not own a core")]
    NoState,
    #[error("promise already satisfied")]
    PromiseAlreadySatisfied,
    #[error("future already retrieved")]
    FutureAlreadyRetrieved,
    #[error("future not ready")]
    FutureNotReady,
    #[error("timed out")]
    TimedOut,
    #[error("broken promise")]
    BrokenPromise,
    #[error("predicate does not obtain")]
    PredicateDoesNotObtain,
    #[error("not enough futures")]
    NotEnoughFutures,
    #[error("future was cancelled")]
    FutureCancellation,
    #[error("continuation panicked: {0}")]
    Panicked(String),
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

/// Type-erased error stored in a failed `Try`.
#[derive(Clone)]
pub struct Error {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

impl Error {
    pub fn new<E>(err: E) -> Error
        where E: StdError + Send + Sync + 'static
    {
        Error { inner: Arc::new(err) }
    }

    /// An error that only carries a message
    pub fn msg<M: Into<String>>(msg: M) -> Error {
        Error::new(MessageError(msg.into()))
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// The engine failure wrapped by this error, if any
    pub fn future_error(&self) -> Option<&FutureError> {
        self.downcast_ref::<FutureError>()
    }

    pub fn is_timeout(&self) -> bool {
        self.future_error() == Some(&FutureError::TimedOut)
    }

    pub fn is_cancellation(&self) -> bool {
        self.future_error() == Some(&FutureError::FutureCancellation)
    }

    pub fn as_std(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }
}

impl<E> From<E> for Error
    where E: StdError + Send + Sync + 'static
{
    fn from(err: E) -> Error {
        Error::new(err)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error({:?})", self.inner)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl PartialEq<FutureError> for Error {
    fn eq(&self, other: &FutureError) -> bool {
        self.future_error() == Some(other)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<Any>".to_owned()
    }
}

/// Run `f`, turning a panic into a `FutureError::Panicked` error
pub fn catch<R, F: FnOnce() -> R>(f: F) -> Try<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let msg = panic_message(&*payload);
        debug!("captured panic inside continuation: {}", msg);
        Error::new(FutureError::Panicked(msg))
    })
}

/// Like `catch`, for closures that already produce a `Try`
pub fn catch_try<R, F: FnOnce() -> Try<R>>(f: F) -> Try<R> {
    catch(f).and_then(|t| t)
}
