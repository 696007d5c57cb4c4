// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Retrying failed operations

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::distributions::{Distribution, Normal};
use rand::Rng;

use crate::error::{catch, Error};
use crate::future::{make_future, make_future_err, make_future_try, make_future_with, Future, IntoNext, Next};
use crate::options::BackoffOptions;
use crate::timer::Timekeeper;

/// Decides whether attempt number `n` (counting from 1) should be followed by another
pub enum RetryPolicy {
    Raw(Box<dyn FnMut(usize, &Error) -> bool + Send + 'static>),
    Future(Box<dyn FnMut(usize, &Error) -> Future<bool> + Send + 'static>),
}

impl RetryPolicy {
    pub fn raw<F>(f: F) -> RetryPolicy
        where F: FnMut(usize, &Error) -> bool + Send + 'static
    {
        RetryPolicy::Raw(Box::new(f))
    }

    pub fn future<F>(f: F) -> RetryPolicy
        where F: FnMut(usize, &Error) -> Future<bool> + Send + 'static
    {
        RetryPolicy::Future(Box::new(f))
    }

    /// Ask the policy. A panicking policy fails the returned future.
    pub fn check(&mut self, attempt: usize, err: &Error) -> Future<bool> {
        match *self {
            RetryPolicy::Raw(ref mut f) => make_future_try(catch(|| f(attempt, err))),
            RetryPolicy::Future(ref mut f) => {
                match catch(|| f(attempt, err)) {
                    Ok(decision) => decision,
                    Err(err) => make_future_err(err),
                }
            }
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RetryPolicy::Raw(..) => write!(f, "RetryPolicy::Raw"),
            RetryPolicy::Future(..) => write!(f, "RetryPolicy::Future"),
        }
    }
}

/// Call `factory(attempt)` until it succeeds or `policy` gives up.
///
/// Attempts count from 0. After a failure the policy is asked with the number
/// of attempts made so far. When it declines, that attempt's error is returned.
pub fn retrying<F, R>(policy: RetryPolicy, factory: F) -> Future<R::Output>
    where F: FnMut(usize) -> R + Send + 'static,
          R: IntoNext
{
    retrying_from(0, policy, factory)
}

fn retrying_from<F, R>(attempt: usize, mut policy: RetryPolicy, mut factory: F) -> Future<R::Output>
    where F: FnMut(usize) -> R + Send + 'static,
          R: IntoNext
{
    make_future_with(|| factory(attempt)).then_try(move |result| {
        let err = match result {
            Ok(value) => return Next::Value(Ok(value)),
            Err(err) => err,
        };

        let attempt = attempt + 1;
        trace!("Attempt {} failed: {}", attempt, err);

        let next = policy.check(attempt, &err).then(move |retry| {
            if retry {
                Next::Chain(retrying_from::<F, R>(attempt, policy, factory))
            } else {
                Next::Value(Err(err))
            }
        });
        Next::Chain(next)
    })
}

/// Allow up to `max_tries` attempts in total
pub fn retrying_policy_basic(max_tries: usize) -> RetryPolicy {
    RetryPolicy::raw(move |attempt, _| attempt < max_tries)
}

fn nanos(dur: Duration) -> f64 {
    dur.as_secs() as f64 * 1e9 + f64::from(dur.subsec_nanos())
}

/// `backoff_min * 2^(attempt - 1) * exp(Normal(0, jitter))`, clamped to `[backoff_min, backoff_max]`
fn jittered_backoff<G: Rng>(opts: &BackoffOptions, attempt: usize, rng: &mut G) -> Duration {
    let jitter = if opts.jitter > 0.0 {
        Normal::new(0.0, opts.jitter).sample(rng).exp()
    } else {
        1.0
    };

    let exponent = attempt.saturating_sub(1).min(1023) as i32;
    let backoff = jitter * nanos(opts.backoff_min) * 2f64.powi(exponent);
    let backoff = backoff.max(nanos(opts.backoff_min)).min(nanos(opts.backoff_max));

    Duration::from_nanos(backoff.round() as u64)
}

/// Wrap `inner` so that each retry it allows is preceded by a capped, jittered,
/// exponentially growing sleep. No retries are allowed once `max_tries` attempts were made.
pub fn retrying_policy_capped_jittered_exponential_backoff<G>(opts: BackoffOptions,
                                                               mut rng: G,
                                                               mut inner: RetryPolicy,
                                                               tk: Arc<dyn Timekeeper>)
                                                               -> RetryPolicy
    where G: Rng + Send + 'static
{
    RetryPolicy::future(move |attempt, err| {
        if attempt == opts.max_tries {
            return make_future(false);
        }

        let backoff = jittered_backoff(&opts, attempt, &mut rng);
        let tk = tk.clone();
        inner.check(attempt, err).then(move |retry| {
            if retry {
                debug!("Backing off {:?} before attempt {}", backoff, attempt);
                Next::Chain(tk.after(backoff).map(|()| true))
            } else {
                Next::Value(Ok(false))
            }
        })
    })
}

#[cfg(test)]
mod test {
    use super::*;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::error::FutureError;

    fn opts(min_ms: u64, max_ms: u64) -> BackoffOptions {
        BackoffOptions::new(10, Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let mut rng = StdRng::from_seed([7; 32]);
        let opts = opts(10, 50);

        let durations: Vec<Duration> = (1..6).map(|n| jittered_backoff(&opts, n, &mut rng)).collect();
        let expected: Vec<Duration> = [10, 20, 40, 50, 50].iter().map(|ms| Duration::from_millis(*ms)).collect();
        assert_eq!(durations, expected);
    }

    #[test]
    fn test_jittered_backoff_stays_in_bounds() {
        let mut rng = StdRng::from_seed([42; 32]);
        let mut opts = opts(10, 1000);
        opts.jitter(0.5);

        for n in 1..20 {
            let backoff = jittered_backoff(&opts, n, &mut rng);
            assert!(backoff >= Duration::from_millis(10));
            assert!(backoff <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_policy_panic_fails_check() {
        let mut policy = RetryPolicy::raw(|_, _| panic!("bad policy"));
        let err = policy.check(1, &Error::msg("x")).value().unwrap_err();
        assert_eq!(err, FutureError::Panicked("bad policy".to_owned()));
    }

    #[test]
    fn test_basic_policy_limits_attempts() {
        let f = retrying(retrying_policy_basic(3), |attempt| -> Result<i32, Error> {
            Err(Error::msg(format!("attempt {}", attempt)))
        });
        assert_eq!(f.value().unwrap_err().to_string(), "attempt 2");
    }
}
