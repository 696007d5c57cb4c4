extern crate coio_futures;
extern crate env_logger;
extern crate rand;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use coio_futures::{make_future, make_promise_contract, retrying, retrying_policy_basic,
                   retrying_policy_capped_jittered_exponential_backoff, BackoffOptions, Error, RetryPolicy,
                   ThreadTimekeeper, Timekeeper};

#[test]
fn test_retry_bound() {
    let _ = env_logger::try_init();

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let f = retrying(retrying_policy_basic(3), move |attempt| -> Result<(), Error> {
        c.fetch_add(1, Ordering::SeqCst);
        Err(Error::msg(format!("failure {}", attempt)))
    });

    assert_eq!(f.get().unwrap_err().to_string(), "failure 2");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_retry_until_success() {
    let f = retrying(retrying_policy_basic(5), |attempt| {
        if attempt < 2 {
            Err(Error::msg("not yet"))
        } else {
            Ok(attempt)
        }
    });
    assert_eq!(f.get().unwrap(), 2);
}

#[test]
fn test_retry_async_operation() {
    let f = retrying(retrying_policy_basic(3), |attempt| {
        let (mut promise, future) = make_promise_contract();
        std::thread::spawn(move || {
            if attempt == 0 {
                promise.set_exception(Error::msg("flaky")).unwrap();
            } else {
                promise.set_value("ok").unwrap();
            }
        });
        future
    });
    assert_eq!(f.get().unwrap(), "ok");
}

#[test]
fn test_policy_sees_attempts_and_errors() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    let policy = RetryPolicy::future(move |attempt, err| {
        s.lock().unwrap().push((attempt, err.to_string()));
        make_future(attempt < 2)
    });

    let f = retrying(policy, |attempt| -> Result<i32, Error> { Err(Error::msg(format!("e{}", attempt))) });
    assert_eq!(f.get().unwrap_err().to_string(), "e1");
    assert_eq!(*seen.lock().unwrap(), vec![(1, "e0".to_owned()), (2, "e1".to_owned())]);
}

#[test]
fn test_capped_backoff_waits_between_attempts() {
    let tk: Arc<dyn Timekeeper> = Arc::new(ThreadTimekeeper::new().unwrap());
    let opts = BackoffOptions::new(3, Duration::from_millis(10), Duration::from_millis(15));
    let policy = retrying_policy_capped_jittered_exponential_backoff(opts,
                                                                       StdRng::from_seed([3; 32]),
                                                                       retrying_policy_basic(100),
                                                                       tk);

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let start = Instant::now();
    let f = retrying(policy, move |_| -> Result<(), Error> {
        c.fetch_add(1, Ordering::SeqCst);
        Err(Error::msg("down"))
    });

    assert_eq!(f.get().unwrap_err().to_string(), "down");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 10ms after the first attempt, 15ms (capped) after the second
    assert!(start.elapsed() >= Duration::from_millis(25));
}

#[test]
fn test_capped_backoff_respects_inner_policy() {
    let tk: Arc<dyn Timekeeper> = Arc::new(ThreadTimekeeper::new().unwrap());
    let mut opts = BackoffOptions::new(10, Duration::from_millis(1), Duration::from_millis(2));
    opts.jitter(0.3);
    let policy = retrying_policy_capped_jittered_exponential_backoff(opts,
                                                                       StdRng::from_seed([9; 32]),
                                                                       retrying_policy_basic(2),
                                                                       tk);

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let f = retrying(policy, move |_| -> Result<(), Error> {
        c.fetch_add(1, Ordering::SeqCst);
        Err(Error::msg("down"))
    });

    assert!(f.get().is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
