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

//! A simple Spinlock
//!
//! Critical sections guarded by it must stay short: swapping a callback in,
//! taking a result out. Never run user code while holding it.

use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

const BACKOFF_BASE: usize = 1 << 4;
const BACKOFF_CEILING: usize = 1 << 10;

/// A simple, unfair spinlock.
pub struct Spinlock<T: ?Sized> {
    lock: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Spinlock<T> {}
unsafe impl<T: ?Sized + Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub fn new(data: T) -> Spinlock<T> {
        Spinlock {
            lock: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Spinlock<T> {
    pub fn try_lock(&self) -> Option<SpinlockGuard<T>> {
        const SUCCESS: Ordering = Ordering::Acquire;
        const FAILURE: Ordering = Ordering::Relaxed;

        match self.lock.compare_exchange(false, true, SUCCESS, FAILURE) {
            Ok(_) => Some(SpinlockGuard {
                lock: &self.lock,
                data: unsafe { &mut *self.data.get() },
                _not_send: PhantomData,
            }),
            Err(_) => None,
        }
    }

    pub fn lock(&self) -> SpinlockGuard<T> {
        const SUCCESS: Ordering = Ordering::Acquire;
        const FAILURE: Ordering = Ordering::Relaxed;

        let mut backoff = BACKOFF_BASE;

        while self
            .lock
            .compare_exchange_weak(false, true, SUCCESS, FAILURE)
            .is_err()
        {
            while self.lock.load(FAILURE) {
                // exponential backoff
                for _ in 0..backoff {
                    hint::spin_loop();
                }

                if backoff < BACKOFF_CEILING {
                    backoff <<= 1;
                }
            }
        }

        SpinlockGuard {
            lock: &self.lock,
            data: unsafe { &mut *self.data.get() },
            _not_send: PhantomData,
        }
    }
}

impl<T: Default> Default for Spinlock<T> {
    fn default() -> Spinlock<T> {
        Spinlock::new(Default::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Spinlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => write!(f, "Spinlock {{ data: {:?} }}", &*guard),
            None => write!(f, "Spinlock {{ <locked> }}"),
        }
    }
}

pub struct SpinlockGuard<'a, T: ?Sized + 'a> {
    lock: &'a AtomicBool,
    data: &'a mut T,
    // The guard must be released on the thread that acquired it.
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> Drop for SpinlockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl<'a, T: ?Sized> Deref for SpinlockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl<'a, T: ?Sized> DerefMut for SpinlockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_spinlock_try_lock() {
        let lock = Spinlock::new(1);

        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);

        assert_eq!(*lock.try_lock().unwrap(), 1);
    }

    #[test]
    fn test_spinlock_contended_counter() {
        let lock = Arc::new(Spinlock::new(0usize));

        let handles = (0..4)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.lock(), 40_000);
    }
}
