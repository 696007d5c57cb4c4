// Copyright 2015 The coio Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synchronization primitives backing the future engine

pub use self::mono_barrier::MonoBarrier;
pub use self::spinlock::Spinlock;

pub mod mono_barrier;
pub mod spinlock;
