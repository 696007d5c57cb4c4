// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Executors continuations are dispatched to
//!
//! The engine only ever calls [`Executor::add`](trait.Executor.html#tymethod.add)
//! (or `add_with_priority`). The executors shipped here cover the usual needs:
//! run inline, run inline but flatten recursion, run on a caller-driven queue,
//! or run on a pool of worker threads.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::options::Options;

/// A unit of work submitted to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub const LO_PRI: i8 = i8::MIN;
pub const MID_PRI: i8 = 0;
pub const HI_PRI: i8 = i8::MAX;

/// Something that runs submitted closures, now or later, here or elsewhere
pub trait Executor: Send + Sync {
    /// Submit a job for execution
    fn add(&self, job: Job);

    /// Submit a job with a priority. Executors without priorities ignore it.
    fn add_with_priority(&self, job: Job, _priority: i8) {
        self.add(job)
    }

    fn num_priorities(&self) -> u8 {
        1
    }
}

/// An executor whose queue is drained by the thread that owns it
pub trait DrivableExecutor: Executor {
    /// Block until at least one job is queued, then run the queued jobs
    fn drive(&self);

    /// Like `drive`, but gives up at `deadline`. Returns whether any job ran.
    fn try_drive_until(&self, deadline: Instant) -> bool;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Runs every job immediately on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn add(&self, job: Job) {
        job()
    }
}

thread_local!(static IMMEDIATE_QUEUE: RefCell<Option<VecDeque<Job>>> = RefCell::new(None));

struct ImmediateQueueReset;

impl Drop for ImmediateQueueReset {
    fn drop(&mut self) {
        IMMEDIATE_QUEUE.with(|q| *q.borrow_mut() = None);
    }
}

/// Runs jobs immediately, but a job added from inside a running job is queued
/// and run after it returns. Long continuation chains therefore run in a loop
/// instead of growing the stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueuedImmediateExecutor;

impl Executor for QueuedImmediateExecutor {
    fn add(&self, job: Job) {
        let job = IMMEDIATE_QUEUE.with(|q| {
            let mut q = q.borrow_mut();
            match *q {
                Some(ref mut queue) => {
                    queue.push_back(job);
                    None
                }
                None => {
                    *q = Some(VecDeque::new());
                    Some(job)
                }
            }
        });

        let job = match job {
            Some(job) => job,
            None => return,
        };

        let _reset = ImmediateQueueReset;
        job();

        loop {
            let next = IMMEDIATE_QUEUE.with(|q| q.borrow_mut().as_mut().and_then(|q| q.pop_front()));
            match next {
                Some(job) => job(),
                None => break,
            }
        }
    }
}

/// A FIFO queue that only makes progress when its owner runs it
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Job>>,
    cond: Condvar,
}

impl ManualExecutor {
    pub fn new() -> ManualExecutor {
        ManualExecutor {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    /// Run the jobs queued at the moment of the call. Returns how many ran.
    ///
    /// Jobs added while running are left for the next call.
    pub fn run(&self) -> usize {
        let count = lock(&self.queue).len();

        let mut ran = 0;
        while ran < count {
            let job = match lock(&self.queue).pop_front() {
                Some(job) => job,
                None => break,
            };
            job();
            ran += 1;
        }

        ran
    }

    /// Block until the queue is non-empty
    pub fn wait(&self) {
        let mut queue = lock(&self.queue);
        while queue.is_empty() {
            queue = match self.cond.wait(queue) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Run queued jobs until none are left
    pub fn make_progress(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.run();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Drop every queued job without running it
    pub fn clear(&self) {
        let jobs = {
            let mut queue = lock(&self.queue);
            queue.drain(..).collect::<Vec<_>>()
        };
        drop(jobs);
    }
}

impl Default for ManualExecutor {
    fn default() -> ManualExecutor {
        ManualExecutor::new()
    }
}

impl Executor for ManualExecutor {
    fn add(&self, job: Job) {
        lock(&self.queue).push_back(job);
        self.cond.notify_one();
    }
}

impl DrivableExecutor for ManualExecutor {
    fn drive(&self) {
        self.wait();
        self.run();
    }

    fn try_drive_until(&self, deadline: Instant) -> bool {
        {
            let mut queue = lock(&self.queue);
            while queue.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                queue = match self.cond.wait_timeout(queue, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        }

        self.run() > 0
    }
}

struct QueuedJob {
    priority: i8,
    seq: u64,
    job: Job,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &QueuedJob) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &QueuedJob) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // Higher priority first, then FIFO
    fn cmp(&self, other: &QueuedJob) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PoolQueue {
    jobs: BinaryHeap<QueuedJob>,
    seq: u64,
    shutdown: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    cond: Condvar,
}

impl PoolShared {
    fn next_job(&self) -> Option<Job> {
        let mut queue = lock(&self.queue);
        loop {
            if let Some(queued) = queue.jobs.pop() {
                return Some(queued.job);
            }

            if queue.shutdown {
                return None;
            }

            queue = match self.cond.wait(queue) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

/// A fixed set of worker threads pulling jobs from a shared priority queue
pub struct ThreadPoolExecutor {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPoolExecutor {
    /// Create a pool with one worker per CPU
    pub fn new() -> io::Result<ThreadPoolExecutor> {
        ThreadPoolExecutor::with_options(Options::new())
    }

    pub fn with_workers(workers: usize) -> io::Result<ThreadPoolExecutor> {
        let mut opts = Options::new();
        opts.workers(workers);
        ThreadPoolExecutor::with_options(opts)
    }

    pub fn with_options(opts: Options) -> io::Result<ThreadPoolExecutor> {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                jobs: BinaryHeap::new(),
                seq: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let prefix = opts.name.clone().unwrap_or_else(|| "coio-futures-worker".to_owned());
        let mut pool = ThreadPoolExecutor {
            shared: shared,
            handles: Vec::with_capacity(opts.workers),
        };

        for id in 0..opts.workers.max(1) {
            let shared = pool.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", prefix, id))
                .stack_size(opts.stack_size)
                .spawn(move || ThreadPoolExecutor::worker_loop(id, shared))?;
            pool.handles.push(handle);
        }

        debug!("Started thread pool {:?} with {} workers", prefix, pool.handles.len());
        Ok(pool)
    }

    fn worker_loop(id: usize, shared: Arc<PoolShared>) {
        trace!("Worker {} started", id);

        while let Some(job) = shared.next_job() {
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("Worker {} caught a panicking job", id);
            }
        }

        trace!("Worker {} exited", id);
    }

    /// Number of worker threads
    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Number of jobs waiting for a worker
    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).jobs.len()
    }
}

impl Executor for ThreadPoolExecutor {
    fn add(&self, job: Job) {
        self.add_with_priority(job, MID_PRI)
    }

    fn add_with_priority(&self, job: Job, priority: i8) {
        {
            let mut queue = lock(&self.shared.queue);
            let seq = queue.seq;
            queue.seq += 1;
            queue.jobs.push(QueuedJob {
                priority: priority,
                seq: seq,
                job: job,
            });
        }
        self.shared.cond.notify_one();
    }

    fn num_priorities(&self) -> u8 {
        u8::MAX
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        lock(&self.shared.queue).shutdown = true;
        self.shared.cond.notify_all();

        let current = thread::current().id();
        for handle in self.handles.drain(..) {
            // The last reference may be released by a job running on one of our own workers
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread panicked while shutting down");
            }
        }
    }
}
