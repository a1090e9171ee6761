//! the event queue and strand task engine.
//!
//! a strand is a fifo of tasks serialised to a single logical timeline: at
//! most one task of a strand runs at any instant, and a task that signals
//! [`Outcome::Requeue`] goes back to the *front* of its strand, so a task in
//! the middle of a protocol exchange is never overtaken by a later enqueue.
//! strands of different sessions may run in parallel, one per worker thread.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

/// result of one [`Task::run`] invocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// the task finished and leaves the strand.
    Complete,
    /// the task is waiting on io; put it back at the front of the strand.
    Requeue,
}

/// a unit of work scheduled on a strand.
pub(crate) trait Task: Send {
    fn run(&mut self) -> Outcome;
}

struct FnTask<F>(Option<F>);

impl<F> Task for FnTask<F>
where
    F: FnOnce() + Send,
{
    fn run(&mut self) -> Outcome {
        if let Some(f) = self.0.take() {
            f();
        }
        Outcome::Complete
    }
}

const IDLE: u8 = 0;
const QUEUED: u8 = 1;
const RUNNING: u8 = 2;

struct StrandInner {
    queue: Arc<QueueInner>,
    tasks: Mutex<VecDeque<Box<dyn Task>>>,
    state: AtomicU8,
}

/// a fifo of tasks owned by one session.
#[derive(Clone)]
pub struct Strand {
    inner: Arc<StrandInner>,
}

impl Strand {
    /// number of tasks currently queued.
    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// schedule a plain closure at the back of the strand.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_back(Box::new(FnTask(Some(f))));
    }

    pub(crate) fn push_back(&self, task: Box<dyn Task>) {
        self.inner.tasks.lock().push_back(task);
        self.schedule();
    }

    pub(crate) fn push_front(&self, task: Box<dyn Task>) {
        self.inner.tasks.lock().push_front(task);
        self.schedule();
    }

    fn schedule(&self) {
        if self
            .inner
            .state
            .compare_exchange(IDLE, QUEUED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.queue.push_ready(self.clone());
        }
    }

    /// try to run the head task of this strand on the calling thread.
    /// used by the engine's workers and by sessions draining their own
    /// strand in synchronous mode.
    pub(crate) fn run_one(&self) -> StrandPoll {
        if self
            .inner
            .state
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return StrandPoll::Contended;
        }

        let task = self.inner.tasks.lock().pop_front();
        let poll = match task {
            Some(mut task) => match task.run() {
                Outcome::Complete => StrandPoll::Progress,
                Outcome::Requeue => {
                    self.inner.tasks.lock().push_front(task);
                    StrandPoll::Pending
                }
            },
            None => StrandPoll::Progress,
        };

        // hand the strand back: re-queue when work remains, else go idle.
        if self.inner.tasks.lock().is_empty() {
            self.inner.state.store(IDLE, Ordering::Release);
            // a push that raced the store may have missed scheduling
            if !self.inner.tasks.lock().is_empty() {
                self.schedule();
            }
        } else {
            self.inner.state.store(QUEUED, Ordering::Release);
            self.inner.queue.push_ready(self.clone());
        }

        poll
    }
}

/// outcome of a [`Strand::run_one`] attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StrandPoll {
    /// a task ran to completion (or the strand was empty).
    Progress,
    /// the head task is waiting on io and was requeued.
    Pending,
    /// another thread is running this strand right now.
    Contended,
}

struct QueueInner {
    ready: Mutex<VecDeque<Strand>>,
    condvar: Condvar,
}

impl QueueInner {
    fn push_ready(&self, strand: Strand) {
        self.ready.lock().push_back(strand);
        self.condvar.notify_one();
    }
}

/// a shared queue of runnable strands.
///
/// by default the queue is driven from user code with [`EventQueue::run`] or
/// [`EventQueue::run_one`]. with the `multi-thread` feature worker threads
/// can drive it instead, up to one strand per worker at a time.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

static DEFAULT_QUEUE: Lazy<EventQueue> = Lazy::new(EventQueue::new);

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                ready: Mutex::new(VecDeque::new()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// the process-wide default queue.
    pub fn default_queue() -> &'static EventQueue {
        &DEFAULT_QUEUE
    }

    /// create a new strand living on this queue.
    pub fn new_strand(&self) -> Strand {
        Strand {
            inner: Arc::new(StrandInner {
                queue: self.inner.clone(),
                tasks: Mutex::new(VecDeque::new()),
                state: AtomicU8::new(IDLE),
            }),
        }
    }

    /// run the head task of the next runnable strand. returns `false` when
    /// no strand is runnable right now.
    pub fn run_one(&self) -> bool {
        let strand = self.inner.ready.lock().pop_front();
        match strand {
            Some(strand) => {
                strand.run_one();
                true
            }
            None => false,
        }
    }

    /// drive the queue until every strand is idle. tasks waiting on io are
    /// polled with a short sleep in between, so this is the single-threaded
    /// event loop.
    pub fn run(&self) {
        let mut only_pending = 0usize;
        loop {
            let strand = self.inner.ready.lock().pop_front();
            let Some(strand) = strand else { return };

            match strand.run_one() {
                StrandPoll::Pending => {
                    only_pending += 1;
                    // every runnable strand is io-bound; back off briefly
                    if only_pending >= self.inner.ready.lock().len().max(1) {
                        thread::sleep(Duration::from_millis(1));
                        only_pending = 0;
                    }
                }
                _ => only_pending = 0,
            }
        }
    }

    /// spawn `workers` detached threads driving this queue.
    #[cfg(feature = "multi-thread")]
    pub fn start(&self, workers: usize) {
        for _ in 0..workers.max(1) {
            let inner = self.inner.clone();
            thread::spawn(move || loop {
                let strand = {
                    let mut ready = inner.ready.lock();
                    loop {
                        match ready.pop_front() {
                            Some(strand) => break strand,
                            None => {
                                inner.condvar.wait_for(&mut ready, Duration::from_millis(100));
                            }
                        }
                    }
                };
                if strand.run_one() == StrandPoll::Pending {
                    thread::sleep(Duration::from_micros(500));
                }
            });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn fifo_order() {
        let queue = EventQueue::new();
        let strand = queue.new_strand();

        let value = Arc::new(AtomicI64::new(0));

        let v = value.clone();
        strand.spawn(move || {
            assert_eq!(v.load(Ordering::SeqCst), 0);
            v.fetch_add(1, Ordering::SeqCst);
        });
        let v = value.clone();
        strand.spawn(move || {
            assert_eq!(v.load(Ordering::SeqCst), 1);
            v.fetch_add(10, Ordering::SeqCst);
        });

        queue.run();
        assert_eq!(value.load(Ordering::SeqCst), 11);
        assert!(strand.is_empty());
    }

    #[test]
    fn strands_interleave_in_push_order() {
        let queue = EventQueue::new();
        let s1 = queue.new_strand();
        let s2 = queue.new_strand();

        let toggle = Arc::new(Mutex::new(false));
        for _ in 0..1000 {
            let t = toggle.clone();
            s1.spawn(move || {
                let mut t = t.lock();
                assert!(!*t);
                *t = true;
            });
            let t = toggle.clone();
            s2.spawn(move || {
                let mut t = t.lock();
                assert!(*t);
                *t = false;
            });
            queue.run();
        }
        assert!(!*toggle.lock());
    }

    struct Retry {
        left: u32,
        hits: Arc<AtomicI64>,
    }

    impl Task for Retry {
        fn run(&mut self) -> Outcome {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if self.left == 0 {
                return Outcome::Complete;
            }
            self.left -= 1;
            Outcome::Requeue
        }
    }

    #[test]
    fn requeue_goes_to_front() {
        let queue = EventQueue::new();
        let strand = queue.new_strand();

        let hits = Arc::new(AtomicI64::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        strand.push_back(Box::new(Retry {
            left: 3,
            hits: hits.clone(),
        }));
        // enqueued later; must not overtake the requeueing task
        let o = order.clone();
        let h = hits.clone();
        strand.spawn(move || {
            assert_eq!(h.load(Ordering::SeqCst), 4);
            o.lock().push("second");
        });

        queue.run();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(*order.lock(), ["second"]);
    }

    #[test]
    fn run_one_reports_emptiness() {
        let queue = EventQueue::new();
        let strand = queue.new_strand();
        assert!(!queue.run_one());
        strand.spawn(|| {});
        assert!(queue.run_one());
        assert!(!queue.run_one());
    }
}
