// ── Continuation scheduler ────────────────────────────────────────────────────
//
// A work queue bound to the thread that runs the message loop.  Any thread may
// enqueue; only the loop thread dequeues and executes.  The first post after a
// drain starts posts the scheduler's private wake code to the loop's window,
// so a loop blocked in `GetMessageW` notices the new work even when nothing
// else is happening on screen.  At most one wake is outstanding; a wake that
// failed to post is not outstanding, so the next post tries again.
//
// Drain policy: `drain_available` runs the items that were queued when the
// drain started, then yields back to the native loop.  If producers added more
// in the meantime, the wake code is posted again so the rest runs on the next
// turn.  Native notifications therefore interleave with a sustained stream of
// posted work instead of being starved by it.
//
// The queue lock is held only to push or pop; never while a work item runs.

pub mod current;
pub mod fault;
pub mod task;

use std::{
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
};

use futures::channel::oneshot;

use crate::{
    error::{Result, ShellError, WorkItemFault},
    event::WM_WORK_AVAILABLE,
};

pub use current::{current, install, Installed};
pub use fault::{clear_fault_sink, set_fault_sink};
pub use task::{spawn_local, JoinHandle};

// ── Wake signal ───────────────────────────────────────────────────────────────

/// Delivers the scheduler's private wake code to the loop's window.
///
/// Implementations must be callable from any thread and must not block.
/// On Win32 this is `PostMessageW(hwnd, code, 0, 0)`.
pub trait WakeSignal: Send + Sync {
    fn signal(&self, code: u32) -> Result<()>;
}

// ── Work items ────────────────────────────────────────────────────────────────

type Completion = oneshot::Sender<std::result::Result<(), WorkItemFault>>;

/// One deferred unit of execution.
///
/// `completion` is present only for `send_and_wait` callers, who block on it.
pub(crate) struct WorkItem {
    action: Box<dyn FnOnce() + Send>,
    completion: Option<Completion>,
}

impl WorkItem {
    /// Execute the action, routing a panic to the waiting caller if there is
    /// one, otherwise to the process-wide fault sink.
    fn run(self) {
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(self.action)).map_err(WorkItemFault::from_panic);

        match self.completion {
            Some(done) => {
                // The waiter can only be gone if its thread died; the fault
                // must still go somewhere.
                if let Err(Err(fault)) = done.send(outcome) {
                    fault::report(&fault);
                }
            }
            None => {
                if let Err(fault) = outcome {
                    fault::report(&fault);
                }
            }
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

struct Queue {
    items: VecDeque<WorkItem>,
    closed: bool,
    /// A wake code has been posted and its drain has not started yet.
    wake_pending: bool,
}

impl Queue {
    /// Claim the right to post a wake.  `false` when one is already on its way.
    fn arm_wake(&mut self) -> bool {
        !std::mem::replace(&mut self.wake_pending, true)
    }
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Box<dyn WakeSignal>,
    wake_code: u32,
    owner: ThreadId,
}

/// Handle to the continuation scheduler of one message loop.
///
/// Cheap to clone and `Send + Sync`: hand clones to worker threads so they
/// can route results back to the UI thread.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("owner", &self.shared.owner)
            .field("wake_code", &format_args!("{:#06x}", self.shared.wake_code))
            .field("pending", &self.pending())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler owned by the calling thread, which must be the
    /// thread that runs the message loop.
    pub fn new(wake: impl WakeSignal + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    items: VecDeque::new(),
                    closed: false,
                    wake_pending: false,
                }),
                wake: Box::new(wake),
                wake_code: WM_WORK_AVAILABLE,
                owner: thread::current().id(),
            }),
        }
    }

    /// The private notification code this scheduler posts to wake its loop.
    pub fn wake_code(&self) -> u32 {
        self.shared.wake_code
    }

    /// The thread that owns the loop and executes queued work.
    pub fn owner(&self) -> ThreadId {
        self.shared.owner
    }

    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    /// Number of items waiting to run.
    pub fn pending(&self) -> usize {
        self.lock().items.len()
    }

    /// `true` when both handles refer to the same scheduler.
    pub fn same_as(&self, other: &Scheduler) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Queue `work` to run later on the loop thread.
    ///
    /// Never runs `work` before returning, even when called on the loop
    /// thread.  Fails only after the scheduler has been shut down.
    pub fn post(&self, work: impl FnOnce() + Send + 'static) -> Result<()> {
        self.enqueue(WorkItem {
            action: Box::new(work),
            completion: None,
        })
    }

    /// Run `work` on the loop thread and return its result.
    ///
    /// On the loop thread this runs `work` inline, without a notification
    /// round-trip.  On any other thread it queues `work` and blocks until the
    /// loop has executed it.  A panic inside `work` is returned to the caller
    /// as `ShellError::WorkItemFault`.
    pub fn send_and_wait<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_loop_thread() {
            return panic::catch_unwind(AssertUnwindSafe(work))
                .map_err(|p| WorkItemFault::from_panic(p).into());
        }

        let (value_tx, mut value_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(WorkItem {
            action: Box::new(move || {
                let _ = value_tx.send(work());
            }),
            completion: Some(done_tx),
        })?;

        match futures::executor::block_on(done_rx) {
            Ok(Ok(())) => value_rx
                .try_recv()
                .ok()
                .flatten()
                .ok_or(ShellError::SchedulerClosed),
            Ok(Err(fault)) => Err(fault.into()),
            // The item was discarded unrun by `shutdown`.
            Err(oneshot::Canceled) => Err(ShellError::SchedulerClosed),
        }
    }

    /// Execute the work queued when the drain started, in FIFO order.
    ///
    /// Called by the window procedure on `WorkAvailable`.  Returns how many
    /// items ran.  Calling it from any other thread is a programming error.
    pub fn drain_available(&self) -> Result<usize> {
        if !self.is_loop_thread() {
            return Err(ShellError::SchedulerMisuse(format!(
                "drain_available called on {:?}, but the loop runs on {:?}",
                thread::current().id(),
                self.shared.owner
            )));
        }

        let budget = {
            let mut q = self.lock();
            q.wake_pending = false;
            q.items.len()
        };
        let mut ran = 0;
        while ran < budget {
            // A nested loop (e.g. a modal dialog opened by a work item) may
            // have drained some of the snapshot already.
            let Some(item) = self.pop() else { break };
            item.run();
            ran += 1;
        }

        let (left, rewake) = {
            let mut q = self.lock();
            let left = q.items.len();
            (left, left > 0 && q.arm_wake())
        };
        if rewake {
            tracing::trace!(target: "wm", ran, left, "drain budget spent; re-posting wake");
            self.signal();
        }
        Ok(ran)
    }

    /// Refuse further work and discard anything still queued.
    ///
    /// Blocked `send_and_wait` callers are released with
    /// `ShellError::SchedulerClosed`.
    pub fn shutdown(&self) {
        let discarded: Vec<WorkItem> = {
            let mut q = self.lock();
            q.closed = true;
            q.items.drain(..).collect()
        };
        if !discarded.is_empty() {
            tracing::warn!(
                target: "wm",
                count = discarded.len(),
                "scheduler shut down with work still queued"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Queue> {
        // No user code runs under this lock, so a poisoned queue is still
        // structurally sound.
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self) -> Option<WorkItem> {
        self.lock().items.pop_front()
    }

    fn enqueue(&self, item: WorkItem) -> Result<()> {
        let wake = {
            let mut q = self.lock();
            if q.closed {
                return Err(ShellError::SchedulerClosed);
            }
            q.items.push_back(item);
            q.arm_wake()
        };

        if wake {
            self.signal();
        }
        Ok(())
    }

    /// Post the wake code.  Call only after `arm_wake` returned `true`.
    fn signal(&self) {
        if let Err(e) = self.shared.wake.signal(self.shared.wake_code) {
            // Disarm so the next post retries; the queued items stay put.
            self.lock().wake_pending = false;
            tracing::error!(target: "wm", error = %e, "failed to post scheduler wake-up");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc,
    };

    /// Counts wake-ups and forwards them to a channel the test thread can
    /// block on, standing in for the native message queue.
    pub(crate) struct ChannelWake {
        pub(crate) count: Arc<AtomicUsize>,
        tx: Mutex<mpsc::Sender<u32>>,
    }

    impl ChannelWake {
        pub(crate) fn new() -> (Self, Arc<AtomicUsize>, mpsc::Receiver<u32>) {
            let (tx, rx) = mpsc::channel();
            let count = Arc::new(AtomicUsize::new(0));
            let wake = Self {
                count: Arc::clone(&count),
                tx: Mutex::new(tx),
            };
            (wake, count, rx)
        }
    }

    impl WakeSignal for ChannelWake {
        fn signal(&self, code: u32) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            let _ = self.tx.lock().unwrap().send(code);
            Ok(())
        }
    }

    fn scheduler() -> (Scheduler, Arc<AtomicUsize>, mpsc::Receiver<u32>) {
        let (wake, count, rx) = ChannelWake::new();
        (Scheduler::new(wake), count, rx)
    }

    #[test]
    fn post_does_not_run_inline() {
        let (s, _, _rx) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        s.post(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(s.drain_available().unwrap(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_wake_per_drain_cycle() {
        let (s, count, rx) = scheduler();
        s.post(|| {}).unwrap();
        s.post(|| {}).unwrap();
        s.post(|| {}).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap(), WM_WORK_AVAILABLE);

        assert_eq!(s.drain_available().unwrap(), 3);
        s.post(|| {}).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    /// Fails the next `fails` signals, like a full thread message queue.
    struct FlakyWake {
        fails: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
    }

    impl WakeSignal for FlakyWake {
        fn signal(&self, _code: u32) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.fails.load(Ordering::SeqCst);
            if left > 0 {
                self.fails.store(left - 1, Ordering::SeqCst);
                return Err(ShellError::Win32 {
                    function: "PostMessageW",
                    code: 1816,
                });
            }
            Ok(())
        }
    }

    fn flaky_scheduler(fails: usize) -> (Scheduler, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let fails = Arc::new(AtomicUsize::new(fails));
        let attempts = Arc::new(AtomicUsize::new(0));
        let s = Scheduler::new(FlakyWake {
            fails: Arc::clone(&fails),
            attempts: Arc::clone(&attempts),
        });
        (s, fails, attempts)
    }

    #[test]
    fn failed_wake_is_retried_by_next_post() {
        let (s, _, attempts) = flaky_scheduler(1);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..101 {
            let r = Arc::clone(&ran);
            s.post(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        // One failed attempt, one successful retry, then nothing more.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        assert_eq!(s.drain_available().unwrap(), 101);
        assert_eq!(ran.load(Ordering::SeqCst), 101);
    }

    #[test]
    fn wake_failed_during_drain_is_reposted_when_drain_ends() {
        let (s, fails, attempts) = flaky_scheduler(0);
        let (s2, f) = (s.clone(), Arc::clone(&fails));
        s.post(move || {
            f.store(1, Ordering::SeqCst);
            s2.post(|| {}).unwrap();
        })
        .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // The nested post's wake fails; the drain re-posts one that works.
        assert_eq!(s.drain_available().unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(fails.load(Ordering::SeqCst), 0);
        assert_eq!(s.pending(), 1);

        s.post(|| {}).unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3, "a wake is already outstanding");
    }

    #[test]
    fn drain_runs_in_fifo_order() {
        let (s, _, _rx) = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = Arc::clone(&log);
            s.post(move || log.lock().unwrap().push(i)).unwrap();
        }
        s.drain_available().unwrap();
        assert_eq!(*log.lock().unwrap(), [0, 1, 2, 3, 4]);
    }

    #[test]
    fn drain_is_bounded_by_snapshot_and_rewakes() {
        let (s, count, _rx) = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (s2, l) = (s.clone(), Arc::clone(&log));
        s.post(move || {
            l.lock().unwrap().push("first");
            let l = Arc::clone(&l);
            s2.post(move || l.lock().unwrap().push("added during drain"))
                .unwrap();
        })
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Only the snapshot runs; the item added meanwhile waits for the
        // next wake, which the drain posts itself.
        assert_eq!(s.drain_available().unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), ["first"]);
        assert_eq!(s.pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert_eq!(s.drain_available().unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), ["first", "added during drain"]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drain_off_loop_thread_is_misuse() {
        let (s, _, _rx) = scheduler();
        let err = thread::spawn(move || s.drain_available())
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ShellError::SchedulerMisuse(_)));
    }

    #[test]
    fn send_and_wait_on_loop_thread_is_synchronous() {
        let (s, count, _rx) = scheduler();
        let v = s.send_and_wait(|| 6 * 7).unwrap();
        assert_eq!(v, 42);
        // No wake-up was needed: the work never touched the queue.
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn send_and_wait_on_loop_thread_reports_panic() {
        let (s, _, _rx) = scheduler();
        let err = s.send_and_wait(|| -> u8 { panic!("inline failure") }).unwrap_err();
        match err {
            ShellError::WorkItemFault(f) => assert_eq!(f.message, "inline failure"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn send_and_wait_from_worker_blocks_until_drained() {
        let (s, _, rx) = scheduler();
        let loop_thread = thread::current().id();
        let s2 = s.clone();
        let worker = thread::spawn(move || s2.send_and_wait(move || thread::current().id()));

        // Act as the message loop: wait for the wake code, then drain.
        assert_eq!(rx.recv().unwrap(), WM_WORK_AVAILABLE);
        assert_eq!(s.drain_available().unwrap(), 1);

        let ran_on = worker.join().unwrap().unwrap();
        assert_eq!(ran_on, loop_thread);
    }

    #[test]
    fn send_and_wait_from_worker_surfaces_fault() {
        let (s, _, rx) = scheduler();
        let s2 = s.clone();
        let worker =
            thread::spawn(move || s2.send_and_wait(|| panic!("worker-visible fault")));

        rx.recv().unwrap();
        s.drain_available().unwrap();

        match worker.join().unwrap() {
            Err(ShellError::WorkItemFault(f)) => assert_eq!(f.message, "worker-visible fault"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn panicking_post_reaches_fault_sink_and_queue_survives() {
        let faults = fault::tests::recording_sink();
        let (s, _, _rx) = scheduler();
        let after = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&after);
        s.post(|| panic!("posted fault 5f1c")).unwrap();
        s.post(move || {
            a.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(s.drain_available().unwrap(), 2);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert!(faults.contains("posted fault 5f1c"));
    }

    #[test]
    fn shutdown_rejects_posts_and_releases_waiters() {
        let (s, _, rx) = scheduler();
        let s2 = s.clone();
        let worker = thread::spawn(move || s2.send_and_wait(|| 1));
        rx.recv().unwrap();

        s.shutdown();
        assert!(s.is_closed());
        assert!(matches!(worker.join().unwrap(), Err(ShellError::SchedulerClosed)));
        assert!(matches!(s.post(|| {}), Err(ShellError::SchedulerClosed)));
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn concurrent_producers_each_item_runs_once_in_producer_order() {
        let (s, _, _rx) = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let (s, log) = (s.clone(), Arc::clone(&log));
                thread::spawn(move || {
                    for i in 0..250 {
                        let log = Arc::clone(&log);
                        s.post(move || log.lock().unwrap().push((p, i))).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        while s.pending() > 0 {
            s.drain_available().unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1000);
        for p in 0..4 {
            let seen: Vec<i32> = log.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
            assert_eq!(seen, (0..250).collect::<Vec<_>>());
        }
    }

    proptest::proptest! {
        #[test]
        fn interleaving_preserves_each_producer_order(counts in proptest::collection::vec(1usize..40, 1..6)) {
            let (s, _, _rx) = scheduler();
            let log = Arc::new(Mutex::new(Vec::new()));
            let producers: Vec<_> = counts
                .iter()
                .enumerate()
                .map(|(p, &n)| {
                    let (s, log) = (s.clone(), Arc::clone(&log));
                    thread::spawn(move || {
                        for i in 0..n {
                            let log = Arc::clone(&log);
                            s.post(move || log.lock().unwrap().push((p, i))).unwrap();
                        }
                    })
                })
                .collect();
            for p in producers {
                p.join().unwrap();
            }
            while s.pending() > 0 {
                s.drain_available().unwrap();
            }

            let log = log.lock().unwrap();
            proptest::prop_assert_eq!(log.len(), counts.iter().sum::<usize>());
            for (p, &n) in counts.iter().enumerate() {
                let seen: Vec<usize> = log.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
                proptest::prop_assert_eq!(seen, (0..n).collect::<Vec<_>>());
            }
        }
    }
}
