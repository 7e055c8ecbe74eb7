// ── Local tasks ──────────────────────────────────────────────────────────────
//
// Runs `!Send` futures on the loop thread.  A task's waker does not poll the
// future itself; it posts "poll this task" to the scheduler, so every resume
// happens on the loop thread no matter which thread completed the awaited
// operation.  This is how `.await` on a browser call comes back to the UI
// thread.

#![allow(unsafe_code)]

use std::{
    future::Future,
    pin::Pin,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, TryLockError,
    },
    task::{Context, Poll, Wake, Waker},
    thread::{self, ThreadId},
};

use super::{current, fault, Scheduler};
use crate::error::{Result, ShellError, WorkItemFault};

enum TaskState<T> {
    Running(Pin<Box<dyn Future<Output = T>>>),
    Finished(Option<Result<T>>),
}

struct TaskInner<T> {
    state: TaskState<T>,
    wakers: Vec<Waker>,
}

impl<T> TaskInner<T> {
    fn finish(&mut self, outcome: Result<T>) {
        // Drops the future here, on the loop thread.
        self.state = TaskState::Finished(Some(outcome));
        for w in std::mem::take(&mut self.wakers) {
            w.wake();
        }
    }
}

struct TaskRunner<T> {
    inner: Mutex<TaskInner<T>>,
    aborted: AtomicBool,
    scheduler: Scheduler,
    thread: ThreadId,
}

// SAFETY: the future may be `!Send`.  It is only polled by `poll_on_loop`,
// which runs as a work item of `scheduler` and therefore on `thread`.  It is
// dropped either there (`finish`) or by the `Drop` impl below, which leaks
// instead of dropping when the last reference goes away on another thread; a
// waker clone can carry that reference anywhere.  The same holds for a
// finished `T` nobody took.  Other threads only touch `wakers`, `aborted`,
// and a `Finished` value, the latter only through `JoinHandle`, which is
// `Send` only when `T: Send`.
unsafe impl<T> Send for TaskRunner<T> {}
// SAFETY: see above; all shared state is behind the mutex or atomic.
unsafe impl<T> Sync for TaskRunner<T> {}

impl<T> Drop for TaskRunner<T> {
    fn drop(&mut self) {
        if thread::current().id() == self.thread {
            return;
        }
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        let state = std::mem::replace(&mut inner.state, TaskState::Finished(None));
        if matches!(state, TaskState::Running(_) | TaskState::Finished(Some(_))) {
            tracing::warn!(
                target: "wm",
                thread = ?thread::current().id(),
                "local task released off its loop thread; leaking its state"
            );
            std::mem::forget(state);
        }
    }
}

impl<T: 'static> Wake for TaskRunner<T> {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

impl<T: 'static> TaskRunner<T> {
    fn schedule(self: &Arc<Self>) {
        let this = Arc::clone(self);
        if let Err(e) = self.scheduler.post(move || this.poll_on_loop()) {
            tracing::debug!(target: "wm", error = %e, "task woken after its scheduler closed");
        }
    }

    fn poll_on_loop(self: &Arc<Self>) {
        debug_assert_eq!(
            self.thread,
            thread::current().id(),
            "local task polled off its loop thread"
        );

        let mut inner = match self.inner.try_lock() {
            Ok(guard) => guard,
            // Re-entered from a nested loop while this task is mid-poll (a
            // modal dialog inside the task, say).  Try again next turn.
            Err(TryLockError::WouldBlock) => {
                self.schedule();
                return;
            }
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };

        let outcome = match &mut inner.state {
            TaskState::Finished(_) => return,
            TaskState::Running(_) if self.aborted.load(Ordering::Relaxed) => {
                Poll::Ready(Err(ShellError::TaskAborted))
            }
            TaskState::Running(fut) => {
                let waker = Waker::from(Arc::clone(self));
                let mut cx = Context::from_waker(&waker);
                match panic::catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(&mut cx))) {
                    Ok(Poll::Pending) => Poll::Pending,
                    Ok(Poll::Ready(v)) => Poll::Ready(Ok(v)),
                    Err(payload) => {
                        let fault = WorkItemFault::from_panic(payload);
                        fault::report(&fault);
                        Poll::Ready(Err(fault.into()))
                    }
                }
            }
        };

        if let Poll::Ready(result) = outcome {
            inner.finish(result);
        }
    }
}

/// Handle to a task started with [`spawn_local`].
///
/// Awaiting it yields the task's output, `ShellError::WorkItemFault` if the
/// task panicked, or `ShellError::TaskAborted`.  Dropping it detaches the task.
pub struct JoinHandle<T>(Arc<TaskRunner<T>>);

// SAFETY: the handle only reads the finished value, which is moved out to the
// awaiting thread, so this is sound whenever `T` itself may cross threads.
unsafe impl<T: Send> Send for JoinHandle<T> {}

impl<T> JoinHandle<T> {
    fn inner(&self) -> MutexGuard<'_, TaskInner<T>> {
        self.0.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.inner().state, TaskState::Finished(_))
    }
}

impl<T: 'static> JoinHandle<T> {
    /// Stop polling the task.  Its future is dropped on the loop thread at the
    /// next turn and waiters see `ShellError::TaskAborted`.
    pub fn abort(&self) {
        self.0.aborted.store(true, Ordering::Relaxed);
        self.0.schedule();
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner();
        match &mut inner.state {
            TaskState::Running(_) => {
                let waker = cx.waker();
                if !inner.wakers.iter().any(|w| w.will_wake(waker)) {
                    inner.wakers.push(waker.clone());
                }
                Poll::Pending
            }
            TaskState::Finished(out) => Poll::Ready(out.take().unwrap_or_else(|| {
                Err(ShellError::SchedulerMisuse(
                    "JoinHandle polled after it completed".to_owned(),
                ))
            })),
        }
    }
}

/// Run `fut` on the calling thread's message loop.
///
/// The calling thread must be a UI thread with an installed scheduler.  The
/// first poll happens on the next loop turn, not inside this call.
pub fn spawn_local<F>(fut: F) -> Result<JoinHandle<F::Output>>
where
    F: Future + 'static,
{
    let scheduler = current::current().ok_or_else(|| {
        ShellError::SchedulerMisuse(
            "spawn_local called on a thread with no installed scheduler".to_owned(),
        )
    })?;
    spawn_local_on(&scheduler, fut)
}

/// Run `fut` on `scheduler`'s loop.  Must be called on that loop's thread.
pub fn spawn_local_on<F>(scheduler: &Scheduler, fut: F) -> Result<JoinHandle<F::Output>>
where
    F: Future + 'static,
{
    if !scheduler.is_loop_thread() {
        return Err(ShellError::SchedulerMisuse(
            "local tasks must be spawned on their loop thread".to_owned(),
        ));
    }
    if scheduler.is_closed() {
        return Err(ShellError::SchedulerClosed);
    }

    let runner = Arc::new(TaskRunner {
        inner: Mutex::new(TaskInner {
            state: TaskState::Running(Box::pin(fut)),
            wakers: Vec::new(),
        }),
        aborted: AtomicBool::new(false),
        scheduler: scheduler.clone(),
        thread: thread::current().id(),
    });
    runner.schedule();
    Ok(JoinHandle(runner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::ChannelWake;
    use futures::channel::oneshot;
    use std::{cell::Cell, rc::Rc, sync::mpsc};

    fn scheduler() -> Scheduler {
        let (wake, _, _) = ChannelWake::new();
        Scheduler::new(wake)
    }

    fn run_until_idle(s: &Scheduler) {
        while s.pending() > 0 {
            s.drain_available().unwrap();
        }
    }

    #[test]
    fn first_poll_is_deferred() {
        let s = scheduler();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        let handle = spawn_local_on(&s, async move { r.set(true) }).unwrap();
        assert!(!ran.get());
        run_until_idle(&s);
        assert!(ran.get());
        assert!(handle.is_finished());
    }

    #[test]
    fn resumes_on_loop_thread_after_cross_thread_completion() {
        let s = scheduler();
        let (tx, rx) = oneshot::channel::<u32>();
        let loop_id = thread::current().id();
        let resumed_on = Rc::new(Cell::new(None));
        let r = Rc::clone(&resumed_on);
        let handle = spawn_local_on(&s, async move {
            let v = rx.await.unwrap();
            r.set(Some(thread::current().id()));
            v + 1
        })
        .unwrap();

        run_until_idle(&s);
        assert!(!handle.is_finished());

        // Complete the promise from a worker; the waker posts back to `s`.
        thread::spawn(move || tx.send(41).unwrap()).join().unwrap();
        assert_eq!(s.pending(), 1);
        run_until_idle(&s);

        assert_eq!(resumed_on.get(), Some(loop_id));
        let out = futures::executor::block_on(handle).unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn panicking_task_reports_fault() {
        let faults = fault::tests::recording_sink();
        let s = scheduler();
        let handle = spawn_local_on(&s, async { panic!("task fault 3d07") }).unwrap();
        run_until_idle(&s);
        assert!(faults.contains("task fault 3d07"));
        let err = futures::executor::block_on(handle).map(|_: ()| ()).unwrap_err();
        assert!(matches!(err, ShellError::WorkItemFault(_)));
    }

    #[test]
    fn abort_drops_pending_task() {
        let s = scheduler();
        let (_tx, rx) = oneshot::channel::<()>();
        let handle = spawn_local_on(&s, async move {
            let _ = rx.await;
        })
        .unwrap();
        run_until_idle(&s);

        handle.abort();
        run_until_idle(&s);
        assert!(handle.is_finished());
        let err = futures::executor::block_on(handle).unwrap_err();
        assert!(matches!(err, ShellError::TaskAborted));
    }

    /// Reports the thread it is dropped on.  Holds an `Rc`, so it is `!Send`.
    #[allow(dead_code)]
    struct DropRecorder(mpsc::Sender<ThreadId>, Rc<()>);

    impl Drop for DropRecorder {
        fn drop(&mut self) {
            let _ = self.0.send(thread::current().id());
        }
    }

    #[test]
    fn detached_task_woken_after_shutdown_is_never_dropped_off_thread() {
        let s = scheduler();
        let (drops_tx, drops) = mpsc::channel();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = spawn_local_on(&s, async move {
            let guard = DropRecorder(drops_tx, Rc::new(()));
            let _ = rx.await;
            drop(guard);
        })
        .unwrap();
        run_until_idle(&s);

        drop(handle);
        s.shutdown();
        // The waker fails to reschedule and releases the last reference on
        // the worker.
        thread::spawn(move || tx.send(()).unwrap()).join().unwrap();

        assert!(matches!(drops.try_recv(), Err(mpsc::TryRecvError::Empty)));
    }

    #[test]
    fn detached_task_released_on_loop_thread_drops_normally() {
        let s = scheduler();
        let (drops_tx, drops) = mpsc::channel();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = spawn_local_on(&s, async move {
            let guard = DropRecorder(drops_tx, Rc::new(()));
            let _ = rx.await;
            drop(guard);
        })
        .unwrap();
        run_until_idle(&s);

        drop(handle);
        s.shutdown();
        drop(tx);

        assert_eq!(drops.try_recv(), Ok(thread::current().id()));
    }

    #[test]
    fn spawn_local_without_installed_scheduler_is_misuse() {
        let err = spawn_local(async {}).map(|_| ()).unwrap_err();
        assert!(matches!(err, ShellError::SchedulerMisuse(_)));
    }

    #[test]
    fn spawn_local_uses_installed_scheduler() {
        let s = scheduler();
        let _guard = current::install(s.clone()).unwrap();
        let handle = spawn_local(async { 5 }).unwrap();
        run_until_idle(&s);
        assert_eq!(futures::executor::block_on(handle).unwrap(), 5);
    }
}
