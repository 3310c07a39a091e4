//! Single thread executor for blocking callers.
use futures_core::future::BoxFuture;
use parking_lot::Mutex;
use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError, Sender, TryRecvError},
    },
    task::{Context, Poll, Wake, Waker},
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

use crate::{
    Error, Result,
    common::{trace, verbose},
};

/// Idle time before the worker thread exits.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

enum Job {
    Poll(Arc<Task>),
    Call(Box<dyn FnOnce() + Send>),
}

struct Task {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    shared: Weak<Shared>,
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        if let Some(shared) = self.shared.upgrade() {
            if let Err(err) = shared.post(Job::Poll(self)) {
                trace!("failed to reschedule task: {err}");
            }
        }
    }
}

struct Worker {
    sender: Sender<Job>,
    id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    name: String,
    idle_timeout: Duration,
    closed: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl Shared {
    /// Queue a job, spawning the worker thread if none is running.
    fn post(self: &Arc<Self>, job: Job) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::contract("single thread context is closed"));
        }
        let mut worker = self.worker.lock();
        if let Some(w) = worker.as_ref() {
            // the worker removes itself before it stops receiving
            if let Err(mpsc::SendError(job)) = w.sender.send(job) {
                *worker = None;
                return self.spawn_worker(&mut worker, job);
            }
            return Ok(());
        }
        self.spawn_worker(&mut worker, job)
    }

    fn spawn_worker(self: &Arc<Self>, worker: &mut Option<Worker>, job: Job) -> Result<()> {
        let (sender, receiver) = mpsc::channel();
        let _ = sender.send(job);

        let shared = Arc::downgrade(self);
        let idle_timeout = self.idle_timeout;
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move||work_loop(receiver, shared, idle_timeout))?;

        trace!("worker thread {:?} started", self.name);
        *worker = Some(Worker { sender, id: handle.thread().id(), handle: Some(handle) });
        Ok(())
    }
}

fn work_loop(receiver: mpsc::Receiver<Job>, shared: Weak<Shared>, idle_timeout: Duration) {
    loop {
        let job = match receiver.recv_timeout(idle_timeout) {
            Ok(job) => job,
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let Some(shared) = shared.upgrade() else { break };
                let mut worker = shared.worker.lock();
                // a job may have been posted before the lock was taken
                match receiver.try_recv() {
                    Ok(job) => job,
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                        if let Some(w) = worker.take() {
                            // detach, a thread cannot join itself
                            drop(w.handle);
                        }
                        trace!("worker thread idle, exiting");
                        break;
                    }
                }
            }
        };

        match job {
            Job::Call(f) => f(),
            Job::Poll(task) => poll_task(task),
        }
    }
}

fn poll_task(task: Arc<Task>) {
    let mut slot = task.future.lock();
    let Some(mut future) = slot.take() else {
        // completed, or woken more than once
        return;
    };
    drop(slot);

    let waker = Waker::from(task.clone());
    let mut cx = Context::from_waker(&waker);
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(()) => {
            verbose!("task completed");
        }
        Poll::Pending => *task.future.lock() = Some(future),
    }
}

/// Executor that runs every spawned future on one dedicated, named thread.
///
/// The thread is spawned lazily on the first job and exits after being idle for
/// the idle timeout, the next job spawns it again. Futures are only polled on
/// that thread, their wakers post them back to the queue.
///
/// Dropping the context joins a running worker thread.
pub struct SingleThreadContext {
    shared: Arc<Shared>,
}

impl SingleThreadContext {
    /// Create context whose worker thread is named `name`.
    pub fn new(name: impl Into<String>) -> SingleThreadContext {
        SingleThreadContext::with_idle_timeout(name, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(name: impl Into<String>, idle_timeout: Duration) -> SingleThreadContext {
        SingleThreadContext {
            shared: Arc::new(Shared {
                name: name.into(),
                idle_timeout,
                closed: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns `true` if the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.shared.worker.lock().is_some()
    }

    /// Returns `true` if called from the worker thread.
    pub fn is_current(&self) -> bool {
        let id = thread::current().id();
        self.shared.worker.lock().as_ref().is_some_and(|w|w.id == id)
    }

    /// Run a callback on the worker thread.
    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.post(Job::Call(Box::new(f)))
    }

    /// Run a future to completion on the worker thread.
    pub fn spawn<F>(&self, future: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = Arc::new(Task {
            future: Mutex::new(Some(Box::pin(future))),
            shared: Arc::downgrade(&self.shared),
        });
        self.shared.post(Job::Poll(task))
    }
}

impl Drop for SingleThreadContext {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        let Some(mut worker) = self.shared.worker.lock().take() else {
            return;
        };
        let handle = worker.handle.take();
        let id = worker.id;
        // disconnect, the worker drains queued jobs then exits
        drop(worker);

        if let Some(handle) = handle {
            if id != thread::current().id() && handle.join().is_err() {
                trace!("worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for SingleThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadContext")
            .field("name", &self.shared.name)
            .field("idle_timeout", &self.shared.idle_timeout)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;

    /// Pending once, waking itself from another thread.
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                return Poll::Ready(());
            }
            self.0 = true;
            let waker = cx.waker().clone();
            thread::spawn(move||waker.wake());
            Poll::Pending
        }
    }

    fn thread_name() -> Option<String> {
        thread::current().name().map(String::from)
    }

    #[test]
    fn futures_run_on_the_worker() {
        let ctx = SingleThreadContext::new("pgconv-test");
        assert!(!ctx.is_running());

        let (tx, rx) = channel();
        for i in 0..3 {
            let tx = tx.clone();
            ctx.spawn(async move {
                let before = thread_name();
                YieldOnce(false).await;
                let _ = tx.send((i, before, thread_name()));
            }).unwrap();
        }
        assert!(ctx.is_running());
        assert!(!ctx.is_current());

        let mut seen = vec![];
        for _ in 0..3 {
            let (i, before, after) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(before.as_deref(), Some("pgconv-test"));
            assert_eq!(after.as_deref(), Some("pgconv-test"));
            seen.push(i);
        }
        seen.sort();
        assert_eq!(seen, [0, 1, 2]);
    }

    #[test]
    fn idle_worker_exits_and_respawns() {
        let ctx = SingleThreadContext::with_idle_timeout("pgconv-idle", Duration::from_millis(20));
        let (tx, rx) = channel();

        let t = tx.clone();
        ctx.post(move||{ let _ = t.send(thread::current().id()); }).unwrap();
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let mut waited = Duration::ZERO;
        while ctx.is_running() && waited < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }
        assert!(!ctx.is_running());

        ctx.post(move||{ let _ = tx.send(thread::current().id()); }).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn drop_joins_worker() {
        let (tx, rx) = channel();
        let ctx = SingleThreadContext::new("pgconv-drop");
        ctx.post(move||{
            thread::sleep(Duration::from_millis(20));
            let _ = tx.send(());
        }).unwrap();
        drop(ctx);
        assert!(rx.try_recv().is_ok());
    }
}
