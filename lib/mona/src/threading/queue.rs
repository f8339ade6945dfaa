use crate::error::{Error, Result};
use crate::logging::{self, Logger};
use crate::threading::handler::Handler;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Requested scheduling priority for a queue's worker thread. Values without
/// OS support fall back to normal.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

impl Default for Priority {
    fn default() -> Priority {
        Priority::Normal
    }
}

/// A unit of deferred work executed on a worker thread. Runners own their
/// captured state exclusively and run at most once; a failure is reported as
/// a structured error, never by unwinding.
pub trait Runner: Send {
    fn name(&self) -> &'static str;
    fn run(&mut self) -> Result<()>;
}

struct Shared {
    id: u16,
    runners: Mutex<VecDeque<Box<dyn Runner>>>,
    available: Condvar,
    stop: AtomicBool,
    running: AtomicBool,
    back: Mutex<Option<Arc<Handler>>>,
    last_error: Mutex<Option<Error>>,
    log: Logger,
}

impl Shared {
    fn work(&self) {
        logging::debug!(self.log, "worker started"; "queue" => self.id);

        let mut runners = self.runners.lock();
        loop {
            while let Some(mut runner) = runners.pop_front() {
                drop(runners);

                logging::trace!(self.log, "running"; "queue" => self.id, "runner" => runner.name());
                if let Err(err) = runner.run() {
                    self.report(runner.name(), err);
                }

                runners = self.runners.lock();
            }

            if self.stop.load(Ordering::Acquire) {
                break;
            }
            self.available.wait(&mut runners);
        }
        drop(runners);

        self.running.store(false, Ordering::Release);
        logging::debug!(self.log, "worker stopped"; "queue" => self.id);
    }

    /// Record the failure and carry it to the back handler as a completion,
    /// so the owner thread observes worker errors without any unwinding
    /// crossing the thread boundary.
    fn report(&self, name: &'static str, err: Error) {
        logging::warn!(self.log, "runner failed"; "queue" => self.id, "runner" => name, "error" => %err);
        *self.last_error.lock() = Some(err.clone());

        let back = self.back.lock().clone();
        if let Some(handler) = back {
            let id = self.id;
            let log = self.log.clone();
            handler.queue(move || {
                logging::warn!(log, "worker reported failure"; "queue" => id, "runner" => name, "error" => %err);
                Ok(())
            });
        }
    }
}

/// One worker thread bound to a FIFO of runners. The queue id doubles as the
/// pool track, so everything submitted with one track executes in enqueue
/// order on one thread.
pub struct ThreadQueue {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadQueue {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(id: u16, log: L) -> ThreadQueue {
        let log = match log.into() {
            Some(log) => log.new(logging::o!("component" => "thread-queue")),
            None => Logger::root(logging::Discard, logging::o!()),
        };

        ThreadQueue {
            shared: Arc::new(Shared {
                id,
                runners: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
                back: Mutex::new(None),
                last_error: Mutex::new(None),
                log,
            }),
            thread: Mutex::new(None),
        }
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.shared.id
    }

    #[inline]
    pub fn running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Completions for failed runners are posted here.
    pub fn set_back_handler(&self, handler: Arc<Handler>) {
        *self.shared.back.lock() = Some(handler);
    }

    /// Spawn the worker thread. Idempotent while the thread is alive.
    pub fn start(&self, priority: Priority) -> Result<()> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }

        logging::debug!(self.shared.log, "starting worker"; "queue" => self.shared.id, "priority" => ?priority);

        self.shared.stop.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let handle = match thread::Builder::new()
            .name(format!("mona-queue-{}", self.shared.id))
            .spawn(move || shared.work())
        {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(Error::from(err));
            }
        };

        *thread = Some(handle);
        Ok(())
    }

    /// Enqueue and notify. Thread-safe; enqueue order is preserved.
    pub fn queue(&self, runner: Box<dyn Runner>) {
        {
            let mut runners = self.shared.runners.lock();
            runners.push_back(runner);
        }
        self.shared.available.notify_one();
    }

    /// Ask the worker to exit and return immediately. Runners already queued
    /// are still executed before the thread exits (clean drain), which is how
    /// subjects know no callback can land after `join`.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.available.notify_all();
    }

    /// Block until the worker thread has exited.
    pub fn join(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn last_error(&self) -> Option<Error> {
        self.shared.last_error.lock().clone()
    }
}
