use crate::error::Result;
use crate::logging::{self, Logger};
use crate::threading::handler::Handler;
use crate::threading::queue::{Priority, Runner, ThreadQueue};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Fixed array of worker queues addressed by *track*. Tracks are opaque u16
/// identifiers: 0 means "unassigned, pick one and tell me", any other value
/// routes to queue `(track - 1) mod size`. Pinning a stream of runners to one
/// track is what serialises all I/O for one socket or file.
pub struct ThreadPool {
    queues: Vec<ThreadQueue>,
    cursor: AtomicUsize,
    log: Logger,
}

impl ThreadPool {
    /// One-shot construction; `threads == 0` defaults to the hardware
    /// concurrency. All queues are started before this returns and the size
    /// never changes afterwards.
    pub fn init<'a, L: Into<Option<&'a Logger>>>(
        threads: u16,
        priority: Priority,
        log: L,
    ) -> Result<ThreadPool> {
        let log = match log.into() {
            Some(log) => log.new(logging::o!("component" => "thread-pool")),
            None => Logger::root(logging::Discard, logging::o!()),
        };

        let count = match threads {
            0 => thread::available_parallelism()
                .map(|cores| cores.get() as u16)
                .unwrap_or(1),
            threads => threads,
        };

        logging::debug!(log, "initialising pool"; "queues" => count, "priority" => ?priority);

        let queues: Vec<ThreadQueue> = (1..=count).map(|id| ThreadQueue::new(id, &log)).collect();
        for queue in &queues {
            queue.start(priority)?;
        }

        Ok(ThreadPool {
            queues,
            cursor: AtomicUsize::new(0),
            log,
        })
    }

    #[inline]
    pub fn size(&self) -> u16 {
        self.queues.len() as u16
    }

    /// Wire the completion handler for runner failures into every queue.
    pub fn back_handler(&self, handler: &Arc<Handler>) {
        for queue in &self.queues {
            queue.set_back_handler(handler.clone());
        }
    }

    /// Submit a runner on the queue selected by `track`. A zero track is
    /// resolved by a rotating cursor and the chosen id is written back, so
    /// later submissions with the same counter share one queue; under a race
    /// the first writer wins and everyone converges on its pick. Returns the
    /// effective track.
    pub fn queue(&self, track: &AtomicU16, runner: Box<dyn Runner>) -> u16 {
        let size = self.queues.len() as u16;

        let mut current = track.load(Ordering::Acquire);
        if current == 0 {
            let pick = (self.cursor.fetch_add(1, Ordering::Relaxed) % size as usize) as u16 + 1;
            current = match track.compare_exchange(0, pick, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => pick,
                Err(existing) => existing,
            };
        }

        let index = ((current - 1) % size) as usize;
        self.queues[index].queue(runner);
        current
    }

    /// Stop and join every queue, draining all pending runners first.
    /// Returns the number of queues that were running.
    pub fn join(&self) -> u16 {
        let mut count = 0;
        for queue in &self.queues {
            if queue.running() {
                count += 1;
            }
            queue.stop();
        }
        for queue in &self.queues {
            queue.join();
        }

        logging::debug!(self.log, "pool joined"; "stopped" => count);
        count
    }
}
