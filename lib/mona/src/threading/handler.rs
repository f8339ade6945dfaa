use crate::error::{Error, Result};
use crate::logging::{self, Logger};
use crate::threading::signal::Signal;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A deferred unit of work. Owns its captured state exclusively and is
/// invoked at most once, on the owner thread draining the handler.
pub type Action = Box<dyn FnOnce() -> Result<()> + Send>;

/// Multi-producer, single-consumer queue of actions keyed to an owner
/// wakeup signal. Any thread may queue; only the owner thread drains. This is
/// the only place application callbacks run.
pub struct Handler {
    actions: Mutex<VecDeque<Action>>,
    wakeup: Arc<Signal>,
    last_error: Mutex<Option<Error>>,
    log: Logger,
}

impl Handler {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(wakeup: Arc<Signal>, log: L) -> Handler {
        let log = match log.into() {
            Some(log) => log.new(logging::o!("component" => "handler")),
            None => Logger::root(logging::Discard, logging::o!()),
        };

        Handler {
            actions: Mutex::new(VecDeque::new()),
            wakeup,
            last_error: Mutex::new(None),
            log,
        }
    }

    /// The signal producers pulse after queueing; the owner blocks on it
    /// between flushes.
    #[inline]
    pub fn wakeup(&self) -> &Arc<Signal> {
        &self.wakeup
    }

    /// Append an action and wake the owner. Thread-safe.
    pub fn queue<F>(&self, action: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.actions.lock().push_back(Box::new(action));
        self.wakeup.set();
    }

    /// Drain the queue, invoking each action exactly once in enqueue order.
    /// Owner thread only. Each invocation is isolated: a failing action is
    /// logged and recorded without stopping the drain. The tail is re-checked
    /// after every action, so work enqueued mid-flush runs in the same drain;
    /// a nested flush from inside an action steals the remaining actions and
    /// the outer drain simply finds the queue empty. Returns the number of
    /// actions invoked.
    pub fn flush(&self) -> usize {
        let mut count = 0;

        loop {
            let action = self.actions.lock().pop_front();
            match action {
                Some(action) => {
                    count += 1;
                    if let Err(err) = action() {
                        logging::warn!(self.log, "action failed during flush"; "error" => %err);
                        *self.last_error.lock() = Some(err);
                    }
                }
                None => break,
            }
        }

        count
    }

    pub fn pending(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn last_error(&self) -> Option<Error> {
        self.last_error.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::thread;

    fn handler() -> Arc<Handler> {
        Arc::new(Handler::new(Arc::new(Signal::new()), None))
    }

    #[test]
    fn test_flush_preserves_enqueue_order() {
        let handler = handler();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for value in 0..8 {
            let seen = seen.clone();
            handler.queue(move || {
                seen.lock().push(value);
                Ok(())
            });
        }

        assert_eq!(handler.flush(), 8);
        assert_eq!(*seen.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_queue_signals_the_wakeup() {
        let handler = handler();
        handler.queue(|| Ok(()));

        assert!(handler.wakeup().wait(std::time::Duration::from_millis(10)));
    }

    #[test]
    fn test_actions_run_exactly_once() {
        let handler = handler();
        let seen = Arc::new(Mutex::new(0u32));

        {
            let seen = seen.clone();
            handler.queue(move || {
                *seen.lock() += 1;
                Ok(())
            });
        }

        assert_eq!(handler.flush(), 1);
        assert_eq!(handler.flush(), 0);
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_failing_action_does_not_stop_the_drain() {
        let handler = handler();
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let seen = seen.clone();
            handler.queue(move || {
                seen.lock().push("first");
                Err(Error::new(ErrorKind::Intern, "deliberate"))
            });
        }
        {
            let seen = seen.clone();
            handler.queue(move || {
                seen.lock().push("second");
                Ok(())
            });
        }

        assert_eq!(handler.flush(), 2);
        assert_eq!(*seen.lock(), vec!["first", "second"]);
        assert_eq!(handler.last_error().map(|err| err.kind()), Some(ErrorKind::Intern));
    }

    #[test]
    fn test_enqueue_during_flush_runs_in_same_drain() {
        let handler = handler();
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let handler_again = handler.clone();
            let seen = seen.clone();
            let seen_nested = seen.clone();
            handler.queue(move || {
                seen.lock().push("outer");
                handler_again.queue(move || {
                    seen_nested.lock().push("nested");
                    Ok(())
                });
                Ok(())
            });
        }

        assert_eq!(handler.flush(), 2);
        assert_eq!(*seen.lock(), vec!["outer", "nested"]);
    }

    #[test]
    fn test_producers_on_multiple_threads_keep_per_producer_order() {
        let handler = handler();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let producers: Vec<_> = (0..4u32)
            .map(|producer| {
                let handler = handler.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    for step in 0..50u32 {
                        let seen = seen.clone();
                        handler.queue(move || {
                            seen.lock().push((producer, step));
                            Ok(())
                        });
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(handler.flush(), 200);

        let seen = seen.lock();
        for producer in 0..4u32 {
            let steps: Vec<_> = seen
                .iter()
                .filter(|(who, _)| *who == producer)
                .map(|(_, step)| *step)
                .collect();
            assert_eq!(steps, (0..50).collect::<Vec<_>>());
        }
    }
}
