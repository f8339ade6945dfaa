use crate::threading::signal::Signal;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use signal_hook::consts::{SIGINT, SIGPIPE, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Once, Weak};
use std::thread;
use std::time::Duration;

lazy_static! {
    static ref LATCHES: Mutex<Vec<Weak<Signal>>> = Mutex::new(Vec::new());
}

static SIGPIPE_INSTALL: Once = Once::new();
static WATCHER_INSTALL: Once = Once::new();

/// One-shot process-wide neutralisation of SIGPIPE: a peer resetting a
/// connection must surface as a write error, not kill the process. Installed
/// by both the socket layer and the terminate latch.
pub(crate) fn neutralise_sigpipe() {
    SIGPIPE_INSTALL.call_once(|| {
        // The registered action keeps its own clone of the flag alive.
        let _ = signal_hook::flag::register(SIGPIPE, Arc::new(AtomicBool::new(false)));
    });
}

/// One-shot spawn of the watcher fanning terminate-class signals out to
/// every live latch.
fn install() {
    neutralise_sigpipe();

    WATCHER_INSTALL.call_once(|| {
        let mut signals = match Signals::new([SIGINT, SIGTERM, SIGQUIT]) {
            Ok(signals) => signals,
            Err(_) => return,
        };

        let _ = thread::Builder::new()
            .name("mona-terminate".into())
            .spawn(move || {
                for _signal in signals.forever() {
                    let mut latches = LATCHES.lock();
                    latches.retain(|latch| match latch.upgrade() {
                        Some(latch) => {
                            latch.set();
                            true
                        }
                        None => false,
                    });
                }
            });
    });
}

/// Process-wide shutdown latch wired to the OS termination signals (INT,
/// TERM, QUIT). `wait` returns when either the OS requested termination or
/// another thread called `set`. Default handlers are not reinstalled.
pub struct TerminateSignal {
    latch: Arc<Signal>,
}

impl TerminateSignal {
    pub fn new() -> TerminateSignal {
        install();

        let latch = Arc::new(Signal::new());
        LATCHES.lock().push(Arc::downgrade(&latch));

        TerminateSignal { latch }
    }

    /// Block up to `timeout` (`Duration::ZERO` = forever) for a termination
    /// request; returns true iff one arrived in time.
    #[inline]
    pub fn wait(&self, timeout: Duration) -> bool {
        self.latch.wait(timeout)
    }

    /// Request termination from inside the process.
    #[inline]
    pub fn set(&self) {
        self.latch.set();
    }
}

impl Default for TerminateSignal {
    fn default() -> TerminateSignal {
        TerminateSignal::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_set_from_another_thread_releases_wait() {
        let terminate = Arc::new(TerminateSignal::new());

        let setter = {
            let terminate = terminate.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                terminate.set();
            })
        };

        let start = Instant::now();
        assert!(terminate.wait(Duration::from_millis(5000)));
        assert!(start.elapsed() < Duration::from_millis(5000));

        setter.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_os_signal_sets_every_latch() {
        let first = TerminateSignal::new();
        let second = TerminateSignal::new();

        signal_hook::low_level::raise(SIGTERM).unwrap();

        assert!(first.wait(Duration::from_millis(5000)));
        assert!(second.wait(Duration::from_millis(5000)));
    }
}
