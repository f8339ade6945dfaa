//! Typed callback bus. Each subject (socket, file, client) declares its
//! events as a sum type and owns an `Events<E>` subscription list. All raises
//! for IO-originated events happen on the subject's owner handler thread, so
//! subscribers can assume single-threaded delivery per subject.

use parking_lot::Mutex;
use std::mem;

/// Returned by a subscriber to let the raise continue to later subscribers
/// or stop it short.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Handle identifying one subscription; detaching by handle is idempotent.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Subscription(u64);

struct Entry<E> {
    id: u64,
    callback: Box<dyn FnMut(&E) -> Flow + Send>,
}

struct Inner<E> {
    subscribers: Vec<Entry<E>>,
    // Ids detached while a raise holds the live list outside the lock.
    removed: Vec<u64>,
    raising: bool,
    next_id: u64,
}

/// Multi-subscriber callback list tied to one subject.
pub struct Events<E> {
    inner: Mutex<Inner<E>>,
}

impl<E> Events<E> {
    #[inline]
    pub fn new() -> Events<E> {
        Events {
            inner: Mutex::new(Inner {
                subscribers: Vec::new(),
                removed: Vec::new(),
                raising: false,
                next_id: 0,
            }),
        }
    }

    /// Attach a subscriber that can interrupt the raise by returning
    /// `Flow::Stop`. Subscribers attached during a raise become live on the
    /// next raise.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&E) -> Flow + Send + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.push(Entry {
            id,
            callback: Box::new(callback),
        });
        Subscription(id)
    }

    /// Attach a subscriber that never interrupts the raise.
    pub fn listen<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(&E) + Send + 'static,
    {
        self.subscribe(move |event| {
            callback(event);
            Flow::Continue
        })
    }

    /// Detach by handle. Legal during a raise: later subscribers of the same
    /// raise observe the removal. Returns false when the handle was already
    /// detached.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut inner = self.inner.lock();
        if inner.raising {
            if inner.removed.contains(&subscription.0) {
                return false;
            }
            inner.removed.push(subscription.0);
            return true;
        }

        let before = inner.subscribers.len();
        inner.subscribers.retain(|entry| entry.id != subscription.0);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Invoke all subscribers in subscription order. The live list is moved
    /// out of the lock for the duration, so subscribers may attach or detach
    /// freely; a nested raise of the same event set finds an empty list and
    /// returns, which keeps a raise from recursing into the same subscriber.
    pub fn raise(&self, event: &E) {
        let mut taken = {
            let mut inner = self.inner.lock();
            if inner.raising {
                return;
            }
            inner.raising = true;
            mem::take(&mut inner.subscribers)
        };

        for entry in taken.iter_mut() {
            let detached = self.inner.lock().removed.contains(&entry.id);
            if detached {
                continue;
            }
            if (entry.callback)(event) == Flow::Stop {
                break;
            }
        }

        let mut inner = self.inner.lock();
        let removed = mem::take(&mut inner.removed);
        taken.retain(|entry| !removed.contains(&entry.id));
        // Subscribers attached mid-raise landed on the (emptied) live list.
        let attached = mem::take(&mut inner.subscribers);
        taken.extend(attached);
        inner.subscribers = taken;
        inner.raising = false;
    }
}

impl<E> Default for Events<E> {
    fn default() -> Events<E> {
        Events::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_raise_in_subscription_order() {
        let events = Events::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let seen = seen.clone();
            events.listen(move |value: &u32| seen.lock().push((tag, *value)));
        }

        events.raise(&7);

        assert_eq!(*seen.lock(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let events = Events::<()>::new();
        let subscription = events.listen(|_| {});

        assert!(events.unsubscribe(subscription));
        assert!(!events.unsubscribe(subscription));
        assert_eq!(events.subscriber_count(), 0);
    }

    #[test]
    fn test_stop_sentinel_interrupts_raise() {
        let events = Events::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        {
            let count = count.clone();
            events.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Flow::Stop
            });
        }
        {
            let count = count.clone();
            events.listen(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        events.raise(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_during_raise_skips_later_subscriber() {
        let events = Arc::new(Events::<()>::new());
        let count = Arc::new(AtomicUsize::new(0));

        let slot = Arc::new(Mutex::new(None::<Subscription>));

        {
            let events = events.clone();
            let slot = slot.clone();
            events.clone().listen(move |_| {
                if let Some(later) = *slot.lock() {
                    events.unsubscribe(later);
                }
            });
        }
        let later = {
            let count = count.clone();
            events.listen(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        *slot.lock() = Some(later);

        events.raise(&());

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(events.subscriber_count(), 1);
    }

    #[test]
    fn test_attach_during_raise_is_live_on_next_raise() {
        let events = Arc::new(Events::<()>::new());
        let count = Arc::new(AtomicUsize::new(0));

        {
            let events = events.clone();
            let count = count.clone();
            events.clone().listen(move |_| {
                let count = count.clone();
                events.listen(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        events.raise(&());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        events.raise(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
