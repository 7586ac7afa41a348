//! Listener and waiter registries, and hierarchy-ordered event dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::FutureExt as _;
use futures_util::future::BoxFuture;
use tokio::sync::oneshot;

use crate::event::{Event, EventType};
use crate::types::{BoxError, Error};

/// A persistent event callback. Each invocation runs as its own task.
pub type Listener = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Predicate deciding whether a waiter accepts an event.
pub type Check = Box<dyn Fn(&Event) -> Result<bool, BoxError> + Send + Sync>;

type WaitResult = Result<Arc<Event>, Error>;

struct Waiter {
    tx: oneshot::Sender<WaitResult>,
    check: Option<Check>,
}

/// Completion handle returned by [`EventHandler::add_waiter`].
///
/// Dropping the handle (for example when an outer timeout fires) cancels the
/// wait; the registry discards it the next time its type is dispatched.
pub struct WaitFor {
    rx: oneshot::Receiver<WaitResult>,
}

impl WaitFor {
    /// Cancel without dropping the handle.
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}

impl Future for WaitFor {
    type Output = WaitResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(Error::WaiterDropped)))
    }
}

/// Fans events out to listeners and resolves one-shot waiters.
#[derive(Default)]
pub struct EventHandler {
    listeners: Mutex<HashMap<EventType, Vec<Listener>>>,
    waiters: Mutex<HashMap<EventType, Vec<Waiter>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event_type` and everything below it.
    pub fn add_listener<F, Fut>(&self, event_type: EventType, listener: F)
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let listener: Listener = Arc::new(move |event| listener(event).boxed());
        lock(&self.listeners)
            .entry(event_type)
            .or_default()
            .push(listener);
    }

    /// Register a one-shot wait for the next matching `event_type` event.
    pub fn add_waiter(&self, event_type: EventType, check: Option<Check>) -> WaitFor {
        let (tx, rx) = oneshot::channel();
        lock(&self.waiters)
            .entry(event_type)
            .or_default()
            .push(Waiter { tx, check });
        WaitFor { rx }
    }

    /// Deliver `event` to every type in its lineage, root category first.
    ///
    /// Waiters are resolved inline; listeners are spawned and not awaited.
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, event: Event) {
        let event = Arc::new(event);
        for &event_type in event.kind().lineage() {
            self.resolve_waiters(event_type, &event);

            let listeners = lock(&self.listeners)
                .get(&event_type)
                .cloned()
                .unwrap_or_default();
            for listener in listeners {
                tokio::spawn(call_listener(listener, Arc::clone(&event)));
            }
        }
    }

    fn resolve_waiters(&self, event_type: EventType, event: &Arc<Event>) {
        // Take the bucket out so checks can register new waiters without
        // deadlocking or observing a half-processed list.
        let Some(pending) = lock(&self.waiters).remove(&event_type) else {
            return;
        };

        let mut remaining = Vec::new();
        for waiter in pending {
            if waiter.tx.is_closed() {
                continue;
            }
            let matched = match &waiter.check {
                Some(check) => run_check(check, event),
                None => Ok(true),
            };
            match matched {
                Ok(true) => {
                    let _ = waiter.tx.send(Ok(Arc::clone(event)));
                }
                Ok(false) => remaining.push(waiter),
                Err(e) => {
                    let _ = waiter.tx.send(Err(Error::Check(e)));
                }
            }
        }

        if remaining.is_empty() {
            return;
        }
        let mut waiters = lock(&self.waiters);
        let bucket = waiters.entry(event_type).or_default();
        remaining.append(bucket);
        *bucket = remaining;
    }

    /// Pending waiters registered at exactly `event_type`.
    pub fn waiter_count(&self, event_type: EventType) -> usize {
        lock(&self.waiters).get(&event_type).map_or(0, Vec::len)
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        lock(&self.listeners).get(&event_type).map_or(0, Vec::len)
    }
}

/// Evaluate a waiter predicate; a panic becomes that waiter's error.
fn run_check(check: &Check, event: &Event) -> Result<bool, BoxError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| check(event))) {
        Ok(matched) => matched,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(event = ?event, panic = %message, "Waiter check panicked");
            Err(format!("check panicked: {message}").into())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic>".to_string())
}

async fn call_listener(listener: Listener, event: Arc<Event>) {
    let outcome = AssertUnwindSafe(async { listener(Arc::clone(&event)).await })
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(event = ?event, error = ?e, "Ignoring exception in event listener");
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(event = ?event, panic = %message, "Event listener panicked");
        }
    }
}
