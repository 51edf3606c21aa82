//! # Receive Loop
//!
//! `worker_count` tokio tasks polling the input queue. Each worker claims a message, hands it
//! to the [`MessageDispatcher`] inside the claim's unit of work and commits or rolls back
//! depending on the outcome, then polls again right away. Empty polls, and polls that failed
//! before claiming anything, wait according to the [`BackoffPolicy`].

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BackoffConfig;
use crate::events::{EventPublisher, TransportEventKind};
use crate::messaging::receiver::DequeueEngine;
use crate::pipeline::MessageDispatcher;
use crate::transport::backoff::BackoffPolicy;
use crate::transport::reaper::ExpiredMessageReaper;

/// Result of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// A message was claimed and its unit of work finished, whatever the dispatch result
    Processed,
    Empty,
    /// The claim itself failed; treated like an empty poll
    Failed,
}

/// Claim one message from `queue` and run it through `dispatcher`
pub(crate) async fn poll_once(
    engine: &DequeueEngine,
    queue: &str,
    dispatcher: &dyn MessageDispatcher,
    events: &EventPublisher,
    worker_id: usize,
) -> PollOutcome {
    let mut received = match engine.try_receive(queue).await {
        Ok(Some(received)) => received,
        Ok(None) => return PollOutcome::Empty,
        Err(e) => {
            let transient = e.is_transient();
            if transient {
                warn!(worker_id, queue = %queue, error = %e, "Receive failed, backing off");
            } else {
                error!(worker_id, queue = %queue, error = %e, "Receive failed");
            }
            events.publish(TransportEventKind::ReceiveFailed {
                queue: queue.to_string(),
                error: e.to_string(),
                transient,
            });
            return PollOutcome::Failed;
        }
    };

    let sequence_id = received.message().sequence_id;
    let outcome = {
        let (message, connection) = received.parts();
        AssertUnwindSafe(dispatcher.dispatch_in(message, connection))
            .catch_unwind()
            .await
    };

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(_) => Some("dispatcher panicked".to_string()),
    };

    match failure {
        None => {
            if let Err(e) = received.complete().await {
                // The commit did not happen, so the row is still queued.
                warn!(worker_id, sequence_id, error = %e, "Failed to commit consumed message");
                events.publish(TransportEventKind::ReceiveFailed {
                    queue: queue.to_string(),
                    error: e.to_string(),
                    transient: e.is_transient(),
                });
            }
        }
        Some(reason) => {
            warn!(worker_id, sequence_id, error = %reason, "Dispatch failed, rolling back");
            events.publish(TransportEventKind::DispatchFailed {
                queue: queue.to_string(),
                sequence_id,
                error: reason,
            });
            if let Err(e) = received.abandon().await {
                warn!(worker_id, sequence_id, error = %e, "Rollback after failed dispatch failed");
            }
        }
    }

    PollOutcome::Processed
}

#[derive(Debug)]
pub(crate) struct LoopState {
    running: AtomicBool,
    shutdown_notify: Notify,
}

impl LoopState {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            shutdown_notify: Notify::new(),
        }
    }

    pub(crate) fn should_continue(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.shutdown_notify.notify_waiters();
    }

    /// Sleep for `wait` unless a stop is requested first. Returns `false` on stop.
    ///
    /// The waiter registers before the flag is read, so a stop requested while the caller
    /// was busy polling is never missed.
    pub(crate) async fn pause(&self, wait: Duration) -> bool {
        let notified = self.shutdown_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.should_continue() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(wait) => self.should_continue(),
            _ = notified => false,
        }
    }
}

/// Handle to the running workers of one transport
#[derive(Debug)]
pub struct ReceiveLoop {
    state: Arc<LoopState>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    queue: String,
}

impl ReceiveLoop {
    pub(crate) fn start(
        engine: DequeueEngine,
        queue: String,
        dispatcher: Arc<dyn MessageDispatcher>,
        backoff: BackoffConfig,
        worker_count: usize,
        events: EventPublisher,
        reaper: Option<ExpiredMessageReaper>,
    ) -> Self {
        let state = Arc::new(LoopState::new());

        let mut handles = Vec::with_capacity(worker_count + 1);
        for worker_id in 0..worker_count {
            let state = Arc::clone(&state);
            let engine = engine.clone();
            let queue = queue.clone();
            let dispatcher = Arc::clone(&dispatcher);
            let backoff = BackoffPolicy::new(backoff.clone());
            let events = events.clone();

            handles.push(tokio::spawn(async move {
                run_worker(worker_id, state, engine, queue, dispatcher, backoff, events).await;
            }));
        }

        if let Some(reaper) = reaper {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move { reaper.run(state).await }));
        }

        info!(queue = %queue, worker_count, "Receive loop started");
        Self {
            state,
            handles: Mutex::new(handles),
            queue,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.should_continue()
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Stop polling and wait for in-flight messages to be committed or rolled back
    pub async fn stop(&self) {
        self.state.request_stop();

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(queue = %self.queue, error = %e, "Receive task ended abnormally");
            }
        }
        info!(queue = %self.queue, "Receive loop stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    state: Arc<LoopState>,
    engine: DequeueEngine,
    queue: String,
    dispatcher: Arc<dyn MessageDispatcher>,
    mut backoff: BackoffPolicy,
    events: EventPublisher,
) {
    debug!(worker_id, queue = %queue, "Receive worker started");

    while state.should_continue() {
        match poll_once(&engine, &queue, dispatcher.as_ref(), &events, worker_id).await {
            PollOutcome::Processed => {
                backoff.reset();
                continue;
            }
            PollOutcome::Empty | PollOutcome::Failed => {}
        }

        if !state.pause(backoff.next_delay()).await {
            debug!(worker_id, "Shutdown requested while idle");
            break;
        }
    }

    debug!(worker_id, queue = %queue, "Receive worker stopped");
}
