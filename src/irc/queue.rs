//! Outbound queue with burst-then-throttle pacing.
//!
//! Replies are queued by the receive loop and written by a background sender
//! task. After the queue has been quiet for `burst_timeout`, up to
//! `burst_size` messages go out back to back; while it stays busy, one
//! message goes out per `interval`. This keeps the bot under typical server
//! flood limits.

use crate::irc::connection::LineWriter;
use crate::irc::message::ProtocolMessage;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Pacing parameters for the sender task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub burst_size: usize,
    pub burst_timeout: Duration,
    pub interval: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            burst_size: 5,
            burst_timeout: Duration::from_secs(10),
            interval: Duration::from_millis(800),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<ProtocolMessage>,
    last_send: Option<Instant>,
    stopped: bool,
}

/// FIFO of content messages waiting to be written.
///
/// All state lives under one lock; `wakeup` plays the role of the
/// condition variable the sender waits on.
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    wakeup: Notify,
    pacing: Pacing,
}

impl OutboundQueue {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wakeup: Notify::new(),
            pacing,
        }
    }

    #[cfg(test)]
    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Append `messages` to the tail, in order, and wake the sender.
    /// Messages enqueued after [`OutboundQueue::shutdown`] are dropped.
    pub async fn enqueue<I>(&self, messages: I)
    where
        I: IntoIterator<Item = ProtocolMessage>,
    {
        let mut state = self.state.lock().await;
        if state.stopped {
            debug!("Outbound queue is shut down, dropping messages");
            return;
        }
        state.messages.extend(messages);
        drop(state);
        self.wakeup.notify_one();
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    /// Raise the stop signal, drop everything still queued, and wake the
    /// sender so it can exit.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.stopped = true;
        let dropped = state.messages.len();
        state.messages.clear();
        drop(state);
        if dropped > 0 {
            debug!(dropped, "Flushed outbound queue");
        }
        self.wakeup.notify_one();
    }

    /// Wait for work and take the next batch off the head of the queue.
    /// Returns `None` once the queue has been shut down.
    async fn next_batch(&self) -> Option<Vec<ProtocolMessage>> {
        loop {
            {
                let mut state = self.state.lock().await;
                if state.stopped && state.messages.is_empty() {
                    return None;
                }
                if !state.messages.is_empty() {
                    let fresh_burst = state
                        .last_send
                        .map_or(true, |last| last.elapsed() >= self.pacing.burst_timeout);
                    let take = if fresh_burst {
                        self.pacing.burst_size.max(1).min(state.messages.len())
                    } else {
                        1
                    };
                    return Some(state.messages.drain(..take).collect());
                }
            }
            self.wakeup.notified().await;
        }
    }

    async fn mark_sent(&self) {
        self.state.lock().await.last_send = Some(Instant::now());
    }

    /// Sender loop: drain the queue through `writer` until shut down.
    ///
    /// The pacing sleep happens outside the lock, so enqueues never wait on
    /// it. A stop request is noticed at the next wake-up.
    pub async fn run_sender(self: Arc<Self>, writer: Arc<LineWriter>) {
        while let Some(batch) = self.next_batch().await {
            for msg in &batch {
                if let Err(e) = writer.send(msg, false).await {
                    warn!("Failed to send queued message: {}", e);
                }
            }
            self.mark_sent().await;
            tokio::time::sleep(self.pacing.interval).await;
        }
        debug!("Outbound sender stopped");
    }

    pub fn spawn_sender(self: &Arc<Self>, writer: Arc<LineWriter>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_sender(writer))
    }
}
