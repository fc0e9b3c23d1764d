//! Per-owner serialized execution context.
//!
//! Every stateful owner (the hub, each connection) consumes exactly one
//! mailbox from exactly one task. Work submitted to an owner therefore runs
//! one message at a time, and messages from one sender run in the order they
//! were submitted. Distinct owners run concurrently on the tokio worker pool.
//!
//! Three submission modes:
//!
//! - [`Mailbox::tell`] - enqueue without suspending. Fails with
//!   `MailboxFull` if the queue is full. Used for hub → connection fan-out,
//!   where the hub must never wait on a slow recipient; the hub evicts a
//!   recipient it could not reach instead of leaving a gap in its stream.
//! - [`Mailbox::post`] - enqueue, suspending only until there is room in the
//!   queue (never until the message is handled). Used for connection → hub
//!   traffic that must not be lost.
//! - [`Mailbox::ask`] - the blocking-call bridge: enqueue a message carrying a
//!   `oneshot` reply channel and suspend until the owner has handled it.
//!
//! # Invariant
//!
//! An owner must never `ask` its own mailbox: the reply could only be
//! produced by the task that is waiting for it. This is upheld by
//! construction. Owners never hold an asking handle to themselves, and the
//! handle given to connections (`HubLink`) exposes no `ask` operations.

use crate::errors::RelayError;

use super::metrics::{ActorType, MailboxMonitor};

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Create a bounded mailbox for one owner.
#[must_use]
pub fn mailbox<M>(
    actor_type: ActorType,
    actor_id: impl Into<String>,
    capacity: usize,
) -> (Mailbox<M>, MailboxReceiver<M>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let monitor = Arc::new(MailboxMonitor::new(actor_type, actor_id));

    (
        Mailbox {
            sender,
            monitor: Arc::clone(&monitor),
        },
        MailboxReceiver { receiver, monitor },
    )
}

/// Sending side of an owner's mailbox. Cheap to clone.
#[derive(Debug)]
pub struct Mailbox<M> {
    sender: mpsc::Sender<M>,
    monitor: Arc<MailboxMonitor>,
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            monitor: Arc::clone(&self.monitor),
        }
    }
}

impl<M> Mailbox<M> {
    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// - `RelayError::MailboxFull` if the queue is at capacity (the message is dropped)
    /// - `RelayError::ActorGone` if the owner has stopped
    pub fn tell(&self, message: M) -> Result<(), RelayError> {
        self.monitor.record_enqueue();
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.monitor.record_cancel();
                self.monitor.record_drop();
                Err(RelayError::MailboxFull(self.monitor.actor_type().as_str()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.monitor.record_cancel();
                Err(RelayError::ActorGone(self.monitor.actor_type().as_str()))
            }
        }
    }

    /// Enqueue, waiting for queue space if necessary.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ActorGone` if the owner has stopped.
    pub async fn post(&self, message: M) -> Result<(), RelayError> {
        self.monitor.record_enqueue();
        self.sender.send(message).await.map_err(|_| {
            self.monitor.record_cancel();
            RelayError::ActorGone(self.monitor.actor_type().as_str())
        })
    }

    /// Submit a request and wait for the owner's reply.
    ///
    /// Must only be called from outside the owner's own task.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ActorGone` if the owner stopped before replying.
    pub async fn ask<R>(
        &self,
        make_message: impl FnOnce(oneshot::Sender<R>) -> M,
    ) -> Result<R, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.post(make_message(tx)).await?;

        rx.await
            .map_err(|_| RelayError::ActorGone(self.monitor.actor_type().as_str()))
    }

    /// Queue statistics for this mailbox.
    #[must_use]
    pub fn monitor(&self) -> &MailboxMonitor {
        &self.monitor
    }
}

/// Consuming side of an owner's mailbox. Held by the owner's task only.
#[derive(Debug)]
pub struct MailboxReceiver<M> {
    receiver: mpsc::Receiver<M>,
    monitor: Arc<MailboxMonitor>,
}

impl<M> MailboxReceiver<M> {
    /// Receive the next message. Returns `None` once every sender is gone.
    ///
    /// Cancel-safe: usable as a `tokio::select!` branch.
    pub async fn recv(&mut self) -> Option<M> {
        let message = self.receiver.recv().await;
        if message.is_some() {
            self.monitor.record_dequeue();
        }
        message
    }

    /// Stop accepting new messages; already queued ones can still be drained.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Queue statistics for this mailbox.
    #[must_use]
    pub fn monitor(&self) -> &MailboxMonitor {
        &self.monitor
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug)]
    enum TestMessage {
        Push(u32),
        Sum { respond_to: oneshot::Sender<u32> },
    }

    /// Minimal owner: sums pushed values, answers `Sum` requests.
    fn spawn_summer(capacity: usize) -> Mailbox<TestMessage> {
        let (mailbox, mut receiver) = mailbox(ActorType::Hub, "summer", capacity);
        tokio::spawn(async move {
            let mut total = 0;
            while let Some(message) = receiver.recv().await {
                match message {
                    TestMessage::Push(value) => total += value,
                    TestMessage::Sum { respond_to } => {
                        let _ = respond_to.send(total);
                    }
                }
            }
        });
        mailbox
    }

    #[tokio::test]
    async fn test_ask_sees_all_prior_tells_from_same_sender() {
        let mailbox = spawn_summer(16);

        for value in 1..=10 {
            mailbox.tell(TestMessage::Push(value)).unwrap();
        }

        let sum = mailbox
            .ask(|respond_to| TestMessage::Sum { respond_to })
            .await
            .unwrap();
        assert_eq!(sum, 55);
    }

    #[tokio::test]
    async fn test_tell_preserves_fifo_order() {
        let (mailbox, mut receiver) = mailbox::<u32>(ActorType::Connection, "fifo", 8);

        for value in 0..5 {
            mailbox.tell(value).unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..5 {
            received.push(receiver.recv().await.unwrap());
        }
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
        assert_eq!(receiver.monitor().stats().processed, 5);
        assert_eq!(receiver.monitor().stats().depth, 0);
    }

    #[tokio::test]
    async fn test_tell_on_full_mailbox_drops_message() {
        let (mailbox, _receiver) = mailbox::<u32>(ActorType::Connection, "full", 2);

        mailbox.tell(1).unwrap();
        mailbox.tell(2).unwrap();
        let result = mailbox.tell(3);

        assert!(matches!(result, Err(RelayError::MailboxFull("connection"))));
        assert_eq!(mailbox.monitor().stats().dropped, 1);
        assert_eq!(mailbox.monitor().stats().depth, 2);
    }

    #[tokio::test]
    async fn test_tell_after_owner_stopped_reports_actor_gone() {
        let (mailbox, receiver) = mailbox::<u32>(ActorType::Connection, "gone", 2);
        drop(receiver);

        assert!(matches!(
            mailbox.tell(1),
            Err(RelayError::ActorGone("connection"))
        ));
        assert!(matches!(
            mailbox.post(1).await,
            Err(RelayError::ActorGone("connection"))
        ));
    }

    #[tokio::test]
    async fn test_ask_fails_when_owner_drops_reply() {
        let (mailbox, mut receiver) = mailbox::<TestMessage>(ActorType::Hub, "dropper", 2);
        tokio::spawn(async move {
            // Consume the request without answering
            let _ = receiver.recv().await;
        });

        let result = mailbox
            .ask(|respond_to| TestMessage::Sum { respond_to })
            .await;
        assert!(matches!(result, Err(RelayError::ActorGone("hub"))));
    }

    #[tokio::test]
    async fn test_post_waits_for_capacity() {
        let (mailbox, mut receiver) = mailbox::<u32>(ActorType::Hub, "post", 1);
        mailbox.post(1).await.unwrap();

        let sender = mailbox.clone();
        let pending = tokio::spawn(async move { sender.post(2).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());

        assert_eq!(receiver.recv().await, Some(1));
        pending.await.unwrap().unwrap();
        assert_eq!(receiver.recv().await, Some(2));
    }
}
