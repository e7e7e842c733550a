use super::{CommChannel, Message};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

/// Bounded in-memory message sink. `send` never blocks: when the buffer is
/// full the message is dropped and counted. The queue also carries the
/// inbound termination request polled by running scripts.
#[derive(Debug)]
pub struct MessageQueue {
    sender: SyncSender<Message>,
    dropped: AtomicU64,
    termination_requested: AtomicBool,
}

impl MessageQueue {
    /// Creates a queue holding at most `capacity` undelivered messages and
    /// the receiving end for the embedding application.
    pub fn bounded(capacity: usize) -> (Arc<Self>, Receiver<Message>) {
        let (sender, receiver) = sync_channel(capacity);
        let queue = Arc::new(Self {
            sender,
            dropped: AtomicU64::new(0),
            termination_requested: AtomicBool::new(false),
        });
        (queue, receiver)
    }

    /// Asks the running sequence to stop at its next watchdog tick.
    pub fn request_termination(&self) {
        self.termination_requested.store(true, Ordering::Relaxed);
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl CommChannel for MessageQueue {
    fn send(&self, message: Message) {
        if self.sender.try_send(message).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn termination_requested(&self) -> bool {
        self.termination_requested.load(Ordering::Relaxed)
    }
}
