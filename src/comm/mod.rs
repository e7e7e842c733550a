use std::sync::Arc;

pub mod log;
pub mod message;
pub mod queue;

pub use log::MessageLog;
pub use message::{Message, MessageKind};
pub use queue::MessageQueue;

/// Delivery sink for engine status messages. Implementations are shared
/// across threads; `send` must return promptly (buffer or drop, the policy
/// is fixed at construction) and a failed delivery never fails the engine.
pub trait CommChannel: Send + Sync {
    fn send(&self, message: Message);

    /// Polled by the script watchdog between instruction batches. Returning
    /// `true` requests cooperative termination of the running sequence.
    fn termination_requested(&self) -> bool;
}

pub(crate) fn post(comm: Option<&Arc<dyn CommChannel>>, message: Message) {
    if let Some(comm) = comm {
        comm.send(message);
    }
}
