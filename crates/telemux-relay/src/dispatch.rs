//! Bounded single-producer/single-consumer hand-off between the datagram
//! ingestor and the broadcaster.
//!
//! ```text
//! ingestor ──send()──► [ capacity slots ] ──recv()──► broadcaster
//! ```
//!
//! `send` suspends while every slot is occupied, so a slow broadcast pass
//! pushes back on the ingestor instead of dropping messages. Sequence numbers
//! are assigned here, which makes the dispatcher the single point defining
//! broadcast order.

use bytes::Bytes;
use tokio::sync::mpsc;

/// One relayed telemetry payload.
///
/// Cloning is cheap: the payload is reference counted and shared by every
/// consumer it is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sequence: u64,
    payload: Bytes,
}

impl Message {
    pub const fn new(sequence: u64, payload: Bytes) -> Self {
        Self { sequence, payload }
    }

    /// Position of this message in the ingest order, starting at 1.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// The broadcaster side is gone; nothing will ever drain the queue again.
#[derive(Debug, thiserror::Error)]
#[error("dispatcher closed, message {sequence} was not delivered")]
pub struct DispatchError {
    pub sequence: u64,
}

/// Create a dispatcher holding at most `capacity` messages (minimum 1).
pub fn channel(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        DispatchSender {
            tx,
            next_sequence: 1,
        },
        DispatchReceiver { rx },
    )
}

/// Producer half. Deliberately not `Clone`: the relay has exactly one
/// producer.
#[derive(Debug)]
pub struct DispatchSender {
    tx: mpsc::Sender<Message>,
    next_sequence: u64,
}

impl DispatchSender {
    /// Queue `payload` for broadcast, waiting for a free slot.
    ///
    /// Returns the sequence number assigned to the message.
    pub async fn send(&mut self, payload: Bytes) -> Result<u64, DispatchError> {
        let sequence = self.next_sequence;
        self.tx
            .send(Message::new(sequence, payload))
            .await
            .map_err(|_| DispatchError { sequence })?;
        self.next_sequence += 1;
        Ok(sequence)
    }
}

/// Consumer half, owned by the broadcaster.
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: mpsc::Receiver<Message>,
}

impl DispatchReceiver {
    /// Wait for the next message. `None` once the sender is dropped and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Number of messages still queued behind the one just received.
    pub(crate) fn backlog(&self) -> usize {
        self.rx.len()
    }
}
