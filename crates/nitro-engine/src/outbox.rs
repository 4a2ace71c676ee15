//! Outbound message dispatch.

use crate::messaging::MessageService;
use nitro_protocols::Message;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Sends messages on detached tasks so the engine never waits on a peer.
///
/// At most `max_in_flight` sends run at once; delivery order is not preserved.
pub(crate) struct Outbox {
    service: Arc<dyn MessageService>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl Outbox {
    pub(crate) fn new(service: Arc<dyn MessageService>, max_in_flight: usize) -> Self {
        Self {
            service,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Queues `message`, waiting for a free slot if too many sends are in flight.
    pub(crate) async fn dispatch(&mut self, message: Message) {
        while let Some(finished) = self.tasks.try_join_next() {
            if let Err(e) = finished {
                tracing::warn!(error = %e, "message task failed");
            }
        }

        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(to = %message.to, "outbox closed, dropping message");
                return;
            }
        };
        let service = Arc::clone(&self.service);
        self.tasks.spawn(async move {
            let _permit = permit;
            let to = message.to;
            if let Err(e) = service.send(message).await {
                tracing::warn!(%to, error = %e, "failed to send message");
            }
        });
    }

    /// Waits for every queued send to finish.
    pub(crate) async fn drain(&mut self) {
        while let Some(finished) = self.tasks.join_next().await {
            if let Err(e) = finished {
                tracing::warn!(error = %e, "message task failed");
            }
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MessagingError;
    use async_trait::async_trait;
    use nitro_types::Address;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageService for Recorder {
        async fn send(&self, message: Message) -> Result<(), MessagingError> {
            tokio::task::yield_now().await;
            self.sent.lock().push(message);
            Ok(())
        }
    }

    #[tokio::test]
    async fn drain_waits_for_every_send() {
        let recorder = Arc::new(Recorder::default());
        let mut outbox = Outbox::new(recorder.clone(), 2);
        for i in 0..5u8 {
            let message = Message::new(Address::ZERO, Address::from_bytes([i; 20]));
            outbox.dispatch(message).await;
        }
        outbox.drain().await;

        assert_eq!(outbox.in_flight(), 0);
        let mut recipients: Vec<Address> = recorder.sent.lock().iter().map(|m| m.to).collect();
        recipients.sort();
        let expected: Vec<Address> = (0..5u8).map(|i| Address::from_bytes([i; 20])).collect();
        assert_eq!(recipients, expected);
    }
}
