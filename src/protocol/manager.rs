use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::sync::oneshot::Sender;

use crate::protocol::dispatch::DeliveryAck;

pub(crate) struct PendingDelivery {
    ts: Instant,
    sender: Sender<DeliveryAck>,
}

/// Messages handed to the firmware link that have not been acknowledged yet,
/// keyed by transaction id.
pub(crate) struct AckManager {
    pending: DashMap<u32, PendingDelivery>,
    timeout: u64,
}

impl Default for AckManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AckManager {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            timeout: 10,
        }
    }

    pub fn register(&self, id: u32) -> oneshot::Receiver<DeliveryAck> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, PendingDelivery { sender: tx, ts: Instant::now() });
        rx
    }

    pub fn sweep_stale(&self) {
        let stale: Vec<u32> = self
            .pending
            .iter()
            .filter(|i| i.value().ts.elapsed().as_secs() > self.timeout)
            .map(|i| *i.key())
            .collect();
        for id in stale {
            self.pending.remove(&id);
        }
    }

    pub fn complete(&self, id: u32, ack: DeliveryAck) -> bool {
        if let Some((_, pending)) = self.pending.remove(&id) {
            pending.sender.send(ack).is_ok()
        } else {
            false
        }
    }
}
