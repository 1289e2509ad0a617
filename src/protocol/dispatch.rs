use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::protocol::manager::AckManager;
use crate::protocol::messages::DeviceMessage;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Firmware link rejected the message: {0}")]
    Link(String),
    #[error("Message {0} was not acknowledged in time")]
    AckTimeout(u32),
    #[error("Firmware reported delivery failure: {0}")]
    Nack(String),
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Outcome of a single delivery, reported back from the firmware side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAck {
    Success,
    Failure(String),
}

/// Completion handle handed to the firmware link alongside each message.
/// Whoever carries the message to the watch settles the pending transaction
/// through it, once.
#[derive(Clone)]
pub struct AckHandle {
    acks: Arc<AckManager>,
}

impl AckHandle {
    pub fn success(&self, transaction_id: u32) -> bool {
        self.acks.complete(transaction_id, DeliveryAck::Success)
    }

    pub fn failure(&self, transaction_id: u32, reason: impl Into<String>) -> bool {
        self.acks
            .complete(transaction_id, DeliveryAck::Failure(reason.into()))
    }
}

/// Transport seam towards the watch firmware. `deliver` only queues the
/// message; the outcome arrives later through the `AckHandle`.
#[async_trait]
pub trait FirmwareLink: Send + Sync {
    async fn deliver(
        &self,
        transaction_id: u32,
        message: &DeviceMessage,
        ack: AckHandle,
    ) -> Result<(), DispatchError>;
}

/// How hard to push a message before giving up.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub ack_timeout: Duration,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    /// Single attempt, no backoff.
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ack_timeout: Duration::from_secs(5),
            base_backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Three attempts with jittered exponential backoff.
    pub fn hardened() -> Self {
        RetryPolicy {
            max_attempts: 3,
            ack_timeout: Duration::from_secs(5),
            base_backoff: Duration::from_millis(250),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        if self.base_backoff.is_zero() {
            return Duration::ZERO;
        }
        let pause = self.base_backoff * 2u32.saturating_pow(attempt);
        let jitter = rand::rng().random_range(0..=pause.as_millis() as u64 / 2);
        pause + Duration::from_millis(jitter)
    }
}

/// Sends device messages over a firmware link and waits for each delivery to
/// be acknowledged, retrying per the policy. Every attempt gets a fresh
/// transaction id.
pub struct Dispatcher {
    link: Arc<dyn FirmwareLink>,
    acks: Arc<AckManager>,
    transaction_id: AtomicU32,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(link: Arc<dyn FirmwareLink>, policy: RetryPolicy) -> Self {
        Dispatcher {
            link,
            acks: Arc::new(AckManager::new()),
            transaction_id: AtomicU32::new(1),
            policy,
        }
    }

    pub async fn send(&self, message: &DeviceMessage) -> Result<(), DispatchError> {
        let mut last = String::new();
        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                let pause = self.policy.backoff(attempt - 1);
                debug!("Retrying send in {:?} (attempt {})", pause, attempt + 1);
                tokio::time::sleep(pause).await;
            }

            let tid = self.transaction_id.fetch_add(1, Ordering::Relaxed);
            let receiver = self.acks.register(tid);
            let handle = AckHandle {
                acks: Arc::clone(&self.acks),
            };
            if let Err(e) = self.link.deliver(tid, message, handle).await {
                warn!("Delivery attempt {} failed: {}", attempt + 1, e);
                last = e.to_string();
                self.acks.sweep_stale();
                continue;
            }

            match timeout(self.policy.ack_timeout, receiver).await {
                Ok(Ok(DeliveryAck::Success)) => {
                    info!("Message {} acknowledged by firmware", tid);
                    return Ok(());
                }
                Ok(Ok(DeliveryAck::Failure(reason))) => {
                    warn!("Firmware rejected message {}: {}", tid, reason);
                    last = DispatchError::Nack(reason).to_string();
                }
                Ok(Err(_)) => {
                    last = format!("ack channel closed for message {tid}");
                }
                Err(_) => {
                    warn!(
                        "No acknowledgment for message {} within {:?}",
                        tid, self.policy.ack_timeout
                    );
                    last = DispatchError::AckTimeout(tid).to_string();
                }
            }
            self.acks.sweep_stale();
        }
        error!(
            "Dispatch failed after {} attempts: {}",
            self.policy.max_attempts, last
        );
        Err(DispatchError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last,
        })
    }
}

/// One message handed to the channel transport, with its completion handle.
pub struct Delivery {
    pub transaction_id: u32,
    pub message: DeviceMessage,
    pub ack: AckHandle,
}

/// Link that forwards messages over an in-process channel, standing in for
/// the bluetooth transport in tests and dry runs.
pub struct ChannelLink {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelLink {
    pub fn new(tx: mpsc::Sender<Delivery>) -> Self {
        ChannelLink { tx }
    }
}

#[async_trait]
impl FirmwareLink for ChannelLink {
    async fn deliver(
        &self,
        transaction_id: u32,
        message: &DeviceMessage,
        ack: AckHandle,
    ) -> Result<(), DispatchError> {
        self.tx
            .send(Delivery {
                transaction_id,
                message: message.clone(),
                ack,
            })
            .await
            .map_err(|e| DispatchError::Link(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsRecord;

    fn message() -> DeviceMessage {
        let record = SettingsRecord {
            colorbg: Some("ff0000".to_string()),
            shadows: Some("true".to_string()),
            ..SettingsRecord::default()
        };
        DeviceMessage::try_from(&record).unwrap()
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ack_timeout: Duration::from_millis(100),
            base_backoff: Duration::ZERO,
        }
    }

    /// Acks every delivery with the same outcome, counting deliveries.
    struct FixedLink {
        outcome: DeliveryAck,
        deliveries: AtomicU32,
    }

    impl FixedLink {
        fn new(outcome: DeliveryAck) -> Self {
            FixedLink {
                outcome,
                deliveries: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FirmwareLink for FixedLink {
        async fn deliver(
            &self,
            transaction_id: u32,
            _message: &DeviceMessage,
            ack: AckHandle,
        ) -> Result<(), DispatchError> {
            self.deliveries.fetch_add(1, Ordering::Relaxed);
            match &self.outcome {
                DeliveryAck::Success => ack.success(transaction_id),
                DeliveryAck::Failure(reason) => ack.failure(transaction_id, reason.clone()),
            };
            Ok(())
        }
    }

    /// Nacks until the remaining budget hits zero, then acks.
    struct FlakyLink {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl FirmwareLink for FlakyLink {
        async fn deliver(
            &self,
            transaction_id: u32,
            _message: &DeviceMessage,
            ack: AckHandle,
        ) -> Result<(), DispatchError> {
            let left = self.failures_left.load(Ordering::Relaxed);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::Relaxed);
                ack.failure(transaction_id, "busy");
            } else {
                ack.success(transaction_id);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn acknowledged_delivery_succeeds() {
        let link = Arc::new(FixedLink::new(DeliveryAck::Success));
        let dispatcher = Dispatcher::new(Arc::clone(&link) as Arc<dyn FirmwareLink>, quick_policy(1));
        dispatcher.send(&message()).await.unwrap();
        assert_eq!(link.deliveries.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn persistent_failure_exhausts_the_attempt_budget() {
        let link = Arc::new(FixedLink::new(DeliveryAck::Failure("busy".to_string())));
        let dispatcher = Dispatcher::new(Arc::clone(&link) as Arc<dyn FirmwareLink>, quick_policy(3));
        let err = dispatcher.send(&message()).await.unwrap_err();
        assert!(matches!(err, DispatchError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(link.deliveries.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_budget() {
        let link = Arc::new(FlakyLink {
            failures_left: AtomicU32::new(2),
        });
        let dispatcher = Dispatcher::new(link as Arc<dyn FirmwareLink>, quick_policy(3));
        dispatcher.send(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn silent_link_times_out() {
        struct MuteLink;

        #[async_trait]
        impl FirmwareLink for MuteLink {
            async fn deliver(
                &self,
                _transaction_id: u32,
                _message: &DeviceMessage,
                _ack: AckHandle,
            ) -> Result<(), DispatchError> {
                Ok(())
            }
        }

        let dispatcher = Dispatcher::new(Arc::new(MuteLink), quick_policy(1));
        let err = dispatcher.send(&message()).await.unwrap_err();
        assert!(matches!(err, DispatchError::RetriesExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn channel_link_round_trip() {
        let (tx, mut rx) = mpsc::channel(4);
        let dispatcher = Dispatcher::new(Arc::new(ChannelLink::new(tx)), quick_policy(1));

        let watch = tokio::spawn(async move {
            let delivery = rx.recv().await.unwrap();
            assert_eq!(delivery.message.colorbg, 16711680);
            delivery.ack.success(delivery.transaction_id);
        });

        dispatcher.send(&message()).await.unwrap();
        watch.await.unwrap();
    }
}
