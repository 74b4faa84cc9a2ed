//! Local fan-out channel.
//!
//! An in-process publish/subscribe bus shared by every context of one learner.
//! Carries leader heartbeats and, when no durable store is configured, full
//! state updates. Delivery is best effort: a slow subscriber may lag and lose
//! messages, which the protocol tolerates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::ids::ContextId;
use super::leadership::LeadershipClaim;
use crate::timer::SessionState;

/// Messages exchanged between contexts on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    LeaderHeartbeat {
        sender: ContextId,
        timestamp: DateTime<Utc>,
        sequence: u64,
    },
    /// Full state, only sent when no durable store is configured.
    StateUpdate {
        sender: ContextId,
        timestamp: DateTime<Utc>,
        sequence: u64,
        payload: SessionState,
    },
    /// Leader is going away; followers may re-elect without waiting out the
    /// silence window.
    Resign {
        sender: ContextId,
        timestamp: DateTime<Utc>,
        sequence: u64,
    },
}

impl ChannelMessage {
    pub fn heartbeat(claim: &LeadershipClaim) -> Self {
        ChannelMessage::LeaderHeartbeat {
            sender: claim.holder.clone(),
            timestamp: claim.timestamp,
            sequence: claim.sequence,
        }
    }

    pub fn sender(&self) -> &ContextId {
        match self {
            ChannelMessage::LeaderHeartbeat { sender, .. }
            | ChannelMessage::StateUpdate { sender, .. }
            | ChannelMessage::Resign { sender, .. } => sender,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            ChannelMessage::LeaderHeartbeat { sequence, .. }
            | ChannelMessage::StateUpdate { sequence, .. }
            | ChannelMessage::Resign { sequence, .. } => *sequence,
        }
    }
}

/// Sending half of the bus. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FanoutBus {
    tx: broadcast::Sender<ChannelMessage>,
    /// Highest sequence ever published on this bus.
    high_water: Arc<AtomicU64>,
}

impl FanoutBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            high_water: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish to every subscriber. Returns how many subscribers were reached.
    pub fn publish(&self, message: ChannelMessage) -> usize {
        self.high_water.fetch_max(message.sequence(), Ordering::Relaxed);
        // No subscribers is not an error: the sender may be the only context.
        self.tx.send(message).unwrap_or(0)
    }

    /// Subscribe on behalf of `me`; messages `me` sent are filtered out.
    pub fn subscribe(&self, me: ContextId) -> Subscription {
        Subscription {
            me,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Highest sequence published so far, so a late joiner can outrank the
    /// current leader when it claims.
    pub fn high_water(&self) -> u64 {
        self.high_water.load(Ordering::Relaxed)
    }
}

/// Receiving half owned by one context.
#[derive(Debug)]
pub struct Subscription {
    me: ContextId,
    rx: broadcast::Receiver<ChannelMessage>,
}

impl Subscription {
    /// Next pending message from another context, without waiting.
    pub fn try_next(&mut self) -> Option<ChannelMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if msg.sender() == &self.me => continue,
                Ok(msg) => return Some(msg),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(context = %self.me, skipped, "fan-out subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next message from another context.
    ///
    /// Returns `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<ChannelMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if msg.sender() == &self.me => continue,
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(context = %self.me, skipped, "fan-out subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn id(s: &str) -> ContextId {
        ContextId::parse(s).unwrap()
    }

    fn heartbeat(sender: &str, sequence: u64) -> ChannelMessage {
        ChannelMessage::LeaderHeartbeat {
            sender: id(sender),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            sequence,
        }
    }

    #[test]
    fn own_messages_are_filtered() {
        let bus = FanoutBus::new(16);
        let mut a = bus.subscribe(id("ctx-a"));
        let mut b = bus.subscribe(id("ctx-b"));

        assert_eq!(bus.publish(heartbeat("ctx-a", 1)), 2);
        assert!(a.try_next().is_none());
        assert_eq!(b.try_next(), Some(heartbeat("ctx-a", 1)));
        assert!(b.try_next().is_none());
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let bus = FanoutBus::new(4);
        assert_eq!(bus.publish(heartbeat("ctx-a", 1)), 0);
    }

    #[test]
    fn lagging_subscriber_skips_ahead() {
        let bus = FanoutBus::new(2);
        let mut b = bus.subscribe(id("ctx-b"));
        for seq in 1..=5 {
            bus.publish(heartbeat("ctx-a", seq));
        }
        let seen: Vec<u64> = std::iter::from_fn(|| b.try_next())
            .map(|m| m.sequence())
            .collect();
        assert_eq!(seen, vec![4, 5]);
    }

    #[test]
    fn high_water_tracks_the_largest_sequence() {
        let bus = FanoutBus::new(4);
        assert_eq!(bus.high_water(), 0);
        bus.publish(heartbeat("ctx-a", 7));
        bus.publish(heartbeat("ctx-b", 3));
        assert_eq!(bus.clone().high_water(), 7);
    }

    #[test]
    fn wire_format_is_tagged() {
        let json = serde_json::to_value(heartbeat("ctx-a", 3)).unwrap();
        assert_eq!(json["type"], "leader_heartbeat");
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["sender"], "ctx-a");
    }

    #[tokio::test]
    async fn next_waits_for_other_senders() {
        let bus = FanoutBus::new(8);
        let mut b = bus.subscribe(id("ctx-b"));
        bus.publish(heartbeat("ctx-b", 1));
        bus.publish(heartbeat("ctx-a", 2));
        assert_eq!(b.next().await.map(|m| m.sequence()), Some(2));
    }
}
