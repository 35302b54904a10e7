//! In-memory message bus adapter
//!
//! Queue-group semantics: every subscriber of a (subject, group) pair shares
//! one queue, so each message is delivered to exactly one member. Nack
//! re-enqueues the payload after the requested delay.

use crate::domain::ports::{Delivery, MessageBus, Subscription};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Queue = (
    mpsc::UnboundedSender<Bytes>,
    Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>>,
);

/// Bus implementation backed by in-process queues
pub struct MemoryBus {
    queues: Mutex<HashMap<(String, String), Queue>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn queue(&self, subject: &str, group: &str) -> Queue {
        let mut queues = self.queues.lock();
        queues
            .entry((subject.to_string(), group.to_string()))
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                (tx, Arc::new(tokio::sync::Mutex::new(rx)))
            })
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        let senders: Vec<mpsc::UnboundedSender<Bytes>> = {
            let queues = self.queues.lock();
            queues
                .iter()
                .filter(|((s, _), _)| s == subject)
                .map(|(_, (tx, _))| tx.clone())
                .collect()
        };

        // One copy per queue group; undelivered subjects are dropped, the
        // way a bus with no subscribers would behave
        for sender in senders {
            let _ = sender.send(payload.clone());
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str, queue_group: &str) -> Result<Box<dyn Subscription>> {
        let (tx, rx) = self.queue(subject, queue_group);
        Ok(Box::new(MemorySubscription { rx, redeliver: tx }))
    }
}

// =============================================================================
// Subscription / Delivery
// =============================================================================

struct MemorySubscription {
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>>,
    redeliver: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Box<dyn Delivery>> {
        let payload = self.rx.lock().await.recv().await?;
        Some(Box::new(MemoryDelivery {
            payload,
            redeliver: self.redeliver.clone(),
            settled: false,
        }))
    }
}

struct MemoryDelivery {
    payload: Bytes,
    redeliver: mpsc::UnboundedSender<Bytes>,
    settled: bool,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&mut self) -> Result<()> {
        self.settled = true;
        Ok(())
    }

    async fn nack(&mut self, redeliver_after: Duration) -> Result<()> {
        if self.settled {
            return Ok(());
        }
        self.settled = true;
        let payload = self.payload.clone();
        let redeliver = self.redeliver.clone();
        tokio::spawn(async move {
            tokio::time::sleep(redeliver_after).await;
            let _ = redeliver.send(payload);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_group_delivers_once() {
        let bus = MemoryBus::new();
        let mut first = bus.subscribe("subj", "group").await.unwrap();
        let mut second = bus.subscribe("subj", "group").await.unwrap();

        bus.publish("subj", Bytes::from_static(b"one")).await.unwrap();

        // Exactly one of the two group members receives it
        let raced = tokio::select! {
            d = first.next() => d,
            d = second.next() => d,
        };
        assert_eq!(raced.unwrap().payload(), b"one");
    }

    #[tokio::test]
    async fn test_distinct_groups_each_receive() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("subj", "group-a").await.unwrap();
        let mut b = bus.subscribe("subj", "group-b").await.unwrap();

        bus.publish("subj", Bytes::from_static(b"fan")).await.unwrap();

        assert_eq!(a.next().await.unwrap().payload(), b"fan");
        assert_eq!(b.next().await.unwrap().payload(), b"fan");
    }

    #[tokio::test]
    async fn test_nack_redelivers_after_delay() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("subj", "group").await.unwrap();
        bus.publish("subj", Bytes::from_static(b"retry")).await.unwrap();

        let mut delivery = sub.next().await.unwrap();
        delivery.nack(Duration::from_millis(20)).await.unwrap();

        let redelivered = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("redelivery expected")
            .unwrap();
        assert_eq!(redelivered.payload(), b"retry");
    }

    #[tokio::test]
    async fn test_ack_prevents_redelivery() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("subj", "group").await.unwrap();
        bus.publish("subj", Bytes::from_static(b"done")).await.unwrap();

        let mut delivery = sub.next().await.unwrap();
        delivery.ack().await.unwrap();
        delivery.nack(Duration::from_millis(10)).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(100), sub.next()).await;
        assert!(outcome.is_err());
    }
}
