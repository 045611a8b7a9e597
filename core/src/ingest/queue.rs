use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::store::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: u64,
    pub body: String,
    /// How many times this message has been handed out, this time included.
    pub dequeue_count: u32,
}

/// At-least-once queue shared by all worker instances. A popped message is
/// hidden until deleted or until its visibility timeout lapses.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn pop(&self) -> StoreResult<Option<QueueMessage>>;

    async fn push(&self, body: String) -> StoreResult<()>;

    async fn delete(&self, message: &QueueMessage) -> StoreResult<()>;

    /// Visible plus in-flight messages.
    async fn len(&self) -> StoreResult<usize>;
}

#[derive(Debug)]
struct InFlight {
    body: String,
    dequeue_count: u32,
    visible_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<(u64, String, u32)>,
    in_flight: BTreeMap<u64, InFlight>,
}

#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    clock: Arc<dyn Clock>,
    visibility_timeout: Duration,
}

impl InMemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_visibility_timeout(clock, Duration::minutes(5))
    }

    pub fn with_visibility_timeout(clock: Arc<dyn Clock>, visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            clock,
            visibility_timeout,
        }
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn pop(&self) -> StoreResult<Option<QueueMessage>> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let expired: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, message)| message.visible_at <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            if let Some(message) = state.in_flight.remove(&id) {
                state.ready.push_back((id, message.body, message.dequeue_count));
            }
        }

        let Some((id, body, dequeued)) = state.ready.pop_front() else {
            return Ok(None);
        };
        let dequeue_count = dequeued + 1;
        state.in_flight.insert(
            id,
            InFlight {
                body: body.clone(),
                dequeue_count,
                visible_at: now + self.visibility_timeout,
            },
        );
        Ok(Some(QueueMessage {
            id,
            body,
            dequeue_count,
        }))
    }

    async fn push(&self, body: String) -> StoreResult<()> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.ready.push_back((id, body, 0));
        Ok(())
    }

    async fn delete(&self, message: &QueueMessage) -> StoreResult<()> {
        match self.state.lock().in_flight.remove(&message.id) {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(format!("queue message {}", message.id))
                .with_operation("delete_message")),
        }
    }

    async fn len(&self) -> StoreResult<usize> {
        let state = self.state.lock();
        Ok(state.ready.len() + state.in_flight.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    #[tokio::test]
    async fn undeleted_messages_reappear_after_the_timeout() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let queue = InMemoryQueue::with_visibility_timeout(clock.clone(), Duration::seconds(30));
        queue.push("a".into()).await.unwrap();

        let first = queue.pop().await.unwrap().unwrap();
        assert_eq!(first.dequeue_count, 1);
        assert!(queue.pop().await.unwrap().is_none());

        clock.advance(Duration::seconds(30));
        let again = queue.pop().await.unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.dequeue_count, 2);

        queue.delete(&again).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn messages_come_out_in_push_order() {
        let queue = InMemoryQueue::new(Arc::new(crate::clock::SystemClock));
        for body in ["1", "2", "3"] {
            queue.push(body.into()).await.unwrap();
        }
        let mut seen = Vec::new();
        while let Some(message) = queue.pop().await.unwrap() {
            seen.push(message.body.clone());
            queue.delete(&message).await.unwrap();
        }
        assert_eq!(seen, vec!["1", "2", "3"]);
    }
}
