//! Event Publisher Implementation
//!
//! 按绘本推送进度事件（WebSocket 订阅）

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::book::{BookId, BookStatus, ProgressEvent};

const CHANNEL_CAPACITY: usize = 256;

/// 推送给观察者的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum BookEvent {
    /// 新追加的进度事件
    Progress {
        book_id: BookId,
        #[serde(flatten)]
        update: ProgressEvent,
    },
    /// 整体状态或阶段变化
    StatusChanged {
        book_id: BookId,
        status: BookStatus,
        stage: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl BookEvent {
    pub fn book_id(&self) -> BookId {
        match self {
            BookEvent::Progress { book_id, .. } | BookEvent::StatusChanged { book_id, .. } => {
                *book_id
            }
        }
    }
}

/// 事件发布器
pub struct EventPublisher {
    /// book_id -> broadcast sender
    book_channels: DashMap<BookId, broadcast::Sender<BookEvent>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            book_channels: DashMap::new(),
        }
    }

    /// 订阅某本书的事件，通道不存在时创建
    pub fn subscribe(&self, book_id: BookId) -> broadcast::Receiver<BookEvent> {
        self.book_channels
            .entry(book_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// 流程结束后移除通道，已有订阅者收到 Closed
    pub fn close(&self, book_id: BookId) {
        self.book_channels.remove(&book_id);
    }

    pub fn subscriber_count(&self, book_id: BookId) -> usize {
        self.book_channels
            .get(&book_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    pub fn publish_progress(&self, book_id: BookId, update: &ProgressEvent) {
        self.publish(BookEvent::Progress {
            book_id,
            update: update.clone(),
        });
    }

    pub fn publish_status(
        &self,
        book_id: BookId,
        status: BookStatus,
        stage: &str,
        error: Option<&str>,
    ) {
        self.publish(BookEvent::StatusChanged {
            book_id,
            status,
            stage: stage.to_string(),
            error: error.map(str::to_string),
        });
    }

    fn publish(&self, event: BookEvent) {
        let book_id = event.book_id();
        if let Some(sender) = self.book_channels.get(&book_id) {
            if let Err(e) = sender.send(event) {
                tracing::debug!(
                    book_id = %book_id,
                    error = %e,
                    "Failed to publish event (no receivers)"
                );
            }
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(step: &str) -> ProgressEvent {
        ProgressEvent {
            step: step.to_string(),
            percent: 100,
            message: None,
            page_id: None,
        }
    }

    #[tokio::test]
    async fn test_events_are_scoped_per_book() {
        let publisher = EventPublisher::new();
        let a = BookId::new();
        let b = BookId::new();
        let mut rx_a = publisher.subscribe(a);
        let mut rx_b = publisher.subscribe(b);

        publisher.publish_progress(a, &update("character_spec_set"));
        publisher.publish_status(b, BookStatus::Paused, "rendering_pages", None);

        match rx_a.recv().await.unwrap() {
            BookEvent::Progress { update, .. } => assert_eq!(update.step, "character_spec_set"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            BookEvent::StatusChanged {
                status: BookStatus::Paused,
                ..
            }
        ));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_event_wire_format() {
        let book_id = BookId::new();
        let json = serde_json::to_value(BookEvent::Progress {
            book_id,
            update: update("done"),
        })
        .unwrap();
        assert_eq!(json["event"], "Progress");
        assert_eq!(json["data"]["step"], "done");
        assert_eq!(json["data"]["book_id"], book_id.to_string());
    }

    #[tokio::test]
    async fn test_close_drops_channel() {
        let publisher = EventPublisher::new();
        let book_id = BookId::new();
        let mut rx = publisher.subscribe(book_id);
        assert_eq!(publisher.subscriber_count(book_id), 1);

        publisher.close(book_id);
        assert_eq!(publisher.subscriber_count(book_id), 0);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
