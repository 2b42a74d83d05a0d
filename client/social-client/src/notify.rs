/// Success and failure notifications for the renderer
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NoticeLevel,
    pub message: String,
}

/// Fan-out of notifications. Sending with no subscriber is not an error.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let notification = Notification {
            level,
            message: message.into(),
        };
        trace!(level = ?notification.level, message = %notification.message, "Notify");
        let _ = self.tx.send(notification);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(NoticeLevel::Success, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notify(NoticeLevel::Info, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(NoticeLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();

        notifier.success("Saved");
        notifier.error("Failed");

        assert_eq!(rx.recv().await.unwrap().level, NoticeLevel::Success);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.level, NoticeLevel::Error);
        assert_eq!(second.message, "Failed");
    }

    #[test]
    fn test_send_without_subscribers() {
        Notifier::new(4).info("nobody listening");
    }
}
