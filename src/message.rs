use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

/// Receiving half of a message port, held by the host
pub type MessageReceiver = mpsc::UnboundedReceiver<JsonValue>;

/// Sending half of a message channel
///
/// Messages are structured-cloned through JSON before they leave the script,
/// so the receiver never sees handles into the worker's arena.
#[derive(Debug, Clone)]
pub struct MessagePort {
    tx: mpsc::UnboundedSender<JsonValue>,
}

impl MessagePort {
    /// Create a port and the receiver observing what is posted to it
    pub fn channel() -> (Self, MessageReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Post a message; returns false once the receiver is gone
    pub fn post(&self, message: JsonValue) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_post_reaches_receiver() {
        let (port, mut rx) = MessagePort::channel();
        assert!(port.post(json!({ "hello": "world" })));

        let received = rx.recv().await.unwrap();
        assert_eq!(received["hello"], "world");
    }

    #[test]
    fn test_post_after_receiver_dropped() {
        let (port, rx) = MessagePort::channel();
        drop(rx);

        assert!(port.is_closed());
        assert!(!port.post(json!(1)));
    }
}
