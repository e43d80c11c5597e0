use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Fan-out registry for `/ws` subscribers. Each subscriber gets an unbounded
/// channel; a send failure (the socket task already gone) evicts it on the
/// next broadcast rather than being treated as an error.
#[derive(Default)]
pub struct Fanout {
    subscribers: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl Fanout {
    pub fn new() -> Self {
        Fanout {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.write().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.write().remove(&id);
    }

    /// Sends `message` to every current subscriber, dropping any whose
    /// receiver has already gone away.
    pub fn broadcast(&self, message: String) {
        let mut dead = Vec::new();
        {
            let subs = self.subscribers.read();
            for (id, tx) in subs.iter() {
                if tx.send(message.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut subs = self.subscribers.write();
            for id in dead {
                subs.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_subscribed_receiver() {
        let fanout = Fanout::new();
        let (_id, mut rx) = fanout.subscribe();
        fanout.broadcast("hello".to_string());
        assert_eq!(rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn unsubscribe_removes_from_count() {
        let fanout = Fanout::new();
        let (id, _rx) = fanout.subscribe();
        assert_eq!(fanout.subscriber_count(), 1);
        fanout.unsubscribe(id);
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[test]
    fn broadcast_evicts_dropped_receiver() {
        let fanout = Fanout::new();
        let (_id, rx) = fanout.subscribe();
        drop(rx);
        fanout.broadcast("anything".to_string());
        assert_eq!(fanout.subscriber_count(), 0);
    }
}
