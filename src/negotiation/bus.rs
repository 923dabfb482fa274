use std::collections::VecDeque;

use super::messages::Message;

/// Shared FIFO of pending negotiation messages. Arrival order is the global
/// delivery order.
#[derive(Debug, Default)]
pub struct MessageBus {
    queue: VecDeque<Message>,
    enqueued: u64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.enqueued += 1;
        self.queue.push_back(msg);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        for msg in messages {
            self.push(msg);
        }
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total messages ever enqueued
    pub fn enqueued(&self) -> u64 {
        self.enqueued
    }

    /// Drop everything still pending, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::messages::NodeId;

    #[test]
    fn test_fifo_order() {
        let mut bus = MessageBus::new();
        bus.push(Message::promote(NodeId::new(0), NodeId::new(1), 1));
        bus.extend([
            Message::ack(NodeId::new(1), NodeId::new(0), 1),
            Message::demote(NodeId::new(2), NodeId::new(0), 3),
        ]);
        assert_eq!(bus.len(), 3);
        assert_eq!(bus.pop().map(|m| m.src), Some(NodeId::new(0)));
        assert_eq!(bus.pop().map(|m| m.src), Some(NodeId::new(1)));
        assert_eq!(bus.clear(), 1);
        assert!(bus.is_empty());
        assert_eq!(bus.enqueued(), 3);
    }
}
