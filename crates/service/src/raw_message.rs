use crate::transport_address::TransportAddress;

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;

/// `{ bytes, remote, local }`. Immutable after construction, produced by the
/// classifier and consumed by the socket's reader. `Bytes` makes a queued
/// message cheap to clone across the producer/consumer boundary without
/// copying the payload.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub bytes: Bytes,
    pub remote: TransportAddress,
    pub local: TransportAddress,
}

impl RawMessage {
    pub fn new(bytes: impl Into<Bytes>, remote: TransportAddress, local: TransportAddress) -> Self {
        Self { bytes: bytes.into(), remote, local }
    }
}

/// A bounded FIFO of [`RawMessage`]s: the only data-path buffer between
/// network I/O and the application (spec.md §4.3). One producer (the
/// classifier, running on an I/O worker), one logical consumer (the owner
/// of the socket wrapper).
///
/// `offer` never blocks: when full it drops the newest message and reports
/// the overflow. `poll` never blocks: it returns `None` when empty.
pub struct RawMessageQueue {
    capacity: usize,
    messages: Mutex<VecDeque<RawMessage>>,
}

impl RawMessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
        }
    }

    /// Returns `false` (and drops `message`) if the queue was already at
    /// capacity.
    pub fn offer(&self, message: RawMessage) -> bool {
        let mut queue = self.messages.lock();
        if queue.len() >= self.capacity {
            return false;
        }

        queue.push_back(message);
        true
    }

    pub fn poll(&self) -> Option<RawMessage> {
        self.messages.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every queued message, used by `close()` when the caller opts
    /// to discard pending data (spec.md §4.4).
    pub fn drain(&self) {
        self.messages.lock().clear();
    }
}

impl Default for RawMessageQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport_address::Transport;

    fn addr(port: u16) -> TransportAddress {
        TransportAddress::new(format!("127.0.0.1:{port}").parse().unwrap(), Transport::Udp)
    }

    #[test]
    fn preserves_arrival_order() {
        let queue = RawMessageQueue::new(4);
        for i in 0..3u8 {
            queue.offer(RawMessage::new(vec![i], addr(1), addr(2)));
        }

        assert_eq!(queue.poll().unwrap().bytes, vec![0]);
        assert_eq!(queue.poll().unwrap().bytes, vec![1]);
        assert_eq!(queue.poll().unwrap().bytes, vec![2]);
        assert!(queue.poll().is_none());
    }

    #[test]
    fn drops_newest_on_overflow() {
        let queue = RawMessageQueue::new(2);
        assert!(queue.offer(RawMessage::new(vec![1], addr(1), addr(2))));
        assert!(queue.offer(RawMessage::new(vec![2], addr(1), addr(2))));
        assert!(!queue.offer(RawMessage::new(vec![3], addr(1), addr(2))));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.poll().unwrap().bytes, vec![1]);
    }
}
