//! RFC 4571 framing for STUN/DTLS tunneled over TCP: a 2-byte big-endian
//! length prefix ahead of each frame's payload.

use std::ops::{Deref, DerefMut};

const DEFAULT_CAPACITY: usize = 4096;

/// A double-buffered read queue for reassembling length-prefixed frames
/// across multiple `read()` calls without reallocating on every partial
/// frame.
///
/// Reads accumulate into the active half via `DerefMut`/`advance`. Once a
/// complete frame is found, `split` hands back that frame's bytes and
/// flips to the other half, copying across only the unconsumed remainder
/// (not the whole buffer).
pub struct ExchangeBuffer {
    buffers: [(Vec<u8>, usize); 2],
    index: usize,
}

impl Default for ExchangeBuffer {
    fn default() -> Self {
        Self {
            index: 0,
            buffers: [(vec![0u8; DEFAULT_CAPACITY], 0), (vec![0u8; DEFAULT_CAPACITY], 0)],
        }
    }
}

impl Deref for ExchangeBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buffers[self.index].0[..self.buffers[self.index].1]
    }
}

impl DerefMut for ExchangeBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let len = self.buffers[self.index].1;
        let cap = self.buffers[self.index].0.len();
        if cap == len {
            self.buffers[self.index].0.resize(cap * 2, 0);
        }
        &mut self.buffers[self.index].0[len..]
    }
}

impl ExchangeBuffer {
    pub fn len(&self) -> usize {
        self.buffers[self.index].1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call after writing into the slice returned by `deref_mut` to record
    /// how many bytes were actually written.
    pub fn advance(&mut self, len: usize) {
        self.buffers[self.index].1 += len;
    }

    /// Splits off the first `len` bytes, flipping to the other half and
    /// carrying over whatever was left unconsumed.
    pub fn split(&mut self, len: usize) -> Vec<u8> {
        let (current_bytes, current_len) = &self.buffers[self.index];
        assert!(len <= *current_len);

        let frame = current_bytes[..len].to_vec();
        let remaining = current_len - len;
        let tail_start = len;
        let tail_end = *current_len;
        let tail = current_bytes[tail_start..tail_end].to_vec();

        self.buffers[self.index].1 = 0;
        self.index = 1 - self.index;

        if remaining > 0 {
            let next = &mut self.buffers[self.index].0;
            if next.len() < remaining {
                next.resize(remaining, 0);
            }
            next[..remaining].copy_from_slice(&tail);
        }
        self.buffers[self.index].1 = remaining;

        frame
    }
}

/// Returns the total on-wire length (prefix + payload) of the next RFC 4571
/// frame if the buffer already holds it, or `None` if more bytes are
/// needed.
pub fn next_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }

    let payload_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let total = 2 + payload_len;

    if buf.len() >= total { Some(total) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_frame_split_across_two_reads() {
        let mut buf = ExchangeBuffer::default();

        let chunk1 = [0x00, 0x05, b'h', b'e'];
        buf[..chunk1.len()].copy_from_slice(&chunk1);
        buf.advance(chunk1.len());
        assert!(next_frame_len(&buf).is_none());

        let chunk2 = [b'l', b'l', b'o'];
        buf[..chunk2.len()].copy_from_slice(&chunk2);
        buf.advance(chunk2.len());

        let total = next_frame_len(&buf).unwrap();
        assert_eq!(total, 7);

        let frame = buf.split(total);
        assert_eq!(&frame[2..], b"hello");
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn carries_over_unconsumed_trailing_bytes() {
        let mut buf = ExchangeBuffer::default();

        let mut data = vec![0x00, 0x02, b'h', b'i'];
        data.extend_from_slice(&[0x00, 0x01, b'x']); // start of a second frame
        buf[..data.len()].copy_from_slice(&data);
        buf.advance(data.len());

        let total = next_frame_len(&buf).unwrap();
        assert_eq!(total, 4);
        let frame = buf.split(total);
        assert_eq!(&frame[2..], b"hi");

        assert_eq!(buf.len(), 3);
        assert_eq!(&buf[..], &[0x00, 0x01, b'x']);
    }
}
