//! Write Buffer
//!
//! Fixed-capacity append cursor with an optional running checksum.

use crate::checksum::Checksum;

/// Append-only buffer sized up front by the caller
#[derive(Debug)]
pub struct WriteBuffer {
    buf: Vec<u8>,
    capacity: usize,
    /// Running checksum over every byte written since `start_checksum`
    running: Option<Checksum>,
}

impl WriteBuffer {
    /// Create a buffer that must be filled with exactly `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            running: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written so far
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Begin folding subsequent writes into a fresh running checksum
    pub fn start_checksum(&mut self) {
        self.running = Some(Checksum::new());
    }

    /// Append the running checksum (not folded into itself) and stop tracking.
    ///
    /// Panics if `start_checksum` was not called first.
    pub fn put_checksum(&mut self) -> u32 {
        let value = match self.running.take() {
            Some(running) => running.finish(),
            None => panic!("put_checksum called without start_checksum"),
        };
        self.append(&value.to_le_bytes());
        value
    }

    pub fn put_u8(&mut self, value: u8) {
        self.append(&[value]);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.append(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.append(&value.to_le_bytes());
    }

    /// Raw bytes, no length prefix
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.append(bytes);
    }

    /// `len u32` followed by the bytes
    pub fn put_len_prefixed(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= u32::MAX as usize,
            "length-prefixed field of {} bytes exceeds u32",
            bytes.len()
        );
        self.put_u32(bytes.len() as u32);
        self.append(bytes);
    }

    /// Consume the buffer, asserting it was filled exactly
    pub fn finish(self) -> Vec<u8> {
        assert_eq!(
            self.buf.len(),
            self.capacity,
            "serializer wrote {} bytes into a buffer sized for {}",
            self.buf.len(),
            self.capacity
        );
        self.buf
    }

    fn append(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.remaining(),
            "write of {} bytes overflows buffer ({} of {} used)",
            bytes.len(),
            self.buf.len(),
            self.capacity
        );
        self.buf.extend_from_slice(bytes);
        if let Some(running) = self.running.as_mut() {
            running.update(bytes);
        }
    }
}
