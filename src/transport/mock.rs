//! An in-memory [`Transport`] used only by this crate's own tests, so the session orchestrator
//! can be exercised without real USB hardware attached.

use super::{Transport, TransportError};
use std::collections::VecDeque;

/// Replies with whatever frames are queued in `responses`, one `read()` call draining at most
/// one queued frame (split across multiple calls if the frame is larger than the caller's
/// buffer, mirroring a real short-read boundary).
pub struct MockTransport {
    pub written: Vec<Vec<u8>>,
    responses: VecDeque<Vec<u8>>,
    pending: Vec<u8>,
    max_packet_size: usize,
    pub reconnect_count: u32,
}

impl MockTransport {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            written: Vec::new(),
            responses: VecDeque::new(),
            pending: Vec::new(),
            max_packet_size,
            reconnect_count: 0,
        }
    }

    pub fn queue_response(&mut self, frame: Vec<u8>) {
        self.responses.push_back(frame);
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.written.push(bytes.to_vec());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            self.pending = self
                .responses
                .pop_front()
                .ok_or_else(|| TransportError::Read("no more queued responses".to_string()))?;
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.reconnect_count += 1;
        Ok(())
    }
}
