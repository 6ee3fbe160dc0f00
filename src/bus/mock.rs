// In-memory bus for simulation and tests
//
// Reads are answered from a per-address script, falling back to a fixed
// idle response. Every write is recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{BusError, Result, Transport};

#[derive(Default)]
struct MockState {
    writes: Vec<(u8, Vec<u8>)>,
    scripted: HashMap<u8, VecDeque<Vec<u8>>>,
    idle: HashMap<u8, Vec<u8>>,
    reads: HashMap<u8, usize>,
    clears: usize,
}

/// Simulated bus with scripted peripheral responses
#[derive(Default)]
pub struct MockBus {
    state: Mutex<MockState>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a one-shot response for the next read at `address`
    pub fn push_response(&self, address: u8, response: &[u8]) {
        self.state()
            .scripted
            .entry(address)
            .or_default()
            .push_back(response.to_vec());
    }

    /// Response returned whenever no scripted response is left
    pub fn set_idle_response(&self, address: u8, response: &[u8]) {
        self.state().idle.insert(address, response.to_vec());
    }

    /// All writes in issue order
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.state().writes.clone()
    }

    /// Frames written to one address
    pub fn writes_to(&self, address: u8) -> Vec<Vec<u8>> {
        self.state()
            .writes
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn read_count(&self, address: u8) -> usize {
        self.state().reads.get(&address).copied().unwrap_or(0)
    }

    pub fn clear_count(&self) -> usize {
        self.state().clears
    }

    fn next_response(state: &mut MockState, address: u8, len: usize) -> Result<Vec<u8>> {
        *state.reads.entry(address).or_default() += 1;
        let response = state
            .scripted
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
            .or_else(|| state.idle.get(&address).cloned())
            .ok_or(BusError::Timeout { address })?;

        if response.len() != len {
            return Err(BusError::InvalidResponse {
                address,
                reason: format!("Expected {} bytes, got {}", len, response.len()),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for MockBus {
    async fn write(&self, address: u8, frame: &[u8]) -> Result<()> {
        debug!("Mock write to 0x{:02X}: {:02X?}", address, frame);
        self.state().writes.push((address, frame.to_vec()));
        Ok(())
    }

    async fn read(&self, address: u8, len: usize) -> Result<Vec<u8>> {
        Self::next_response(&mut self.state(), address, len)
    }

    async fn write_read(&self, address: u8, frame: &[u8], len: usize) -> Result<Vec<u8>> {
        let mut state = self.state();
        state.writes.push((address, frame.to_vec()));
        Self::next_response(&mut state, address, len)
    }

    fn clear_queue(&self) -> usize {
        self.state().clears += 1;
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_idle_responses() {
        let bus = MockBus::new();
        bus.push_response(0x08, &[0x04, 0x00, 0x01]);
        bus.set_idle_response(0x08, &[0x03, 0x00, 0x00]);

        assert_eq!(bus.read(0x08, 3).await.unwrap(), vec![0x04, 0x00, 0x01]);
        assert_eq!(bus.read(0x08, 3).await.unwrap(), vec![0x03, 0x00, 0x00]);
        assert_eq!(bus.read(0x08, 3).await.unwrap(), vec![0x03, 0x00, 0x00]);
        assert_eq!(bus.read_count(0x08), 3);
    }

    #[tokio::test]
    async fn test_unscripted_read_times_out() {
        let bus = MockBus::new();
        assert!(matches!(
            bus.read(0x0b, 3).await,
            Err(BusError::Timeout { address: 0x0b })
        ));
    }

    #[tokio::test]
    async fn test_write_read_records_write() {
        let bus = MockBus::new();
        bus.push_response(0x09, &[0x08, 0x00, 0x10]);

        bus.write_read(0x09, &[0x04], 3).await.unwrap();
        assert_eq!(bus.writes_to(0x09), vec![vec![0x04]]);
    }
}
