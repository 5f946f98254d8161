//! Synthetic per-frame workload.

use crate::module::ProcessingModule;
use anyhow::{ensure, Result};
use frame_pool::FrameBuffer;
use std::thread;
use std::time::Duration;

/// Stand-in for real image processing: checksums and inverts the payload,
/// then spends `work` of wall time on the worker.
///
/// Making `work` longer than the frame period is the quickest way to see
/// backpressure kick in.
#[derive(Debug)]
pub struct WorkloadModule {
    enabled: bool,
    work: Duration,
    last_checksum: u64,
    last_sequence: Option<u64>,
}

impl WorkloadModule {
    pub fn new(work: Duration) -> Self {
        Self {
            enabled: true,
            work,
            last_checksum: 0,
            last_sequence: None,
        }
    }

    pub fn last_checksum(&self) -> u64 {
        self.last_checksum
    }
}

impl ProcessingModule<FrameBuffer> for WorkloadModule {
    fn name(&self) -> &str {
        "workload"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn process(&mut self, frame: &mut FrameBuffer) -> Result<()> {
        if let Some(last) = self.last_sequence {
            ensure!(
                frame.sequence > last,
                "frame {} arrived after frame {}",
                frame.sequence,
                last
            );
        }
        self.last_sequence = Some(frame.sequence);

        self.last_checksum = frame
            .bytes()
            .iter()
            .fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        for byte in frame.bytes_mut() {
            *byte = !*byte;
        }

        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64, payload: &[u8]) -> FrameBuffer {
        let mut frame = FrameBuffer::with_capacity(payload.len());
        frame.fill_from(payload).unwrap();
        frame.sequence = sequence;
        frame
    }

    #[test]
    fn test_inverts_payload() {
        let mut module = WorkloadModule::new(Duration::ZERO);
        let mut frame = frame(1, &[0x00, 0x0F, 0xFF]);
        module.process(&mut frame).unwrap();
        assert_eq!(frame.bytes(), &[0xFF, 0xF0, 0x00]);
        assert_ne!(module.last_checksum(), 0);
    }

    #[test]
    fn test_rejects_out_of_order_frames() {
        let mut module = WorkloadModule::new(Duration::ZERO);
        module.process(&mut frame(5, &[1])).unwrap();
        assert!(module.process(&mut frame(3, &[1])).is_err());
    }
}
