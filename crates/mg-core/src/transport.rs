//! Transport timing
//!
//! The transport advances a global frame counter once per processed block
//! and hands every processor the same time info for that block.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Timing of the block currently being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineProcessTimeInfo {
    /// Global frame position at the start of the cycle
    pub g_start_frame: u64,
    /// Offset into the block where processing starts
    pub local_offset: u32,
    /// Number of frames to process
    pub nframes: u32,
}

impl EngineProcessTimeInfo {
    pub fn new(g_start_frame: u64, nframes: u32) -> Self {
        Self {
            g_start_frame,
            local_offset: 0,
            nframes,
        }
    }

    /// Half-open sample range inside the block
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self.local_offset as usize;
        start..start + self.nframes as usize
    }
}

/// Lock-free play position shared between control and audio threads
#[derive(Debug, Default)]
pub struct Transport {
    position: AtomicU64,
    playing: AtomicBool,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn play(&self) {
        self.playing.store(true, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn seek(&self, frame: u64) {
        self.position.store(frame, Ordering::Relaxed);
    }

    /// Time info for the next block. Advances the position while playing.
    pub fn next_block(&self, nframes: u32) -> EngineProcessTimeInfo {
        let start = if self.is_playing() {
            self.position.fetch_add(nframes as u64, Ordering::Relaxed)
        } else {
            self.position()
        };
        EngineProcessTimeInfo::new(start, nframes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_advances_while_playing() {
        let transport = Transport::new();
        assert_eq!(transport.next_block(64).g_start_frame, 0);
        assert_eq!(transport.position(), 0);

        transport.play();
        assert_eq!(transport.next_block(64).g_start_frame, 0);
        assert_eq!(transport.next_block(64).g_start_frame, 64);
        assert_eq!(transport.position(), 128);

        transport.stop();
        transport.seek(1000);
        let info = transport.next_block(32);
        assert_eq!(info.g_start_frame, 1000);
        assert_eq!(info.range(), 0..32);
    }
}
