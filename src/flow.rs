// ABOUTME: Flow-control window arithmetic shared by the connection and per-stream windows

use crate::frame::MAX_WINDOW_SIZE;

/// A signed outbound flow-control window (RFC 7540 Section 6.9).
///
/// The window may legally go negative when the peer shrinks
/// INITIAL_WINDOW_SIZE under already-consumed credit; it may never exceed
/// 2^31 - 1. Violating that ceiling is the caller's flow-control error.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlowWindow(i32);

/// Marker returned when an adjustment would push a window past 2^31 - 1.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct WindowOverflow;

impl FlowWindow {
    pub(crate) fn new(initial: i32) -> FlowWindow {
        FlowWindow(initial)
    }

    /// Credit currently available to spend.
    pub(crate) fn available(&self) -> u32 {
        if self.0 < 0 {
            0
        } else {
            self.0 as u32
        }
    }

    /// Apply a WINDOW_UPDATE increment.
    pub(crate) fn increase(&mut self, increment: u32) -> Result<(), WindowOverflow> {
        self.adjust(increment as i64)
    }

    /// Apply a signed delta (INITIAL_WINDOW_SIZE changes). Negative results
    /// are legal; exceeding the ceiling is not.
    pub(crate) fn adjust(&mut self, delta: i64) -> Result<(), WindowOverflow> {
        let next = self.0 as i64 + delta;
        if next > MAX_WINDOW_SIZE as i64 {
            return Err(WindowOverflow);
        }
        self.0 = next as i32;
        Ok(())
    }

    /// Spend credit for bytes actually written. The caller checks
    /// `available()` first.
    pub(crate) fn consume(&mut self, bytes: u32) {
        debug_assert!(bytes <= self.available());
        self.0 -= bytes as i32;
    }
}
