//! Per-cycle timing and realtime reporting context.
//!
//! A [`RunContext`] is established once per audio callback and passed by
//! reference through all realtime code. It carries the cycle's absolute
//! start frame, the sub-cycle offset (used when a cycle is subdivided at
//! value-change points), the frame count, and a sender for copy-only
//! [`Notice`] records that the post-processor thread turns into client
//! notifications and log output. The audio thread never formats or
//! allocates; notices that don't fit are dropped.

use crossbeam_channel::Sender;

/// A copy-only record sent from the realtime side to the post-processor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notice {
    /// A broadcasting audio/CV port's absolute peak over the cycle.
    PortPeak {
        /// Broadcast cookie assigned to the port at creation.
        cookie: u64,
        /// Peak of `|sample|` over the cycle window.
        peak: f32,
    },
    /// A broadcasting control port's value at cycle end.
    PortValue {
        /// Broadcast cookie assigned to the port at creation.
        cookie: u64,
        /// Current value.
        value: f32,
    },
    /// A realtime failure that could not be handled in place.
    RtError {
        /// Error code from [`RtErrorKind`].
        kind: RtErrorKind,
    },
}

/// Realtime failure codes, formatted off the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtErrorKind {
    /// An event arrived whose target was already gone.
    StaleEvent,
    /// The notice channel overflowed and records were dropped.
    NoticeOverflow,
}

/// Per-cycle state passed through all realtime processing code.
#[derive(Clone)]
pub struct RunContext {
    /// Absolute frame time of the cycle start.
    pub start: u64,
    /// Offset from the cycle start, in frames.
    ///
    /// Non-zero when the cycle is subdivided at value-change points; all
    /// buffer windows are `[offset, offset + nframes)`.
    pub offset: u32,
    /// Number of frames in this (sub-)cycle.
    pub nframes: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// True when running under a realtime deadline.
    pub realtime: bool,
    notices: Sender<Notice>,
}

impl RunContext {
    /// Creates a context for one cycle.
    pub fn new(
        start: u64,
        nframes: u32,
        sample_rate: u32,
        realtime: bool,
        notices: Sender<Notice>,
    ) -> Self {
        Self {
            start,
            offset: 0,
            nframes,
            sample_rate,
            realtime,
            notices,
        }
    }

    /// Absolute frame time one past the cycle's last frame.
    pub fn end(&self) -> u64 {
        self.start + u64::from(self.nframes)
    }

    /// Returns a context for the sub-cycle `[offset, offset + nframes)`.
    pub fn slice(&self, offset: u32, nframes: u32) -> RunContext {
        let mut ctx = self.clone();
        ctx.offset = offset;
        ctx.nframes = nframes;
        ctx
    }

    /// Sends a notice to the post-processor; drops it if the channel is
    /// full (never blocks).
    pub fn notify(&self, notice: Notice) {
        let _ = self.notices.try_send(notice);
    }
}
