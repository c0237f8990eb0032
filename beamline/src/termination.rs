//! End-of-sequence tracking and the host-visible done flag.
//!
//! The done flag is written by device work enqueued on the search stream.
//! Its only read path is [`TerminationTracker::is_done`], which synchronizes
//! that stream first, so a `true` observed by the host always reflects every
//! EOS check and append enqueued before the read.

use crate::backend::{EosOps, MemoryOps};
use crate::Result;

/// Per-slot EOS mask plus the run-wide done flag.
pub struct TerminationTracker<B: MemoryOps + EosOps> {
    stream: B::Stream,
    eos_meet: B::Mask,
    done: B::DoneFlag,
    eos_token_id: i32,
    pad_token_id: i32,
}

impl<B: MemoryOps + EosOps> TerminationTracker<B> {
    /// Allocate a cleared mask for `slots` sequences.
    ///
    /// # Errors
    /// Returns an error if device allocation fails.
    pub fn new(
        stream: &B::Stream,
        slots: usize,
        eos_token_id: i32,
        pad_token_id: i32,
    ) -> Result<Self> {
        Ok(Self {
            stream: stream.clone(),
            eos_meet: B::alloc_mask(stream, slots)?,
            done: B::alloc_done_flag(stream)?,
            eos_token_id,
            pad_token_id,
        })
    }

    /// Mark slots whose new token is EOS and pad the ones already finished.
    ///
    /// # Errors
    /// Returns an error if the kernel launch fails.
    pub fn check(&mut self, next_tokens: &mut B::Tokens) -> Result<()> {
        B::check_for_eos(
            &self.stream,
            next_tokens,
            &mut self.eos_meet,
            self.eos_token_id,
            self.pad_token_id,
            &self.done,
        )
    }

    /// Set the done flag regardless of the mask (length cap, beam scorer).
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn mark_done(&self) -> Result<()> {
        B::set_done_flag(&self.stream, &self.done, true)
    }

    /// Synchronize the stream, then read the done flag.
    ///
    /// # Errors
    /// Returns an error if synchronization or the read fails.
    pub fn is_done(&self) -> Result<bool> {
        B::read_done_flag(&self.stream, &self.done)
    }

    /// The raw mask, for inspection.
    #[must_use]
    pub fn eos_meet(&self) -> &B::Mask {
        &self.eos_meet
    }
}
