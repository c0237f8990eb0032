//! Per-step score matrix

use crate::backend::{MemoryOps, ScoreOps};
use crate::Result;

/// Owns the device-resident `(batch_beam_size, vocab_size)` score matrix.
///
/// Filled from logits once per step, then mutated in place by the score
/// processors before selection reads it.
pub struct ScoreBuffer<B: MemoryOps + ScoreOps> {
    stream: B::Stream,
    scores: B::Scores,
    rows: usize,
    vocab_size: usize,
}

impl<B: MemoryOps + ScoreOps> ScoreBuffer<B> {
    /// Allocate a zeroed matrix.
    ///
    /// # Errors
    /// Returns an error if device allocation fails.
    pub fn new(stream: &B::Stream, rows: usize, vocab_size: usize) -> Result<Self> {
        Ok(Self {
            stream: stream.clone(),
            scores: B::alloc_scores(stream, rows * vocab_size)?,
            rows,
            vocab_size,
        })
    }

    /// Load this step's logits and log-softmax every row.
    ///
    /// `logits` has shape `(rows, input_length, vocab_size)`. Only
    /// `input_length == 1` is supported: every step is expected to produce
    /// exactly one new position. That has not been shown to hold for every
    /// model, so it stays a hard check.
    ///
    /// # Panics
    /// Panics if the logits length is not a multiple of `rows * vocab_size`
    /// or the derived `input_length` is not 1.
    ///
    /// # Errors
    /// Returns an error if the kernel launch fails.
    pub fn set_logits(&mut self, logits: &B::Scores) -> Result<()> {
        let len = B::scores_len(logits);
        let row_block = self.rows * self.vocab_size;
        assert_eq!(
            len % row_block,
            0,
            "logits of {len} elements do not divide into {} rows of {}",
            self.rows,
            self.vocab_size
        );
        let input_length = len / row_block;
        assert_eq!(
            input_length, 1,
            "only single-position logits are supported, got input_length {input_length}"
        );

        B::log_softmax_rows(
            &self.stream,
            logits,
            &mut self.scores,
            self.rows,
            self.vocab_size,
        )
    }

    /// The whole matrix.
    #[must_use]
    pub fn scores(&self) -> &B::Scores {
        &self.scores
    }

    /// The whole matrix, for processors that rewrite it in place.
    pub fn scores_mut(&mut self) -> &mut B::Scores {
        &mut self.scores
    }

    /// Blocking host copy of one slot's row.
    ///
    /// # Errors
    /// Returns an error if the device transfer fails.
    pub fn row(&self, slot: usize) -> Result<Vec<f32>> {
        self.check_slot(slot);
        let all = B::download_scores(&self.stream, &self.scores)?;
        Ok(all[slot * self.vocab_size..(slot + 1) * self.vocab_size].to_vec())
    }

    /// Enqueue a write of a single score.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn set_score(&mut self, slot: usize, token: usize, value: f32) -> Result<()> {
        self.check_slot(slot);
        assert!(token < self.vocab_size, "token {token} outside vocabulary");
        B::write_score(
            &self.stream,
            &mut self.scores,
            slot * self.vocab_size + token,
            value,
        )
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Row width.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn check_slot(&self, slot: usize) {
        assert!(
            slot < self.rows,
            "slot {slot} out of range for {} rows",
            self.rows
        );
    }
}
