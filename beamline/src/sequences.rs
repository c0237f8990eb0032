//! Per-slot token sequences
//!
//! A row-major `(batch_beam_size, max_length)` token buffer on the device.
//! Every slot grows by exactly one token per step; rows are never shortened.

use crate::backend::{MemoryOps, SequenceOps};
use crate::Result;

/// Host-side read access to sequences, used by the beam scorer to capture
/// finished hypotheses.
pub trait SequenceView {
    /// Current length of every sequence.
    fn sequence_length(&self) -> usize;

    /// Copy of the first `sequence_length()` tokens of `slot`.
    ///
    /// # Errors
    /// Returns an error if the device transfer fails.
    fn sequence(&self, slot: usize) -> Result<Vec<i32>>;
}

/// Growable token buffers for every batch-beam slot.
pub struct SequenceStore<B: MemoryOps + SequenceOps> {
    stream: B::Stream,
    sequences: B::Tokens,
    /// Second buffer for beam reordering. Gathering in place would let a
    /// slot overwrite a row another slot still has to read.
    next_sequences: Option<B::Tokens>,
    batch_beam_size: usize,
    max_length: usize,
    sequence_length: usize,
}

impl<B: MemoryOps + SequenceOps> SequenceStore<B> {
    /// Build the store from a `(batch_size, prompt_length)` row-major prompt.
    ///
    /// Each prompt row is replicated into its `num_beams` slots. A second
    /// buffer is allocated for reordering when `num_beams > 1`.
    ///
    /// # Panics
    /// Panics if `input_ids` is not `batch_size` rows or if the prompt is
    /// empty or does not fit in `max_length`.
    ///
    /// # Errors
    /// Returns an error if device allocation fails.
    pub fn new(
        stream: &B::Stream,
        input_ids: &[i32],
        batch_size: usize,
        num_beams: usize,
        max_length: usize,
    ) -> Result<Self> {
        assert!(batch_size > 0, "batch_size must be > 0");
        assert_eq!(
            input_ids.len() % batch_size,
            0,
            "prompt of {} tokens does not split into {batch_size} rows",
            input_ids.len()
        );
        let prompt_length = input_ids.len() / batch_size;
        assert!(prompt_length > 0, "prompt must not be empty");
        assert!(
            prompt_length <= max_length,
            "prompt length {prompt_length} exceeds max_length {max_length}"
        );

        let batch_beam_size = batch_size * num_beams;
        let mut host = vec![0i32; batch_beam_size * max_length];
        for (slot, row) in host.chunks_exact_mut(max_length).enumerate() {
            let batch = slot / num_beams;
            row[..prompt_length]
                .copy_from_slice(&input_ids[batch * prompt_length..(batch + 1) * prompt_length]);
        }

        let sequences = B::upload_tokens(stream, &host)?;
        let next_sequences = if num_beams > 1 {
            Some(B::alloc_tokens(stream, batch_beam_size * max_length)?)
        } else {
            None
        };

        Ok(Self {
            stream: stream.clone(),
            sequences,
            next_sequences,
            batch_beam_size,
            max_length,
            sequence_length: prompt_length,
        })
    }

    /// Current length of every sequence.
    #[must_use]
    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Row stride of the buffer.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Number of slots.
    #[must_use]
    pub fn batch_beam_size(&self) -> usize {
        self.batch_beam_size
    }

    /// The whole device buffer (`batch_beam_size * max_length`).
    #[must_use]
    pub fn sequences(&self) -> &B::Tokens {
        &self.sequences
    }

    /// Append `tokens[slot]` to every slot.
    ///
    /// # Panics
    /// Panics if the sequences are already `max_length` long.
    ///
    /// # Errors
    /// Returns an error if the kernel launch fails.
    pub fn append_next_tokens(&mut self, tokens: &B::Tokens) -> Result<()> {
        self.check_room();
        B::append_column(
            &self.stream,
            &mut self.sequences,
            tokens,
            self.batch_beam_size,
            self.max_length,
            self.sequence_length,
        )?;
        self.sequence_length += 1;
        Ok(())
    }

    /// Beam reorder: slot `i` becomes `sequence[sources[i]] ++ [tokens[i]]`.
    ///
    /// # Panics
    /// Panics if the store was built for a single beam or the sequences are
    /// already `max_length` long.
    ///
    /// # Errors
    /// Returns an error if the kernel launch fails.
    pub fn append_reordered(&mut self, sources: &B::Tokens, tokens: &B::Tokens) -> Result<()> {
        self.check_room();
        let Some(next) = self.next_sequences.as_mut() else {
            panic!("append_reordered requires a multi-beam sequence store");
        };
        B::gather_append(
            &self.stream,
            &self.sequences,
            next,
            sources,
            tokens,
            self.batch_beam_size,
            self.max_length,
            self.sequence_length,
        )?;
        std::mem::swap(&mut self.sequences, next);
        self.sequence_length += 1;
        Ok(())
    }

    /// Copy of every row, `max_length` wide, including unwritten columns.
    ///
    /// # Errors
    /// Returns an error if the device transfer fails.
    pub fn to_host(&self) -> Result<Vec<i32>> {
        B::download_tokens(&self.stream, &self.sequences)
    }

    fn check_room(&self) {
        assert!(
            self.sequence_length < self.max_length,
            "sequence length {} already at max_length",
            self.sequence_length
        );
    }
}

impl<B: MemoryOps + SequenceOps> SequenceView for SequenceStore<B> {
    fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn sequence(&self, slot: usize) -> Result<Vec<i32>> {
        assert!(
            slot < self.batch_beam_size,
            "slot {slot} out of range for {} slots",
            self.batch_beam_size
        );
        B::download_token_range(
            &self.stream,
            &self.sequences,
            slot * self.max_length,
            self.sequence_length,
        )
    }
}
