//! Beam candidate selection: two-stage top-k across all beams of a batch
//! element.

use crate::backend::{MemoryOps, SelectOps, TopKShape};
use crate::Result;

/// Upper bound on vocabulary partitions in stage one.
pub const MAX_VOCAB_PARTS: usize = 128;

/// Largest `num_beams` the fixed-size scratch layout supports.
pub const MAX_BEAMS: usize = 32;

/// Number of vocabulary partitions for a launch over `batch_beam_size` rows.
///
/// Small batches split the vocabulary finer so that stage one still has
/// enough independent work items; large batches use 4 parts per row.
#[must_use]
pub fn vocab_parts(batch_beam_size: usize, vocab_size: usize) -> usize {
    let parts = if batch_beam_size < 256 {
        240usize.div_ceil(batch_beam_size)
    } else {
        4
    };
    parts.min(MAX_VOCAB_PARTS).min(vocab_size).max(1)
}

/// Host copy of one step's candidates, `k` per batch element, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidates {
    /// Cumulative candidate scores
    pub scores: Vec<f32>,
    /// Token ids within the vocabulary
    pub tokens: Vec<i32>,
    /// Source beam within the batch element (`0..num_beams`)
    pub beams: Vec<i32>,
}

/// Device buffers and launch shape for the beam top-k pipeline.
pub struct TopKSelector<B: MemoryOps + SelectOps> {
    stream: B::Stream,
    shape: TopKShape,
    scratch_scores: B::Scores,
    scratch_tokens: B::Tokens,
    out_scores: B::Scores,
    out_tokens: B::Tokens,
    out_beams: B::Tokens,
}

impl<B: MemoryOps + SelectOps> TopKSelector<B> {
    /// Allocate scratch and output buffers for `k = 2 * num_beams`.
    ///
    /// # Panics
    /// Panics if `num_beams` is 0 or greater than [`MAX_BEAMS`]: the scratch
    /// layout is fixed-capacity and the selector never degrades silently.
    ///
    /// # Errors
    /// Returns an error if device allocation fails.
    pub fn new(
        stream: &B::Stream,
        batch_size: usize,
        num_beams: usize,
        vocab_size: usize,
    ) -> Result<Self> {
        assert!(
            (1..=MAX_BEAMS).contains(&num_beams),
            "beam top-k supports 1..={MAX_BEAMS} beams, got {num_beams}"
        );
        let batch_beam_size = batch_size * num_beams;
        let k = 2 * num_beams;
        let shape = TopKShape {
            batch_size,
            num_beams,
            vocab_size,
            k,
            parts: vocab_parts(batch_beam_size, vocab_size),
        };

        let scratch_len = batch_beam_size * k * (MAX_VOCAB_PARTS + 1);
        let out_len = batch_beam_size * 2;

        tracing::debug!(
            batch_size,
            num_beams,
            vocab_size,
            parts = shape.parts,
            scratch_len,
            "allocating beam top-k buffers"
        );

        Ok(Self {
            stream: stream.clone(),
            shape,
            scratch_scores: B::alloc_scores(stream, scratch_len)?,
            scratch_tokens: B::alloc_tokens(stream, scratch_len)?,
            out_scores: B::alloc_scores(stream, out_len)?,
            out_tokens: B::alloc_tokens(stream, out_len)?,
            out_beams: B::alloc_tokens(stream, out_len)?,
        })
    }

    /// Launch shape.
    #[must_use]
    pub fn shape(&self) -> TopKShape {
        self.shape
    }

    /// Enqueue both stages over `scores`.
    ///
    /// # Panics
    /// Panics if `scores` is not `batch_beam_size * vocab_size` long.
    ///
    /// # Errors
    /// Returns an error if a kernel launch fails.
    pub fn select(&mut self, scores: &B::Scores) -> Result<()> {
        assert_eq!(
            B::scores_len(scores),
            self.shape.rows() * self.shape.vocab_size,
            "score matrix does not match the top-k shape"
        );
        B::beam_topk(
            &self.stream,
            scores,
            self.shape,
            &mut self.scratch_scores,
            &mut self.scratch_tokens,
            &mut self.out_scores,
            &mut self.out_tokens,
            &mut self.out_beams,
        )
    }

    /// Synchronize and copy the candidates of the last [`select`] to the
    /// host.
    ///
    /// [`select`]: TopKSelector::select
    ///
    /// # Errors
    /// Returns an error if a device transfer fails.
    pub fn candidates(&self) -> Result<Candidates> {
        Ok(Candidates {
            scores: B::download_scores(&self.stream, &self.out_scores)?,
            tokens: B::download_tokens(&self.stream, &self.out_tokens)?,
            beams: B::download_tokens(&self.stream, &self.out_beams)?,
        })
    }
}
