//! Backend trait and op trait definitions for device-agnostic decoding.
//!
//! The search types are generic over `B: DecodeBackend` and express their
//! device work through the op traits below. Each backend (CUDA, CPU)
//! implements them on a marker type with its own buffer types.
//!
//! # Design notes
//!
//! - **Op traits extend `Backend`** and use its associated buffer types.
//! - **Every op takes the stream.** Work is enqueued in call order on that
//!   one stream; correctness relies on in-stream ordering only.
//! - **Downloads block.** `download_*` and `read_done_flag` synchronize the
//!   stream before touching host memory. They are the only host reads of
//!   device state.
//! - **Errors are `Result`s.** No backend installs a global error handler;
//!   the decode-loop driver owns the abort policy.

use crate::Result;

// ---- Core backend trait ----

/// A compute backend (CUDA, CPU).
pub trait Backend: 'static {
    /// Handle to the ordered execution stream that all work is enqueued on.
    type Stream: Clone;

    /// Device-resident `f32` buffer (scores, logits, beam scores).
    type Scores;

    /// Device-resident `i32` buffer (token ids, beam indices, sequences).
    type Tokens;

    /// Device-resident per-slot flags (the EOS-meet mask).
    type Mask;

    /// Single boolean written by device work and read by the host.
    type DoneFlag;
}

// ---- Op traits ----

/// Allocation, transfers and stream synchronization.
pub trait MemoryOps: Backend {
    /// Allocate a zero-filled score buffer.
    fn alloc_scores(stream: &Self::Stream, len: usize) -> Result<Self::Scores>;

    /// Allocate a zero-filled token buffer.
    fn alloc_tokens(stream: &Self::Stream, len: usize) -> Result<Self::Tokens>;

    /// Allocate a cleared flag mask.
    fn alloc_mask(stream: &Self::Stream, len: usize) -> Result<Self::Mask>;

    /// Allocate a done flag initialised to `false`.
    fn alloc_done_flag(stream: &Self::Stream) -> Result<Self::DoneFlag>;

    /// Copy host scores into a new device buffer.
    fn upload_scores(stream: &Self::Stream, data: &[f32]) -> Result<Self::Scores>;

    /// Copy host tokens into a new device buffer.
    fn upload_tokens(stream: &Self::Stream, data: &[i32]) -> Result<Self::Tokens>;

    /// Enqueue an overwrite of an existing score buffer with host data of the
    /// same length. Does not block the host.
    fn write_scores(stream: &Self::Stream, dst: &mut Self::Scores, data: &[f32]) -> Result<()>;

    /// Enqueue an overwrite of an existing token buffer with host data of the
    /// same length. Does not block the host.
    fn write_tokens(stream: &Self::Stream, dst: &mut Self::Tokens, data: &[i32]) -> Result<()>;

    /// Synchronize, then copy a score buffer to the host.
    fn download_scores(stream: &Self::Stream, src: &Self::Scores) -> Result<Vec<f32>>;

    /// Synchronize, then copy a token buffer to the host.
    fn download_tokens(stream: &Self::Stream, src: &Self::Tokens) -> Result<Vec<i32>>;

    /// Synchronize, then copy `len` tokens starting at `offset` to the host.
    fn download_token_range(
        stream: &Self::Stream,
        src: &Self::Tokens,
        offset: usize,
        len: usize,
    ) -> Result<Vec<i32>>;

    /// Number of elements in a score buffer.
    fn scores_len(buf: &Self::Scores) -> usize;

    /// Number of elements in a token buffer.
    fn tokens_len(buf: &Self::Tokens) -> usize;

    /// Block until all work enqueued on `stream` has completed.
    fn synchronize(stream: &Self::Stream) -> Result<()>;

    /// Enqueue a write of `value` into the done flag.
    fn set_done_flag(stream: &Self::Stream, flag: &Self::DoneFlag, value: bool) -> Result<()>;

    /// Synchronize, then read the done flag.
    fn read_done_flag(stream: &Self::Stream, flag: &Self::DoneFlag) -> Result<bool>;
}

/// Score-matrix transforms applied before token selection.
pub trait ScoreOps: Backend {
    /// Copy `rows * vocab_size` logits into `scores` and replace each row by
    /// its numerically stable log-softmax.
    fn log_softmax_rows(
        stream: &Self::Stream,
        logits: &Self::Scores,
        scores: &mut Self::Scores,
        rows: usize,
        vocab_size: usize,
    ) -> Result<()>;

    /// Write one score element at flat index `index`.
    fn write_score(
        stream: &Self::Stream,
        scores: &mut Self::Scores,
        index: usize,
        value: f32,
    ) -> Result<()>;

    /// Set column `token` of every row to `value`.
    fn fill_token_column(
        stream: &Self::Stream,
        scores: &mut Self::Scores,
        rows: usize,
        vocab_size: usize,
        token: usize,
        value: f32,
    ) -> Result<()>;

    /// Penalise every token that occurs in a row's first `sequence_length`
    /// entries of `sequences` (row stride `max_length`). Each distinct token
    /// is adjusted once: negative scores are multiplied by `penalty`, others
    /// divided by it.
    #[allow(clippy::too_many_arguments)]
    fn repetition_penalty(
        stream: &Self::Stream,
        sequences: &Self::Tokens,
        scores: &mut Self::Scores,
        rows: usize,
        vocab_size: usize,
        max_length: usize,
        sequence_length: usize,
        penalty: f32,
    ) -> Result<()>;

    /// Add `beam_scores[row]` to every element of that row.
    fn add_beam_scores(
        stream: &Self::Stream,
        scores: &mut Self::Scores,
        beam_scores: &Self::Scores,
        rows: usize,
        vocab_size: usize,
    ) -> Result<()>;
}

/// Shapes of a two-stage top-k launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopKShape {
    /// Batch elements
    pub batch_size: usize,
    /// Beams per batch element
    pub num_beams: usize,
    /// Row width
    pub vocab_size: usize,
    /// Candidates kept per batch element (`2 * num_beams`)
    pub k: usize,
    /// Vocabulary partitions processed independently in stage one
    pub parts: usize,
}

impl TopKShape {
    /// Vocabulary entries per partition (the last one may be shorter).
    #[must_use]
    pub fn part_size(&self) -> usize {
        self.vocab_size.div_ceil(self.parts)
    }

    /// Number of sequence slots.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.batch_size * self.num_beams
    }
}

/// Token selection.
pub trait SelectOps: Backend {
    /// Arg-max of each row into `out[row]`. Ties resolve to the lowest index.
    fn argmax_rows(
        stream: &Self::Stream,
        scores: &Self::Scores,
        rows: usize,
        vocab_size: usize,
        out: &mut Self::Tokens,
    ) -> Result<()>;

    /// Two-stage top-k over each batch element's `num_beams * vocab_size`
    /// candidates.
    ///
    /// Stage one writes per (row, part) local top-k lists into
    /// `scratch_scores` / `scratch_tokens`; stage two merges them into `k`
    /// candidates per batch element. Outputs hold `batch_size * k` entries,
    /// best first, with `out_beams` giving the source beam (`0..num_beams`).
    /// Equal scores order by the lower `beam * vocab_size + token`.
    #[allow(clippy::too_many_arguments)]
    fn beam_topk(
        stream: &Self::Stream,
        scores: &Self::Scores,
        shape: TopKShape,
        scratch_scores: &mut Self::Scores,
        scratch_tokens: &mut Self::Tokens,
        out_scores: &mut Self::Scores,
        out_tokens: &mut Self::Tokens,
        out_beams: &mut Self::Tokens,
    ) -> Result<()>;
}

/// End-of-sequence detection.
pub trait EosOps: Backend {
    /// For every slot: if its mask bit is set the token is replaced by
    /// `pad_token_id`, else a token equal to `eos_token_id` sets the bit.
    /// When every bit is set afterwards the done flag is written `true`.
    fn check_for_eos(
        stream: &Self::Stream,
        next_tokens: &mut Self::Tokens,
        eos_meet: &mut Self::Mask,
        eos_token_id: i32,
        pad_token_id: i32,
        done: &Self::DoneFlag,
    ) -> Result<()>;
}

/// Sequence buffer updates (`rows * max_length`, row-major).
pub trait SequenceOps: Backend {
    /// Write `tokens[row]` at column `sequence_length` of each row.
    fn append_column(
        stream: &Self::Stream,
        sequences: &mut Self::Tokens,
        tokens: &Self::Tokens,
        rows: usize,
        max_length: usize,
        sequence_length: usize,
    ) -> Result<()>;

    /// Row `i` of `dst` becomes the first `sequence_length` tokens of row
    /// `sources[i]` of `src`, followed by `tokens[i]`.
    #[allow(clippy::too_many_arguments)]
    fn gather_append(
        stream: &Self::Stream,
        src: &Self::Tokens,
        dst: &mut Self::Tokens,
        sources: &Self::Tokens,
        tokens: &Self::Tokens,
        rows: usize,
        max_length: usize,
        sequence_length: usize,
    ) -> Result<()>;
}

/// Everything a search needs from a backend.
pub trait DecodeBackend: MemoryOps + ScoreOps + SelectOps + EosOps + SequenceOps {}

impl<B> DecodeBackend for B where B: MemoryOps + ScoreOps + SelectOps + EosOps + SequenceOps {}
