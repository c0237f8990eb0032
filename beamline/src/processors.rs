//! Score processors.
//!
//! Each one rewrites the current score matrix in place after
//! [`Search::set_logits`] and before [`Search::next_tokens_from_logits`].

use crate::backend::DecodeBackend;
use crate::search::Search;
use crate::Result;

/// Forbid EOS while sequences are shorter than `min_length`.
///
/// # Errors
/// Returns an error if the kernel launch fails.
pub fn min_length<B: DecodeBackend>(search: &mut Search<B>, min_length: usize) -> Result<()> {
    let state = search.state_mut();
    if state.sequence_length() >= min_length {
        return Ok(());
    }
    let rows = state.scores.rows();
    let vocab_size = state.scores.vocab_size();
    #[allow(clippy::cast_sign_loss)]
    let eos = state.params.eos_token_id as usize;
    B::fill_token_column(
        &state.stream,
        state.scores.scores_mut(),
        rows,
        vocab_size,
        eos,
        f32::MIN,
    )
}

/// Discourage tokens already present in each slot's sequence.
///
/// A penalty of exactly `1.0` leaves the scores untouched.
///
/// # Errors
/// Returns an error if the kernel launch fails.
#[allow(clippy::float_cmp)]
pub fn repetition_penalty<B: DecodeBackend>(search: &mut Search<B>, penalty: f32) -> Result<()> {
    if penalty == 1.0 {
        return Ok(());
    }
    let state = search.state_mut();
    let rows = state.scores.rows();
    let vocab_size = state.scores.vocab_size();
    B::repetition_penalty(
        &state.stream,
        state.sequences.sequences(),
        state.scores.scores_mut(),
        rows,
        vocab_size,
        state.sequences.max_length(),
        state.sequences.sequence_length(),
        penalty,
    )
}
