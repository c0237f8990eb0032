//! Greedy and beam search over one decode run.
//!
//! A [`Search`] is driven once per step in a fixed order:
//!
//! 1. [`Search::set_logits`]
//! 2. score processors ([`crate::processors`])
//! 3. [`Search::next_tokens_from_logits`]
//! 4. [`Search::check_for_eos`]
//! 5. [`Search::append_next_tokens_to_sequences`]
//! 6. [`Search::is_done`]
//!
//! and finished with [`Search::finalize`]. All device work is enqueued on the
//! stream given at construction. Beam search blocks on that stream exactly
//! once per step, right before the host re-ranks the top-k candidates.

#![allow(clippy::missing_panics_doc)]

use crate::backend::DecodeBackend;
use crate::beam_scorer::BeamScorer;
use crate::params::SearchParams;
use crate::scores::ScoreBuffer;
use crate::sequences::{SequenceStore, SequenceView};
use crate::termination::TerminationTracker;
use crate::topk::TopKSelector;
use crate::Result;

/// Buffers and configuration shared by both decoding modes.
pub struct SearchState<B: DecodeBackend> {
    pub(crate) params: SearchParams,
    pub(crate) stream: B::Stream,
    pub(crate) sequences: SequenceStore<B>,
    pub(crate) scores: ScoreBuffer<B>,
    pub(crate) termination: TerminationTracker<B>,
}

impl<B: DecodeBackend> SearchState<B> {
    fn new(params: SearchParams, stream: &B::Stream, input_ids: &[i32]) -> Result<Self> {
        let slots = params.batch_beam_size();
        let sequences = SequenceStore::new(
            stream,
            input_ids,
            params.batch_size,
            params.num_beams,
            params.max_length,
        )?;
        let scores = ScoreBuffer::new(stream, slots, params.vocab_size)?;
        let termination =
            TerminationTracker::new(stream, slots, params.eos_token_id, params.pad_token_id)?;
        if sequences.sequence_length() >= params.max_length {
            termination.mark_done()?;
        }
        Ok(Self {
            params,
            stream: stream.clone(),
            sequences,
            scores,
            termination,
        })
    }

    /// Run configuration.
    #[must_use]
    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// The stream all work is enqueued on.
    #[must_use]
    pub fn stream(&self) -> &B::Stream {
        &self.stream
    }

    /// Token sequences of every slot.
    #[must_use]
    pub fn sequences(&self) -> &SequenceStore<B> {
        &self.sequences
    }

    /// This step's score matrix.
    #[must_use]
    pub fn scores(&self) -> &ScoreBuffer<B> {
        &self.scores
    }

    /// This step's score matrix, for in-place processors.
    pub fn scores_mut(&mut self) -> &mut ScoreBuffer<B> {
        &mut self.scores
    }

    /// Current sequence length.
    #[must_use]
    pub fn sequence_length(&self) -> usize {
        self.sequences.sequence_length()
    }
}

/// One token per sequence by arg-max.
pub struct GreedySearch<B: DecodeBackend> {
    state: SearchState<B>,
    next_tokens: B::Tokens,
}

impl<B: DecodeBackend> GreedySearch<B> {
    /// # Errors
    /// Returns [`crate::Error::Config`] for invalid parameters, or an error
    /// if device allocation fails.
    pub fn new(params: SearchParams, stream: &B::Stream, input_ids: &[i32]) -> Result<Self> {
        assert_eq!(params.num_beams, 1, "greedy search runs with a single beam");
        params.validate()?;
        let next_tokens = B::alloc_tokens(stream, params.batch_size)?;
        Ok(Self {
            state: SearchState::new(params, stream, input_ids)?,
            next_tokens,
        })
    }

    fn next_tokens_from_logits(&mut self) -> Result<()> {
        let s = &self.state;
        B::argmax_rows(
            &s.stream,
            s.scores.scores(),
            s.params.batch_size,
            s.params.vocab_size,
            &mut self.next_tokens,
        )
    }

    fn check_for_eos(&mut self) -> Result<()> {
        self.state.termination.check(&mut self.next_tokens)
    }

    fn append_next_tokens_to_sequences(&mut self) -> Result<()> {
        self.state.sequences.append_next_tokens(&self.next_tokens)?;
        if self.state.sequences.sequence_length() == self.state.params.max_length {
            self.state.termination.mark_done()?;
        }
        Ok(())
    }

    fn finalize(
        self,
        num_return_sequences: usize,
        output: &mut [i32],
        scores: &mut [f32],
    ) -> Result<()> {
        let p = &self.state.params;
        assert_eq!(
            num_return_sequences, 1,
            "greedy search returns one sequence per prompt"
        );
        assert_eq!(output.len(), p.batch_size * p.max_length, "output buffer size");
        assert_eq!(scores.len(), p.batch_size, "scores buffer size");

        output.fill(p.pad_token_id);
        for (slot, row) in output.chunks_exact_mut(p.max_length).enumerate() {
            let tokens = self.state.sequences.sequence(slot)?;
            row[..tokens.len()].copy_from_slice(&tokens);
        }
        // Greedy keeps no cumulative score.
        scores.fill(0.0);
        Ok(())
    }
}

/// `num_beams` live hypotheses per prompt, re-ranked on the host each step.
pub struct BeamSearch<B: DecodeBackend> {
    state: SearchState<B>,
    scorer: BeamScorer,
    topk: TopKSelector<B>,
    beam_scores: B::Scores,
    next_tokens: B::Tokens,
    next_indices: B::Tokens,
}

impl<B: DecodeBackend> BeamSearch<B> {
    /// # Panics
    /// Panics if `num_beams <= 1` (use greedy search) or above
    /// [`crate::topk::MAX_BEAMS`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] for invalid parameters, or an error
    /// if device allocation fails.
    pub fn new(params: SearchParams, stream: &B::Stream, input_ids: &[i32]) -> Result<Self> {
        assert!(
            params.num_beams > 1,
            "beam search needs num_beams > 1, got {}",
            params.num_beams
        );
        params.validate()?;
        let slots = params.batch_beam_size();
        let scorer = BeamScorer::new(&params);
        let topk = TopKSelector::new(
            stream,
            params.batch_size,
            params.num_beams,
            params.vocab_size,
        )?;
        let beam_scores = B::upload_scores(stream, scorer.next_scores())?;
        let next_tokens = B::alloc_tokens(stream, slots)?;
        let next_indices = B::alloc_tokens(stream, slots)?;
        Ok(Self {
            state: SearchState::new(params, stream, input_ids)?,
            scorer,
            topk,
            beam_scores,
            next_tokens,
            next_indices,
        })
    }

    /// The host re-ranking engine.
    #[must_use]
    pub fn scorer(&self) -> &BeamScorer {
        &self.scorer
    }

    fn next_tokens_from_logits(&mut self) -> Result<()> {
        let s = &mut self.state;
        let rows = s.params.batch_beam_size();
        let vocab_size = s.params.vocab_size;

        B::add_beam_scores(
            &s.stream,
            s.scores.scores_mut(),
            &self.beam_scores,
            rows,
            vocab_size,
        )?;
        self.topk.select(s.scores.scores())?;

        // The one host/device rendezvous of the step: re-ranking below reads
        // the finished top-k results.
        B::synchronize(&s.stream)?;
        let candidates = self.topk.candidates()?;
        self.scorer.process(&s.sequences, &candidates)?;

        B::write_tokens(&s.stream, &mut self.next_tokens, self.scorer.next_tokens())?;
        B::write_tokens(&s.stream, &mut self.next_indices, self.scorer.next_indices())?;
        B::write_scores(&s.stream, &mut self.beam_scores, self.scorer.next_scores())?;
        Ok(())
    }

    fn check_for_eos(&mut self) -> Result<()> {
        self.state.termination.check(&mut self.next_tokens)?;
        if self.scorer.is_done_later() {
            self.state.termination.mark_done()?;
        }
        Ok(())
    }

    fn append_next_tokens_to_sequences(&mut self) -> Result<()> {
        self.state
            .sequences
            .append_reordered(&self.next_indices, &self.next_tokens)
    }

    fn is_done(&mut self) -> Result<bool> {
        if self.scorer.is_done(self.state.sequences.sequence_length()) {
            self.state.termination.mark_done()?;
        }
        self.state.termination.is_done()
    }

    fn finalize(
        self,
        num_return_sequences: usize,
        output: &mut [i32],
        scores: &mut [f32],
    ) -> Result<()> {
        self.scorer
            .finalize(&self.state.sequences, num_return_sequences, output, scores)
    }
}

/// A decode run, greedy or beam, chosen once from `num_beams`.
pub enum Search<B: DecodeBackend> {
    Greedy(GreedySearch<B>),
    Beam(BeamSearch<B>),
}

impl<B: DecodeBackend> Search<B> {
    /// Create a search over a `(batch_size, prompt_length)` row-major prompt.
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] for invalid parameters, or an error
    /// if device allocation fails.
    pub fn new(params: SearchParams, stream: &B::Stream, input_ids: &[i32]) -> Result<Self> {
        params.validate()?;
        tracing::info!(
            mode = if params.is_beam_search() { "beam" } else { "greedy" },
            batch_size = params.batch_size,
            num_beams = params.num_beams,
            vocab_size = params.vocab_size,
            max_length = params.max_length,
            "creating search"
        );
        if params.is_beam_search() {
            Ok(Self::Beam(BeamSearch::new(params, stream, input_ids)?))
        } else {
            Ok(Self::Greedy(GreedySearch::new(params, stream, input_ids)?))
        }
    }

    /// Shared state.
    #[must_use]
    pub fn state(&self) -> &SearchState<B> {
        match self {
            Self::Greedy(g) => &g.state,
            Self::Beam(b) => &b.state,
        }
    }

    /// Shared state, mutable.
    pub fn state_mut(&mut self) -> &mut SearchState<B> {
        match self {
            Self::Greedy(g) => &mut g.state,
            Self::Beam(b) => &mut b.state,
        }
    }

    /// Run configuration.
    #[must_use]
    pub fn params(&self) -> &SearchParams {
        &self.state().params
    }

    /// Current sequence length.
    #[must_use]
    pub fn sequence_length(&self) -> usize {
        self.state().sequence_length()
    }

    /// Load this step's logits, shape `(batch_beam_size, 1, vocab_size)`.
    ///
    /// # Errors
    /// Returns an error if the kernel launch fails.
    pub fn set_logits(&mut self, logits: &B::Scores) -> Result<()> {
        self.state_mut().scores.set_logits(logits)
    }

    /// Choose the next token of every slot from the processed scores.
    ///
    /// # Errors
    /// Returns an error if a device call fails.
    pub fn next_tokens_from_logits(&mut self) -> Result<()> {
        match self {
            Self::Greedy(g) => g.next_tokens_from_logits(),
            Self::Beam(b) => b.next_tokens_from_logits(),
        }
    }

    /// Update the EOS mask and done flag from the chosen tokens.
    ///
    /// # Errors
    /// Returns an error if the kernel launch fails.
    pub fn check_for_eos(&mut self) -> Result<()> {
        match self {
            Self::Greedy(g) => g.check_for_eos(),
            Self::Beam(b) => b.check_for_eos(),
        }
    }

    /// Append the chosen tokens (reordering beams in beam search).
    ///
    /// # Errors
    /// Returns an error if the kernel launch fails.
    pub fn append_next_tokens_to_sequences(&mut self) -> Result<()> {
        let result = match self {
            Self::Greedy(g) => g.append_next_tokens_to_sequences(),
            Self::Beam(b) => b.append_next_tokens_to_sequences(),
        };
        tracing::debug!(sequence_length = self.sequence_length(), "appended next tokens");
        result
    }

    /// Whether generation should stop. Synchronizes the stream.
    ///
    /// # Errors
    /// Returns an error if synchronization fails.
    pub fn is_done(&mut self) -> Result<bool> {
        match self {
            Self::Greedy(g) => g.state.termination.is_done(),
            Self::Beam(b) => b.is_done(),
        }
    }

    /// Tokens chosen by the last [`Search::next_tokens_from_logits`], one per
    /// slot, after EOS padding.
    ///
    /// # Errors
    /// Returns an error if the device transfer fails.
    pub fn next_tokens(&self) -> Result<Vec<i32>> {
        match self {
            Self::Greedy(g) => B::download_tokens(&g.state.stream, &g.next_tokens),
            Self::Beam(b) => B::download_tokens(&b.state.stream, &b.next_tokens),
        }
    }

    /// Source slot of every live beam (beam search only).
    #[must_use]
    pub fn next_indices(&self) -> Option<&[i32]> {
        match self {
            Self::Greedy(_) => None,
            Self::Beam(b) => Some(b.scorer.next_indices()),
        }
    }

    /// Write `num_return_sequences` best sequences per prompt into `output`
    /// (`max_length` wide, pad-filled) and their scores into `scores`.
    /// Consumes the search, so it runs at most once.
    ///
    /// # Errors
    /// Returns an error if a device transfer fails.
    pub fn finalize(
        self,
        num_return_sequences: usize,
        output: &mut [i32],
        scores: &mut [f32],
    ) -> Result<()> {
        match self {
            Self::Greedy(g) => g.finalize(num_return_sequences, output, scores),
            Self::Beam(b) => b.finalize(num_return_sequences, output, scores),
        }
    }
}
