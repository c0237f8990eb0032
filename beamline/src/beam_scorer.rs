//! Host-side beam re-ranking.
//!
//! Consumes the top-k candidates of each step, retires EOS candidates into
//! a per-batch pool of finished hypotheses, picks the `num_beams` live beams
//! for the next step, and assembles the final output.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use crate::params::SearchParams;
use crate::sequences::SequenceView;
use crate::topk::Candidates;
use crate::Result;

/// Initial score of every beam but the first. All beams of a batch element
/// start from the same prompt; this keeps step one from proposing the same
/// continuation once per beam.
const INACTIVE_BEAM_SCORE: f32 = -1e9;

/// Why a batch element stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// `num_beams` hypotheses finished and no live beam can beat them.
    Completed,
    /// Candidates ran out before `num_beams` live beams could be chosen.
    Exhausted,
    /// Sequences reached `max_length`.
    LengthCap,
}

/// Per batch element search state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeamState {
    Active,
    Done(DoneReason),
}

impl BeamState {
    /// Whether the element stopped for any reason.
    #[must_use]
    pub fn is_done(self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// A finished (or force-finished) sequence with its normalized score.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub score: f32,
    pub tokens: Vec<i32>,
}

/// Bounded pool of the best finished hypotheses of one batch element.
#[derive(Debug, Clone)]
pub struct BeamHypotheses {
    capacity: usize,
    length_penalty: f32,
    early_stopping: bool,
    beams: Vec<Hypothesis>,
}

impl BeamHypotheses {
    #[must_use]
    pub fn new(capacity: usize, length_penalty: f32, early_stopping: bool) -> Self {
        Self {
            capacity,
            length_penalty,
            early_stopping,
            beams: Vec::with_capacity(capacity + 1),
        }
    }

    /// Number of pooled hypotheses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beams.is_empty()
    }

    /// Whether the pool holds `capacity` hypotheses.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.beams.len() >= self.capacity
    }

    /// Length-normalized score for a cumulative log-likelihood.
    #[must_use]
    pub fn normalize(&self, sum_logprobs: f32, length: usize) -> f32 {
        sum_logprobs / (length as f32).powf(self.length_penalty)
    }

    /// Lowest pooled score, `f32::MAX` when empty.
    #[must_use]
    pub fn worst_score(&self) -> f32 {
        self.beams
            .iter()
            .map(|h| h.score)
            .fold(f32::MAX, f32::min)
    }

    /// Offer a hypothesis. It is kept if the pool has room or it beats the
    /// worst pooled one, which is then evicted.
    pub fn add(&mut self, tokens: Vec<i32>, sum_logprobs: f32) {
        let score = self.normalize(sum_logprobs, tokens.len());
        if self.is_full() && score <= self.worst_score() {
            return;
        }
        self.beams.push(Hypothesis { score, tokens });
        if self.beams.len() > self.capacity {
            let worst = self
                .beams
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.score.total_cmp(&b.score))
                .map(|(i, _)| i);
            if let Some(i) = worst {
                self.beams.remove(i);
            }
        }
    }

    /// Whether the best live beam (cumulative `best_sum_logprobs` at
    /// `current_length`) can no longer enter the pool.
    #[must_use]
    pub fn is_done(&self, best_sum_logprobs: f32, current_length: usize) -> bool {
        if !self.is_full() {
            false
        } else if self.early_stopping {
            true
        } else {
            self.worst_score() >= self.normalize(best_sum_logprobs, current_length)
        }
    }

    /// Hypotheses sorted best first. Equal scores keep insertion order.
    #[must_use]
    pub fn into_sorted(mut self) -> Vec<Hypothesis> {
        self.beams.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.beams
    }
}

/// Re-ranking engine for all batch elements of one search.
pub struct BeamScorer {
    batch_size: usize,
    num_beams: usize,
    max_length: usize,
    eos_token_id: i32,
    pad_token_id: i32,
    states: Vec<BeamState>,
    hypotheses: Vec<BeamHypotheses>,
    next_scores: Vec<f32>,
    next_tokens: Vec<i32>,
    next_indices: Vec<i32>,
}

impl BeamScorer {
    #[must_use]
    pub fn new(params: &SearchParams) -> Self {
        let batch_beam_size = params.batch_beam_size();
        let next_scores = (0..batch_beam_size)
            .map(|slot| {
                if slot % params.num_beams == 0 {
                    0.0
                } else {
                    INACTIVE_BEAM_SCORE
                }
            })
            .collect();
        let next_indices = (0..batch_beam_size as i32).collect();

        Self {
            batch_size: params.batch_size,
            num_beams: params.num_beams,
            max_length: params.max_length,
            eos_token_id: params.eos_token_id,
            pad_token_id: params.pad_token_id,
            states: vec![BeamState::Active; params.batch_size],
            hypotheses: (0..params.batch_size)
                .map(|_| {
                    BeamHypotheses::new(
                        params.num_beams,
                        params.length_penalty,
                        params.early_stopping,
                    )
                })
                .collect(),
            next_scores,
            next_tokens: vec![params.pad_token_id; batch_beam_size],
            next_indices,
        }
    }

    /// Re-rank one step's candidates.
    ///
    /// `candidates` must come from a completed top-k: the caller
    /// synchronizes the stream before downloading them.
    ///
    /// # Panics
    /// Panics if `candidates` does not hold `2 * num_beams` entries per batch
    /// element.
    ///
    /// # Errors
    /// Returns an error if reading a finished sequence from the device fails.
    pub fn process(
        &mut self,
        sequences: &impl SequenceView,
        candidates: &Candidates,
    ) -> Result<()> {
        let k = 2 * self.num_beams;
        let expected = self.batch_size * k;
        assert!(
            candidates.scores.len() == expected
                && candidates.tokens.len() == expected
                && candidates.beams.len() == expected,
            "expected {expected} candidates"
        );
        let current_length = sequences.sequence_length();

        for batch in 0..self.batch_size {
            let base = batch * self.num_beams;

            if self.states[batch].is_done() {
                for slot in base..base + self.num_beams {
                    self.next_scores[slot] = 0.0;
                    self.next_tokens[slot] = self.pad_token_id;
                    self.next_indices[slot] = slot as i32;
                }
                continue;
            }

            let mut chosen = 0;
            let mut retired = 0;
            for rank in 0..k {
                let c = batch * k + rank;
                let score = candidates.scores[c];
                let token = candidates.tokens[c];
                let source = base + candidates.beams[c] as usize;

                if token == self.eos_token_id {
                    // A weak EOS (below the top num_beams) is not worth keeping.
                    if rank >= self.num_beams {
                        continue;
                    }
                    let mut tokens = sequences.sequence(source)?;
                    tokens.push(token);
                    self.hypotheses[batch].add(tokens, score);
                    retired += 1;
                } else {
                    let slot = base + chosen;
                    self.next_scores[slot] = score;
                    self.next_tokens[slot] = token;
                    self.next_indices[slot] = source as i32;
                    chosen += 1;
                }

                if chosen == self.num_beams {
                    break;
                }
            }

            if chosen < self.num_beams {
                // The surviving continuations become final as they are.
                for slot in base..base + chosen {
                    let mut tokens = sequences.sequence(self.next_indices[slot] as usize)?;
                    tokens.push(self.next_tokens[slot]);
                    self.hypotheses[batch].add(tokens, self.next_scores[slot]);
                }
                for slot in base + chosen..base + self.num_beams {
                    self.next_scores[slot] = INACTIVE_BEAM_SCORE;
                    self.next_tokens[slot] = self.pad_token_id;
                    self.next_indices[slot] = slot as i32;
                }
                self.states[batch] = BeamState::Done(DoneReason::Exhausted);
                tracing::debug!(batch, chosen, retired, "batch element ran out of live beams");
                continue;
            }

            if self.hypotheses[batch].is_done(self.next_scores[base], current_length + 1) {
                self.states[batch] = BeamState::Done(DoneReason::Completed);
                tracing::debug!(
                    batch,
                    finished = self.hypotheses[batch].len(),
                    "batch element completed"
                );
            } else if retired > 0 {
                tracing::trace!(batch, retired, "hypotheses retired");
            }
        }
        Ok(())
    }

    /// Apply the length-cap transition for `sequence_length` and report
    /// whether every batch element is done.
    pub fn is_done(&mut self, sequence_length: usize) -> bool {
        if sequence_length >= self.max_length {
            for state in &mut self.states {
                if !state.is_done() {
                    *state = BeamState::Done(DoneReason::LengthCap);
                }
            }
        }
        self.is_done_later()
    }

    /// Whether every batch element is done.
    #[must_use]
    pub fn is_done_later(&self) -> bool {
        self.states.iter().all(|s| s.is_done())
    }

    /// State of one batch element.
    #[must_use]
    pub fn state(&self, batch: usize) -> BeamState {
        self.states[batch]
    }

    /// Finished hypotheses pooled so far for one batch element.
    #[must_use]
    pub fn hypotheses(&self, batch: usize) -> &BeamHypotheses {
        &self.hypotheses[batch]
    }

    /// Cumulative scores of the live beams, one per slot.
    #[must_use]
    pub fn next_scores(&self) -> &[f32] {
        &self.next_scores
    }

    /// Tokens the live beams append next, one per slot.
    #[must_use]
    pub fn next_tokens(&self) -> &[i32] {
        &self.next_tokens
    }

    /// Flattened source slot each live beam extends, one per slot.
    #[must_use]
    pub fn next_indices(&self) -> &[i32] {
        &self.next_indices
    }

    /// Write the best `num_return_sequences` hypotheses of every batch
    /// element into `output` (`max_length` wide rows, padded with
    /// `pad_token_id`) and their scores into `scores`, best first.
    ///
    /// Elements that did not finish on their own contribute their live beams
    /// first. Rows beyond the available hypotheses are all padding with
    /// score `f32::MIN`.
    ///
    /// # Panics
    /// Panics if `num_return_sequences` is 0 or above `num_beams`, or if the
    /// output buffers have the wrong size.
    ///
    /// # Errors
    /// Returns an error if reading a sequence from the device fails.
    pub fn finalize(
        mut self,
        sequences: &impl SequenceView,
        num_return_sequences: usize,
        output: &mut [i32],
        scores: &mut [f32],
    ) -> Result<()> {
        assert!(
            (1..=self.num_beams).contains(&num_return_sequences),
            "num_return_sequences must be in 1..={}, got {num_return_sequences}",
            self.num_beams
        );
        assert_eq!(
            output.len(),
            self.batch_size * num_return_sequences * self.max_length,
            "output buffer size"
        );
        assert_eq!(
            scores.len(),
            self.batch_size * num_return_sequences,
            "scores buffer size"
        );

        for batch in 0..self.batch_size {
            let open = matches!(
                self.states[batch],
                BeamState::Active | BeamState::Done(DoneReason::LengthCap)
            );
            if open {
                let base = batch * self.num_beams;
                for slot in base..base + self.num_beams {
                    let tokens = sequences.sequence(slot)?;
                    self.hypotheses[batch].add(tokens, self.next_scores[slot]);
                }
            }
        }

        output.fill(self.pad_token_id);
        scores.fill(f32::MIN);
        for (batch, pool) in self.hypotheses.into_iter().enumerate() {
            for (i, hyp) in pool
                .into_sorted()
                .into_iter()
                .take(num_return_sequences)
                .enumerate()
            {
                let row = batch * num_return_sequences + i;
                let len = hyp.tokens.len().min(self.max_length);
                output[row * self.max_length..row * self.max_length + len]
                    .copy_from_slice(&hyp.tokens[..len]);
                scores[row] = hyp.score;
            }
        }
        Ok(())
    }
}
