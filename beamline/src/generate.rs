//! Decode-loop driver.

use crate::backend::DecodeBackend;
use crate::error::fatal;
use crate::params::SearchParams;
use crate::processors;
use crate::search::Search;
use crate::sequences::SequenceStore;
use crate::Result;

/// Produces next-token logits for every slot.
///
/// Called once per step with the current sequences. The returned buffer has
/// shape `(batch_beam_size, 1, vocab_size)`, on the same stream.
pub trait Model<B: DecodeBackend> {
    /// Forward pass over the current sequences.
    ///
    /// # Errors
    /// Returns an error if the forward pass fails.
    fn forward(
        &mut self,
        stream: &B::Stream,
        sequences: &SequenceStore<B>,
    ) -> Result<B::Scores>;
}

/// Finished sequences of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    /// `batch_size * num_return_sequences` rows of `max_length` tokens,
    /// right-padded with the pad token
    pub sequences: Vec<i32>,
    /// Length-normalized score of each row (0.0 for greedy)
    pub scores: Vec<f32>,
    /// Rows per prompt
    pub num_return_sequences: usize,
    /// Row width
    pub max_length: usize,
}

impl GenerationOutput {
    /// Row `i` of prompt `batch`.
    #[must_use]
    pub fn sequence(&self, batch: usize, i: usize) -> &[i32] {
        let row = batch * self.num_return_sequences + i;
        &self.sequences[row * self.max_length..(row + 1) * self.max_length]
    }

    /// Score of row `i` of prompt `batch`.
    #[must_use]
    pub fn score(&self, batch: usize, i: usize) -> f32 {
        self.scores[batch * self.num_return_sequences + i]
    }
}

/// Runs a [`Search`] against a [`Model`] until done.
pub struct Generator<B: DecodeBackend, M: Model<B>> {
    search: Search<B>,
    model: M,
    steps: usize,
}

impl<B: DecodeBackend, M: Model<B>> Generator<B, M> {
    /// # Errors
    /// Returns an error for invalid parameters or if allocation fails.
    pub fn new(
        params: SearchParams,
        stream: &B::Stream,
        input_ids: &[i32],
        model: M,
    ) -> Result<Self> {
        Ok(Self {
            search: Search::new(params, stream, input_ids)?,
            model,
            steps: 0,
        })
    }

    /// The underlying search.
    #[must_use]
    pub fn search(&self) -> &Search<B> {
        &self.search
    }

    /// Run one decode step and report whether generation is done.
    ///
    /// # Errors
    /// Returns an error if the model or a device call fails.
    pub fn step(&mut self) -> Result<bool> {
        let state = self.search.state();
        let logits = self.model.forward(state.stream(), state.sequences())?;

        let min_length = self.search.params().min_length;
        let penalty = self.search.params().repetition_penalty;

        self.search.set_logits(&logits)?;
        processors::min_length(&mut self.search, min_length)?;
        processors::repetition_penalty(&mut self.search, penalty)?;
        self.search.next_tokens_from_logits()?;
        self.search.check_for_eos()?;
        self.search.append_next_tokens_to_sequences()?;
        self.steps += 1;

        self.search.is_done()
    }

    /// Decode until done and collect `num_return_sequences` rows per prompt.
    ///
    /// # Errors
    /// Returns the first model or device error.
    pub fn try_generate(mut self) -> Result<GenerationOutput> {
        while !self.search.is_done()? {
            self.step()?;
        }

        let params = self.search.params().clone();
        let n = params.num_return_sequences;
        let mut sequences = vec![params.pad_token_id; params.batch_size * n * params.max_length];
        let mut scores = vec![0.0; params.batch_size * n];
        self.search.finalize(n, &mut sequences, &mut scores)?;

        tracing::info!(
            steps = self.steps,
            batch_size = params.batch_size,
            num_return_sequences = n,
            "generation finished"
        );
        Ok(GenerationOutput {
            sequences,
            scores,
            num_return_sequences: n,
            max_length: params.max_length,
        })
    }

    /// [`Generator::try_generate`], aborting the process on any device
    /// error.
    #[must_use]
    pub fn generate(self) -> GenerationOutput {
        self.try_generate().unwrap_or_else(|err| fatal(&err))
    }
}
