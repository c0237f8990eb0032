//! Shared helpers for CPU integration tests.
#![allow(dead_code)]

use beamline::{Model, Result, SequenceStore};
use beamline_cpu::{CpuBackend, CpuStream};

/// End-of-sequence token shared by the integration tests.
pub const EOS: i32 = 0;

/// Logit given to the token a [`ScriptedModel`] favours. EOS gets the
/// negation unless it is the favoured token.
pub const FAVOURED_LOGIT: f32 = 10.0;

/// Route `tracing` output through the test harness. Safe to call from every
/// test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fake model: every slot gets logit [`FAVOURED_LOGIT`] on the token
/// `script(step, slot)` picks, `-FAVOURED_LOGIT` on EOS otherwise and 0.0
/// everywhere else.
pub struct ScriptedModel<F> {
    pub vocab_size: usize,
    pub prompt_length: usize,
    pub script: F,
    pub calls: usize,
}

impl<F: Fn(usize, usize) -> i32> ScriptedModel<F> {
    pub fn new(vocab_size: usize, prompt_length: usize, script: F) -> Self {
        Self {
            vocab_size,
            prompt_length,
            script,
            calls: 0,
        }
    }
}

impl<F: Fn(usize, usize) -> i32> Model<CpuBackend> for ScriptedModel<F> {
    fn forward(
        &mut self,
        _stream: &CpuStream,
        sequences: &SequenceStore<CpuBackend>,
    ) -> Result<Vec<f32>> {
        self.calls += 1;
        let step = sequences.sequence_length() - self.prompt_length;
        Ok(scripted_logits(
            sequences.batch_beam_size(),
            self.vocab_size,
            |slot| (self.script)(step, slot),
        ))
    }
}

/// `rows * vocab_size` logits favouring `favoured(row)` in each row.
#[allow(clippy::cast_sign_loss)]
pub fn scripted_logits(
    rows: usize,
    vocab_size: usize,
    favoured: impl Fn(usize) -> i32,
) -> Vec<f32> {
    let mut logits = vec![0.0; rows * vocab_size];
    for (row, chunk) in logits.chunks_exact_mut(vocab_size).enumerate() {
        chunk[EOS as usize] = -FAVOURED_LOGIT;
        chunk[favoured(row) as usize] = FAVOURED_LOGIT;
    }
    logits
}
