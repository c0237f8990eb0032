//! Greedy or beam decoding over a random bigram model on the CPU backend
//!
//! Usage:
//!   cargo run -p beamline-cpu --example decode -- --beams 4 --max-length 16
//!   cargo run -p beamline-cpu --example decode -- --params search.json
//!   RUST_LOG=beamline=debug cargo run -p beamline-cpu --example decode

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use beamline::{Generator, Model, Result, SearchParams, SequenceStore};
use beamline_cpu::{CpuBackend, CpuStream};

/// Decode from a seeded random bigram table
#[derive(Parser)]
#[command(name = "decode")]
struct Cli {
    /// Search parameters as JSON (overrides the flags below)
    #[arg(long, env = "BEAMLINE_PARAMS")]
    params: Option<String>,

    /// Beams per prompt (1 = greedy)
    #[arg(short, long, default_value_t = 4)]
    beams: usize,

    /// Vocabulary size
    #[arg(short, long, default_value_t = 64)]
    vocab: usize,

    /// Maximum sequence length including the prompt
    #[arg(short = 'n', long, default_value_t = 16)]
    max_length: usize,

    /// Sequences returned per prompt
    #[arg(short = 'r', long, default_value_t = 1)]
    num_return: usize,

    /// Repetition penalty (1.0 = disabled)
    #[arg(long, default_value_t = 1.2)]
    repetition_penalty: f32,

    /// RNG seed for the bigram table
    #[arg(short, long, default_value_t = 42)]
    seed: u64,
}

/// Next-token logits depend only on the last token.
struct BigramModel {
    vocab_size: usize,
    table: Vec<f32>,
}

impl BigramModel {
    fn new(vocab_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let table = (0..vocab_size * vocab_size)
            .map(|_| rng.gen_range(-4.0..4.0))
            .collect();
        Self { vocab_size, table }
    }
}

impl Model<CpuBackend> for BigramModel {
    #[allow(clippy::cast_sign_loss)]
    fn forward(
        &mut self,
        _stream: &CpuStream,
        sequences: &SequenceStore<CpuBackend>,
    ) -> Result<Vec<f32>> {
        let len = sequences.sequence_length();
        let stride = sequences.max_length();
        let host = sequences.to_host()?;
        let mut logits = Vec::with_capacity(sequences.batch_beam_size() * self.vocab_size);
        for slot in 0..sequences.batch_beam_size() {
            let last = host[slot * stride + len - 1] as usize;
            let row = last * self.vocab_size..(last + 1) * self.vocab_size;
            logits.extend_from_slice(&self.table[row]);
        }
        Ok(logits)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("beamline=info")),
        )
        .init();

    let cli = Cli::parse();
    let params = match &cli.params {
        Some(path) => SearchParams::from_file(path)?,
        None => SearchParams::new(2, cli.vocab, cli.max_length, 0, 1)
            .with_num_beams(cli.beams)
            .with_num_return_sequences(cli.num_return)
            .with_repetition_penalty(cli.repetition_penalty),
    };

    let prompt: Vec<i32> = (0..params.batch_size)
        .flat_map(|b| [2, 3 + b as i32])
        .collect();
    let model = BigramModel::new(params.vocab_size, cli.seed);
    let output = Generator::new(params.clone(), &CpuStream, &prompt, model)?.try_generate()?;

    for batch in 0..params.batch_size {
        for i in 0..output.num_return_sequences {
            println!(
                "prompt {batch} #{i} (score {:.4}): {:?}",
                output.score(batch, i),
                output.sequence(batch, i)
            );
        }
    }
    Ok(())
}
