//! Beamline: device-resident greedy and beam-search decoding
//!
//! This crate provides the search state machines and the backend traits they
//! run on. Backend implementations (CPU, CUDA) are in separate crates.

#[allow(clippy::missing_errors_doc, clippy::doc_markdown)]
pub mod backend;
pub mod beam_scorer;
pub mod error;
pub mod generate;
pub mod params;
pub mod processors;
pub mod scores;
pub mod search;
pub mod sequences;
pub mod termination;
pub mod topk;

pub use backend::{
    Backend, DecodeBackend, EosOps, MemoryOps, ScoreOps, SelectOps, SequenceOps, TopKShape,
};
pub use beam_scorer::{BeamHypotheses, BeamScorer, BeamState, DoneReason, Hypothesis};
pub use error::{Error, Result};
pub use generate::{GenerationOutput, Generator, Model};
pub use params::SearchParams;
pub use scores::ScoreBuffer;
pub use search::{BeamSearch, GreedySearch, Search, SearchState};
pub use sequences::{SequenceStore, SequenceView};
pub use termination::TerminationTracker;
pub use topk::{vocab_parts, Candidates, TopKSelector, MAX_BEAMS, MAX_VOCAB_PARTS};
