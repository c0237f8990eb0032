//! CUDA implementations of all backend op traits.

pub mod eos;
pub mod memory;
pub mod score;
pub mod select;
pub mod sequence;
