//! CPU backend for beamline.
//!
//! Every op runs eagerly on the calling thread (row loops fan out with
//! Rayon), so a [`CpuStream`] is always idle by the time an op returns and
//! `synchronize` has nothing to wait for.
//!
//! This backend is the reference the CUDA kernels are checked against and
//! the one the integration tests drive. It is not optimised for throughput.

#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod ops;

use std::sync::atomic::AtomicBool;

use beamline::backend::Backend;

/// Marker type for the CPU backend.
///
/// All op trait impls are on this type. Searches parameterised by
/// `B: DecodeBackend` can use `CpuBackend` to run on the host.
pub struct CpuBackend;

/// Execution stream of the CPU backend. Work completes before the op call
/// returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStream;

impl Backend for CpuBackend {
    type Stream = CpuStream;
    type Scores = Vec<f32>;
    type Tokens = Vec<i32>;
    type Mask = Vec<bool>;
    type DoneFlag = AtomicBool;
}
