//! PTX modules and kernel lookup

#![allow(clippy::cast_possible_truncation)]

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaFunction, LaunchConfig};
use cudarc::nvrtc::Ptx;

use beamline::{Error, Result};

/// Threads per block for row-wise kernels. The reductions in the `.cu`
/// sources assume a power of two no larger than their shared arrays.
pub const BLOCK: u32 = 256;

/// One compiled `.cu` file.
pub struct Module {
    pub name: &'static str,
    pub ptx: &'static str,
    pub functions: &'static [&'static str],
}

pub const SCORES: Module = Module {
    name: "beamline_scores",
    ptx: include_str!(concat!(env!("OUT_DIR"), "/kernels/scores.ptx")),
    functions: &[
        "log_softmax_rows",
        "set_score",
        "fill_token_column",
        "repetition_penalty",
        "add_beam_scores",
    ],
};

pub const TOPK: Module = Module {
    name: "beamline_topk",
    ptx: include_str!(concat!(env!("OUT_DIR"), "/kernels/topk.ptx")),
    functions: &[
        "argmax_rows",
        "beam_topk_stage1",
        "beam_topk_stage2_rows",
        "beam_topk_stage2_batch",
    ],
};

pub const SEQUENCES: Module = Module {
    name: "beamline_sequences",
    ptx: include_str!(concat!(env!("OUT_DIR"), "/kernels/sequences.ptx")),
    functions: &["append_column", "gather_append", "check_for_eos", "set_flag"],
};

/// Load `module` on first use and return `function` from it.
pub fn get(device: &Arc<CudaDevice>, module: &Module, function: &str) -> Result<CudaFunction> {
    if !device.has_func(module.name, function) {
        tracing::debug!(module = module.name, "loading PTX module");
        device.load_ptx(Ptx::from_src(module.ptx), module.name, module.functions)?;
    }
    device
        .get_func(module.name, function)
        .ok_or_else(|| Error::Device(format!("kernel {}::{function} not found", module.name)))
}

/// One block of [`BLOCK`] threads per row (or per `grid` entry).
#[must_use]
pub fn per_row(grid: (usize, usize)) -> LaunchConfig {
    LaunchConfig {
        grid_dim: (grid.0 as u32, grid.1 as u32, 1),
        block_dim: (BLOCK, 1, 1),
        shared_mem_bytes: 0,
    }
}

/// A single block of [`BLOCK`] threads.
#[must_use]
pub fn single_block() -> LaunchConfig {
    per_row((1, 1))
}

/// One thread per element.
#[must_use]
pub fn per_element(n: usize) -> LaunchConfig {
    LaunchConfig::for_num_elems(n.max(1) as u32)
}
