//! SelectOps implementation for CudaBackend.
//!
//! The beam top-k runs as three launches on the search stream:
//!
//! 1. `beam_topk_stage1`, grid `(parts, rows)`: local top-k per vocabulary
//!    partition into `scratch[(row * parts + part) * k..]`
//! 2. `beam_topk_stage2_rows`, one block per row: merge the partitions into
//!    `scratch[rows * parts * k + row * k..]`
//! 3. `beam_topk_stage2_batch`, one block per batch element: merge its
//!    beams into the output
//!
//! Nothing is synchronized here; the caller synchronizes before reading the
//! output on the host.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use cudarc::driver::{CudaSlice, LaunchAsync};

use beamline::backend::{SelectOps, TopKShape};
use beamline::Result;

use crate::inner::kernels::{self, TOPK};
use crate::inner::{CudaBackend, DeviceStream};

/// Largest `k` the kernels' shared selection buffers hold (`MAX_K` in
/// `topk.cu`).
const MAX_K: usize = 64;

impl SelectOps for CudaBackend {
    fn argmax_rows(
        stream: &DeviceStream,
        scores: &CudaSlice<f32>,
        rows: usize,
        vocab_size: usize,
        out: &mut CudaSlice<i32>,
    ) -> Result<()> {
        let func = kernels::get(stream.device(), &TOPK, "argmax_rows")?;
        unsafe {
            func.launch(
                kernels::per_row((rows, 1)),
                (scores, out, vocab_size as i32),
            )?;
        }
        Ok(())
    }

    fn beam_topk(
        stream: &DeviceStream,
        scores: &CudaSlice<f32>,
        shape: TopKShape,
        scratch_scores: &mut CudaSlice<f32>,
        scratch_tokens: &mut CudaSlice<i32>,
        out_scores: &mut CudaSlice<f32>,
        out_tokens: &mut CudaSlice<i32>,
        out_beams: &mut CudaSlice<i32>,
    ) -> Result<()> {
        let TopKShape {
            batch_size,
            num_beams,
            vocab_size,
            k,
            parts,
        } = shape;
        assert!(k <= MAX_K, "beam_topk: k = {k} exceeds {MAX_K}");
        let rows = shape.rows();
        let stage1_len = rows * parts * k;
        assert!(
            scratch_scores.len() >= stage1_len + rows * k
                && scratch_tokens.len() >= stage1_len + rows * k,
            "beam_topk: scratch too small"
        );

        tracing::trace!(rows, parts, k, "launching beam top-k");
        let device = stream.device();

        let stage1 = kernels::get(device, &TOPK, "beam_topk_stage1")?;
        unsafe {
            stage1.launch(
                kernels::per_row((parts, rows)),
                (
                    scores,
                    &mut *scratch_scores,
                    &mut *scratch_tokens,
                    vocab_size as i32,
                    parts as i32,
                    shape.part_size() as i32,
                    k as i32,
                ),
            )?;
        }

        let rows_merge = kernels::get(device, &TOPK, "beam_topk_stage2_rows")?;
        unsafe {
            rows_merge.launch(
                kernels::per_row((rows, 1)),
                (
                    &mut *scratch_scores,
                    &mut *scratch_tokens,
                    stage1_len as i32,
                    parts as i32,
                    k as i32,
                ),
            )?;
        }

        let batch_merge = kernels::get(device, &TOPK, "beam_topk_stage2_batch")?;
        unsafe {
            batch_merge.launch(
                kernels::per_row((batch_size, 1)),
                (
                    &*scratch_scores,
                    &*scratch_tokens,
                    stage1_len as i32,
                    out_scores,
                    out_tokens,
                    out_beams,
                    num_beams as i32,
                    vocab_size as i32,
                    k as i32,
                ),
            )?;
        }
        Ok(())
    }
}
