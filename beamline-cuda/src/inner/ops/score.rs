//! ScoreOps implementation for CudaBackend.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use cudarc::driver::{CudaSlice, LaunchAsync};

use beamline::backend::ScoreOps;
use beamline::Result;

use crate::inner::kernels::{self, SCORES};
use crate::inner::{CudaBackend, DeviceStream};

impl ScoreOps for CudaBackend {
    fn log_softmax_rows(
        stream: &DeviceStream,
        logits: &CudaSlice<f32>,
        scores: &mut CudaSlice<f32>,
        rows: usize,
        vocab_size: usize,
    ) -> Result<()> {
        let func = kernels::get(stream.device(), &SCORES, "log_softmax_rows")?;
        unsafe {
            func.launch(
                kernels::per_row((rows, 1)),
                (logits, scores, vocab_size as i32),
            )?;
        }
        Ok(())
    }

    fn write_score(
        stream: &DeviceStream,
        scores: &mut CudaSlice<f32>,
        index: usize,
        value: f32,
    ) -> Result<()> {
        assert!(index < scores.len(), "write_score: index {index} out of range");
        let func = kernels::get(stream.device(), &SCORES, "set_score")?;
        unsafe {
            func.launch(kernels::single_block(), (scores, index as i32, value))?;
        }
        Ok(())
    }

    fn fill_token_column(
        stream: &DeviceStream,
        scores: &mut CudaSlice<f32>,
        rows: usize,
        vocab_size: usize,
        token: usize,
        value: f32,
    ) -> Result<()> {
        assert!(token < vocab_size, "fill_token_column: token {token} outside vocabulary");
        let func = kernels::get(stream.device(), &SCORES, "fill_token_column")?;
        unsafe {
            func.launch(
                kernels::per_element(rows),
                (
                    scores,
                    rows as i32,
                    vocab_size as i32,
                    token as i32,
                    value,
                ),
            )?;
        }
        Ok(())
    }

    fn repetition_penalty(
        stream: &DeviceStream,
        sequences: &CudaSlice<i32>,
        scores: &mut CudaSlice<f32>,
        rows: usize,
        vocab_size: usize,
        max_length: usize,
        sequence_length: usize,
        penalty: f32,
    ) -> Result<()> {
        let func = kernels::get(stream.device(), &SCORES, "repetition_penalty")?;
        unsafe {
            func.launch(
                kernels::per_row((rows, 1)),
                (
                    sequences,
                    scores,
                    vocab_size as i32,
                    max_length as i32,
                    sequence_length as i32,
                    penalty,
                ),
            )?;
        }
        Ok(())
    }

    fn add_beam_scores(
        stream: &DeviceStream,
        scores: &mut CudaSlice<f32>,
        beam_scores: &CudaSlice<f32>,
        rows: usize,
        vocab_size: usize,
    ) -> Result<()> {
        let func = kernels::get(stream.device(), &SCORES, "add_beam_scores")?;
        unsafe {
            func.launch(
                kernels::per_element(rows * vocab_size),
                (scores, beam_scores, rows as i32, vocab_size as i32),
            )?;
        }
        Ok(())
    }
}
