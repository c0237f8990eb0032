//! ScoreOps implementation for CpuBackend.

use beamline::backend::ScoreOps;
use beamline::Result;
use rayon::prelude::*;

use crate::{CpuBackend, CpuStream};

/// Numerically stable log-softmax of one row, in place.
fn log_softmax_row(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = row.iter().map(|&x| (x - max).exp()).sum();
    let log_sum = max + sum.ln();
    for x in row.iter_mut() {
        *x -= log_sum;
    }
}

impl ScoreOps for CpuBackend {
    fn log_softmax_rows(
        _stream: &CpuStream,
        logits: &Vec<f32>,
        scores: &mut Vec<f32>,
        rows: usize,
        vocab_size: usize,
    ) -> Result<()> {
        let n = rows * vocab_size;
        assert!(logits.len() >= n && scores.len() >= n, "log_softmax_rows: buffer too small");
        scores[..n].copy_from_slice(&logits[..n]);
        scores[..n]
            .par_chunks_mut(vocab_size)
            .for_each(log_softmax_row);
        Ok(())
    }

    fn write_score(
        _stream: &CpuStream,
        scores: &mut Vec<f32>,
        index: usize,
        value: f32,
    ) -> Result<()> {
        scores[index] = value;
        Ok(())
    }

    fn fill_token_column(
        _stream: &CpuStream,
        scores: &mut Vec<f32>,
        rows: usize,
        vocab_size: usize,
        token: usize,
        value: f32,
    ) -> Result<()> {
        assert!(token < vocab_size, "fill_token_column: token {token} outside vocabulary");
        for row in scores[..rows * vocab_size].chunks_exact_mut(vocab_size) {
            row[token] = value;
        }
        Ok(())
    }

    fn repetition_penalty(
        _stream: &CpuStream,
        sequences: &Vec<i32>,
        scores: &mut Vec<f32>,
        rows: usize,
        vocab_size: usize,
        max_length: usize,
        sequence_length: usize,
        penalty: f32,
    ) -> Result<()> {
        scores[..rows * vocab_size]
            .par_chunks_mut(vocab_size)
            .enumerate()
            .for_each(|(row, row_scores)| {
                let tokens = &sequences[row * max_length..row * max_length + sequence_length];
                let mut seen = vec![false; vocab_size];
                #[allow(clippy::cast_sign_loss)]
                for &tok in tokens {
                    if tok < 0 || tok as usize >= vocab_size || seen[tok as usize] {
                        continue;
                    }
                    let idx = tok as usize;
                    seen[idx] = true;
                    if row_scores[idx] < 0.0 {
                        row_scores[idx] *= penalty;
                    } else {
                        row_scores[idx] /= penalty;
                    }
                }
            });
        Ok(())
    }

    fn add_beam_scores(
        _stream: &CpuStream,
        scores: &mut Vec<f32>,
        beam_scores: &Vec<f32>,
        rows: usize,
        vocab_size: usize,
    ) -> Result<()> {
        scores[..rows * vocab_size]
            .par_chunks_mut(vocab_size)
            .zip(beam_scores[..rows].par_iter())
            .for_each(|(row, &beam_score)| {
                for x in row {
                    *x += beam_score;
                }
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_softmax_rows_normalizes() {
        let logits = vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0];
        let mut scores = vec![0.0; 6];
        CpuBackend::log_softmax_rows(&CpuStream, &logits, &mut scores, 2, 3).unwrap();

        for row in scores.chunks(3) {
            let total: f32 = row.iter().map(|x| x.exp()).sum();
            assert!((total - 1.0).abs() < 1e-5, "row sums to {total}");
        }
        assert!(scores[2] > scores[1] && scores[1] > scores[0]);
        assert!((scores[3] - (1.0f32 / 3.0).ln()).abs() < 1e-6);
    }

    #[test]
    fn test_log_softmax_large_logits_are_finite() {
        let logits = vec![1000.0, 999.0, -1000.0];
        let mut scores = vec![0.0; 3];
        CpuBackend::log_softmax_rows(&CpuStream, &logits, &mut scores, 1, 3).unwrap();
        assert!(scores.iter().all(|x| x.is_finite() || *x == f32::NEG_INFINITY));
        assert!(scores[0] > -1.0 && scores[0] < 0.0);
    }

    #[test]
    fn test_fill_token_column() {
        let mut scores = vec![0.5; 8];
        CpuBackend::fill_token_column(&CpuStream, &mut scores, 2, 4, 1, f32::MIN).unwrap();
        assert_eq!(scores, vec![0.5, f32::MIN, 0.5, 0.5, 0.5, f32::MIN, 0.5, 0.5]);
    }

    #[test]
    fn test_repetition_penalty_applies_once_per_token() {
        // one row, max_length 4, sequence [1, 1, 2]
        let sequences = vec![1, 1, 2, 0];
        let mut scores = vec![-1.0, -2.0, 4.0, -3.0];
        CpuBackend::repetition_penalty(&CpuStream, &sequences, &mut scores, 1, 4, 4, 3, 2.0)
            .unwrap();
        assert_eq!(scores, vec![-1.0, -4.0, 2.0, -3.0]);
    }

    #[test]
    fn test_add_beam_scores() {
        let mut scores = vec![1.0, 2.0, 3.0, 4.0];
        let beam_scores = vec![10.0, -1.0];
        CpuBackend::add_beam_scores(&CpuStream, &mut scores, &beam_scores, 2, 2).unwrap();
        assert_eq!(scores, vec![11.0, 12.0, 2.0, 3.0]);
    }
}
