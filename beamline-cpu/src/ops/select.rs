//! SelectOps implementation for CpuBackend.
//!
//! The beam top-k mirrors the device pipeline stage by stage so the scratch
//! layout is the same on both backends:
//!
//! - stage 1: each `(row, part)` keeps its local top-k at
//!   `scratch[(row * parts + part) * k..]`
//! - stage 2a: each row merges its parts into `scratch[stage1_len + row * k..]`
//! - stage 2b: each batch element merges its `num_beams` rows into the output
//!
//! Candidates are ordered by score, descending, then by the flattened index
//! `beam * vocab_size + token`, ascending. Partition-local selection under
//! that total order merges to exactly the global top-k.

use std::cmp::Ordering;

use beamline::backend::{SelectOps, TopKShape};
use beamline::Result;
use rayon::prelude::*;

use crate::{CpuBackend, CpuStream};

/// Flattened index used for unfilled scratch entries; sorts after every real
/// candidate of equal score.
const EMPTY_INDEX: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Entry {
    score: f32,
    index: usize,
}

fn rank(a: &Entry, b: &Entry) -> Ordering {
    b.score.total_cmp(&a.score).then(a.index.cmp(&b.index))
}

/// Best `k` entries, sorted best first.
fn top_k(mut entries: Vec<Entry>, k: usize) -> Vec<Entry> {
    if entries.len() > k {
        entries.select_nth_unstable_by(k - 1, rank);
        entries.truncate(k);
    }
    entries.sort_unstable_by(rank);
    entries
}

fn write_entries(
    entries: &[Entry],
    scores: &mut [f32],
    tokens: &mut [i32],
    token_of: impl Fn(usize) -> i32,
) {
    for (i, (s, t)) in scores.iter_mut().zip(tokens.iter_mut()).enumerate() {
        match entries.get(i) {
            Some(e) => {
                *s = e.score;
                *t = token_of(e.index);
            }
            None => {
                *s = f32::NEG_INFINITY;
                *t = -1;
            }
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn read_entries(scores: &[f32], tokens: &[i32], index_of: impl Fn(usize) -> usize) -> Vec<Entry> {
    scores
        .iter()
        .zip(tokens)
        .map(|(&score, &token)| Entry {
            score,
            index: if token < 0 {
                EMPTY_INDEX
            } else {
                index_of(token as usize)
            },
        })
        .collect()
}

impl SelectOps for CpuBackend {
    fn argmax_rows(
        _stream: &CpuStream,
        scores: &Vec<f32>,
        rows: usize,
        vocab_size: usize,
        out: &mut Vec<i32>,
    ) -> Result<()> {
        out[..rows]
            .par_iter_mut()
            .zip(scores[..rows * vocab_size].par_chunks(vocab_size))
            .for_each(|(token, row)| {
                let mut max_idx = 0usize;
                let mut max_val = f32::NEG_INFINITY;
                for (i, &v) in row.iter().enumerate() {
                    if v > max_val {
                        max_val = v;
                        max_idx = i;
                    }
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                {
                    *token = max_idx as i32;
                }
            });
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn beam_topk(
        _stream: &CpuStream,
        scores: &Vec<f32>,
        shape: TopKShape,
        scratch_scores: &mut Vec<f32>,
        scratch_tokens: &mut Vec<i32>,
        out_scores: &mut Vec<f32>,
        out_tokens: &mut Vec<i32>,
        out_beams: &mut Vec<i32>,
    ) -> Result<()> {
        let TopKShape {
            batch_size,
            num_beams,
            vocab_size,
            k,
            parts,
        } = shape;
        let rows = shape.rows();
        let part_size = shape.part_size();
        let stage1_len = rows * parts * k;
        assert!(
            scratch_scores.len() >= stage1_len + rows * k
                && scratch_tokens.len() >= stage1_len + rows * k,
            "beam_topk: scratch too small"
        );
        assert!(
            out_scores.len() >= batch_size * k
                && out_tokens.len() >= batch_size * k
                && out_beams.len() >= batch_size * k,
            "beam_topk: output too small"
        );

        tracing::trace!(rows, parts, k, "beam top-k");

        let (stage1_scores, merged_scores) = scratch_scores.split_at_mut(stage1_len);
        let (stage1_tokens, merged_tokens) = scratch_tokens.split_at_mut(stage1_len);

        // Stage 1: local top-k of every (row, part).
        stage1_scores
            .par_chunks_mut(k)
            .zip(stage1_tokens.par_chunks_mut(k))
            .enumerate()
            .for_each(|(chunk, (s, t))| {
                let row = chunk / parts;
                let part = chunk % parts;
                let start = (part * part_size).min(vocab_size);
                let end = ((part + 1) * part_size).min(vocab_size);
                let row_scores = &scores[row * vocab_size..(row + 1) * vocab_size];
                let entries = (start..end)
                    .map(|token| Entry {
                        score: row_scores[token],
                        index: token,
                    })
                    .collect();
                write_entries(&top_k(entries, k), s, t, |token| token as i32);
            });

        // Stage 2a: merge the parts of every row.
        merged_scores[..rows * k]
            .par_chunks_mut(k)
            .zip(merged_tokens[..rows * k].par_chunks_mut(k))
            .enumerate()
            .for_each(|(row, (s, t))| {
                let base = row * parts * k;
                let span = base..base + parts * k;
                let entries =
                    read_entries(&stage1_scores[span.clone()], &stage1_tokens[span], |token| {
                        token
                    });
                write_entries(&top_k(entries, k), s, t, |token| token as i32);
            });

        // Stage 2b: merge the beams of every batch element.
        for batch in 0..batch_size {
            let mut entries = Vec::with_capacity(num_beams * k);
            for beam in 0..num_beams {
                let row = batch * num_beams + beam;
                let span = row * k..(row + 1) * k;
                entries.extend(read_entries(
                    &merged_scores[span.clone()],
                    &merged_tokens[span],
                    |token| beam * vocab_size + token,
                ));
            }
            let best = top_k(entries, k);
            for i in 0..k {
                let o = batch * k + i;
                match best.get(i).filter(|e| e.index != EMPTY_INDEX) {
                    Some(e) => {
                        out_scores[o] = e.score;
                        out_tokens[o] = (e.index % vocab_size) as i32;
                        out_beams[o] = (e.index / vocab_size) as i32;
                    }
                    None => {
                        out_scores[o] = f32::NEG_INFINITY;
                        out_tokens[o] = -1;
                        out_beams[o] = 0;
                    }
                }
            }
        }
        Ok(())
    }
}
