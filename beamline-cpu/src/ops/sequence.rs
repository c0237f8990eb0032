//! SequenceOps implementation for CpuBackend.

use beamline::backend::SequenceOps;
use beamline::Result;
use rayon::prelude::*;

use crate::{CpuBackend, CpuStream};

impl SequenceOps for CpuBackend {
    fn append_column(
        _stream: &CpuStream,
        sequences: &mut Vec<i32>,
        tokens: &Vec<i32>,
        rows: usize,
        max_length: usize,
        sequence_length: usize,
    ) -> Result<()> {
        assert!(sequence_length < max_length, "append_column: row is full");
        for (row, &token) in sequences[..rows * max_length]
            .chunks_exact_mut(max_length)
            .zip(tokens)
        {
            row[sequence_length] = token;
        }
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn gather_append(
        _stream: &CpuStream,
        src: &Vec<i32>,
        dst: &mut Vec<i32>,
        sources: &Vec<i32>,
        tokens: &Vec<i32>,
        rows: usize,
        max_length: usize,
        sequence_length: usize,
    ) -> Result<()> {
        assert!(sequence_length < max_length, "gather_append: row is full");
        dst[..rows * max_length]
            .par_chunks_exact_mut(max_length)
            .enumerate()
            .for_each(|(row, out)| {
                let source = sources[row] as usize;
                let from = &src[source * max_length..source * max_length + sequence_length];
                out[..sequence_length].copy_from_slice(from);
                out[sequence_length] = tokens[row];
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_column() {
        let mut sequences = vec![1, 2, 0, 3, 4, 0];
        CpuBackend::append_column(&CpuStream, &mut sequences, &vec![7, 8], 2, 3, 2).unwrap();
        assert_eq!(sequences, vec![1, 2, 7, 3, 4, 8]);
    }

    #[test]
    fn test_gather_append_reorders_rows() {
        let src = vec![1, 2, 0, 3, 4, 0];
        let mut dst = vec![0; 6];
        CpuBackend::gather_append(&CpuStream, &src, &mut dst, &vec![1, 1], &vec![5, 6], 2, 3, 2)
            .unwrap();
        assert_eq!(dst, vec![3, 4, 5, 3, 4, 6]);
    }
}
