//! SequenceOps implementation for CudaBackend.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use cudarc::driver::{CudaSlice, LaunchAsync};

use beamline::backend::SequenceOps;
use beamline::Result;

use crate::inner::kernels::{self, SEQUENCES};
use crate::inner::{CudaBackend, DeviceStream};

impl SequenceOps for CudaBackend {
    fn append_column(
        stream: &DeviceStream,
        sequences: &mut CudaSlice<i32>,
        tokens: &CudaSlice<i32>,
        rows: usize,
        max_length: usize,
        sequence_length: usize,
    ) -> Result<()> {
        assert!(sequence_length < max_length, "append_column: row is full");
        let func = kernels::get(stream.device(), &SEQUENCES, "append_column")?;
        unsafe {
            func.launch(
                kernels::per_element(rows),
                (
                    sequences,
                    tokens,
                    rows as i32,
                    max_length as i32,
                    sequence_length as i32,
                ),
            )?;
        }
        Ok(())
    }

    fn gather_append(
        stream: &DeviceStream,
        src: &CudaSlice<i32>,
        dst: &mut CudaSlice<i32>,
        sources: &CudaSlice<i32>,
        tokens: &CudaSlice<i32>,
        rows: usize,
        max_length: usize,
        sequence_length: usize,
    ) -> Result<()> {
        assert!(sequence_length < max_length, "gather_append: row is full");
        let func = kernels::get(stream.device(), &SEQUENCES, "gather_append")?;
        unsafe {
            func.launch(
                kernels::per_row((rows, 1)),
                (
                    src,
                    dst,
                    sources,
                    tokens,
                    max_length as i32,
                    sequence_length as i32,
                ),
            )?;
        }
        Ok(())
    }
}
