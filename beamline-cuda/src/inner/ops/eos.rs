//! EosOps implementation for CudaBackend.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use cudarc::driver::{CudaSlice, LaunchAsync};

use beamline::backend::EosOps;
use beamline::Result;

use crate::inner::kernels::{self, SEQUENCES};
use crate::inner::{CudaBackend, DeviceStream};

impl EosOps for CudaBackend {
    fn check_for_eos(
        stream: &DeviceStream,
        next_tokens: &mut CudaSlice<i32>,
        eos_meet: &mut CudaSlice<u8>,
        eos_token_id: i32,
        pad_token_id: i32,
        done: &CudaSlice<u8>,
    ) -> Result<()> {
        let slots = eos_meet.len();
        assert!(next_tokens.len() >= slots, "check_for_eos: too few tokens");
        let func = kernels::get(stream.device(), &SEQUENCES, "check_for_eos")?;
        unsafe {
            func.launch(
                kernels::single_block(),
                (
                    next_tokens,
                    eos_meet,
                    slots as i32,
                    eos_token_id,
                    pad_token_id,
                    done,
                ),
            )?;
        }
        Ok(())
    }
}
