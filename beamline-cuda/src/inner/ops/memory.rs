//! MemoryOps implementation for CudaBackend.
//!
//! Uploads and writes are asynchronous host-to-device copies enqueued on the
//! search stream; the staging `Vec` is owned by the destination slice until
//! the copy completes. Downloads and the done-flag read synchronize that
//! stream first.

use cudarc::driver::{CudaSlice, LaunchAsync};

use beamline::backend::MemoryOps;
use beamline::Result;

use crate::inner::kernels;
use crate::inner::{CudaBackend, DeviceStream};

impl MemoryOps for CudaBackend {
    fn alloc_scores(stream: &DeviceStream, len: usize) -> Result<CudaSlice<f32>> {
        Ok(stream.device().alloc_zeros::<f32>(len)?)
    }

    fn alloc_tokens(stream: &DeviceStream, len: usize) -> Result<CudaSlice<i32>> {
        Ok(stream.device().alloc_zeros::<i32>(len)?)
    }

    fn alloc_mask(stream: &DeviceStream, len: usize) -> Result<CudaSlice<u8>> {
        Ok(stream.device().alloc_zeros::<u8>(len)?)
    }

    fn alloc_done_flag(stream: &DeviceStream) -> Result<CudaSlice<u8>> {
        Ok(stream.device().alloc_zeros::<u8>(1)?)
    }

    fn upload_scores(stream: &DeviceStream, data: &[f32]) -> Result<CudaSlice<f32>> {
        Ok(stream.device().htod_copy(data.to_vec())?)
    }

    fn upload_tokens(stream: &DeviceStream, data: &[i32]) -> Result<CudaSlice<i32>> {
        Ok(stream.device().htod_copy(data.to_vec())?)
    }

    fn write_scores(stream: &DeviceStream, dst: &mut CudaSlice<f32>, data: &[f32]) -> Result<()> {
        assert_eq!(dst.len(), data.len(), "write_scores: length mismatch");
        stream.device().htod_copy_into(data.to_vec(), dst)?;
        Ok(())
    }

    fn write_tokens(stream: &DeviceStream, dst: &mut CudaSlice<i32>, data: &[i32]) -> Result<()> {
        assert_eq!(dst.len(), data.len(), "write_tokens: length mismatch");
        stream.device().htod_copy_into(data.to_vec(), dst)?;
        Ok(())
    }

    fn download_scores(stream: &DeviceStream, src: &CudaSlice<f32>) -> Result<Vec<f32>> {
        stream.device().synchronize()?;
        Ok(stream.device().dtoh_sync_copy(src)?)
    }

    fn download_tokens(stream: &DeviceStream, src: &CudaSlice<i32>) -> Result<Vec<i32>> {
        stream.device().synchronize()?;
        Ok(stream.device().dtoh_sync_copy(src)?)
    }

    fn download_token_range(
        stream: &DeviceStream,
        src: &CudaSlice<i32>,
        offset: usize,
        len: usize,
    ) -> Result<Vec<i32>> {
        stream.device().synchronize()?;
        let view = src.slice(offset..offset + len);
        Ok(stream.device().dtoh_sync_copy(&view)?)
    }

    fn scores_len(buf: &CudaSlice<f32>) -> usize {
        buf.len()
    }

    fn tokens_len(buf: &CudaSlice<i32>) -> usize {
        buf.len()
    }

    fn synchronize(stream: &DeviceStream) -> Result<()> {
        stream.device().synchronize()?;
        Ok(())
    }

    fn set_done_flag(stream: &DeviceStream, flag: &CudaSlice<u8>, value: bool) -> Result<()> {
        let func = kernels::get(stream.device(), &kernels::SEQUENCES, "set_flag")?;
        unsafe {
            func.launch(kernels::single_block(), (flag, u8::from(value)))?;
        }
        Ok(())
    }

    fn read_done_flag(stream: &DeviceStream, flag: &CudaSlice<u8>) -> Result<bool> {
        stream.device().synchronize()?;
        let host = stream.device().dtoh_sync_copy(flag)?;
        Ok(host.first().is_some_and(|&v| v != 0))
    }
}
