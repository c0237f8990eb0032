//! MemoryOps implementation for CpuBackend.

use std::sync::atomic::{AtomicBool, Ordering};

use beamline::backend::MemoryOps;
use beamline::Result;

use crate::{CpuBackend, CpuStream};

impl MemoryOps for CpuBackend {
    fn alloc_scores(_stream: &CpuStream, len: usize) -> Result<Vec<f32>> {
        Ok(vec![0.0; len])
    }

    fn alloc_tokens(_stream: &CpuStream, len: usize) -> Result<Vec<i32>> {
        Ok(vec![0; len])
    }

    fn alloc_mask(_stream: &CpuStream, len: usize) -> Result<Vec<bool>> {
        Ok(vec![false; len])
    }

    fn alloc_done_flag(_stream: &CpuStream) -> Result<AtomicBool> {
        Ok(AtomicBool::new(false))
    }

    fn upload_scores(_stream: &CpuStream, data: &[f32]) -> Result<Vec<f32>> {
        Ok(data.to_vec())
    }

    fn upload_tokens(_stream: &CpuStream, data: &[i32]) -> Result<Vec<i32>> {
        Ok(data.to_vec())
    }

    fn write_scores(_stream: &CpuStream, dst: &mut Vec<f32>, data: &[f32]) -> Result<()> {
        assert_eq!(dst.len(), data.len(), "write_scores: length mismatch");
        dst.copy_from_slice(data);
        Ok(())
    }

    fn write_tokens(_stream: &CpuStream, dst: &mut Vec<i32>, data: &[i32]) -> Result<()> {
        assert_eq!(dst.len(), data.len(), "write_tokens: length mismatch");
        dst.copy_from_slice(data);
        Ok(())
    }

    fn download_scores(_stream: &CpuStream, src: &Vec<f32>) -> Result<Vec<f32>> {
        Ok(src.clone())
    }

    fn download_tokens(_stream: &CpuStream, src: &Vec<i32>) -> Result<Vec<i32>> {
        Ok(src.clone())
    }

    fn download_token_range(
        _stream: &CpuStream,
        src: &Vec<i32>,
        offset: usize,
        len: usize,
    ) -> Result<Vec<i32>> {
        Ok(src[offset..offset + len].to_vec())
    }

    fn scores_len(buf: &Vec<f32>) -> usize {
        buf.len()
    }

    fn tokens_len(buf: &Vec<i32>) -> usize {
        buf.len()
    }

    fn synchronize(_stream: &CpuStream) -> Result<()> {
        Ok(())
    }

    fn set_done_flag(_stream: &CpuStream, flag: &AtomicBool, value: bool) -> Result<()> {
        flag.store(value, Ordering::Release);
        Ok(())
    }

    fn read_done_flag(_stream: &CpuStream, flag: &AtomicBool) -> Result<bool> {
        Ok(flag.load(Ordering::Acquire))
    }
}
