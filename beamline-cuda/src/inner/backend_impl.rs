//! Backend trait implementation for CUDA.

use cudarc::driver::CudaSlice;

use beamline::backend::Backend;

use super::stream::DeviceStream;

/// Marker type for the CUDA backend.
///
/// All op trait impls are on this type. Searches parameterised by
/// `B: DecodeBackend` can use `CudaBackend` to run on the GPU.
pub struct CudaBackend;

impl Backend for CudaBackend {
    type Stream = DeviceStream;
    type Scores = CudaSlice<f32>;
    type Tokens = CudaSlice<i32>;
    type Mask = CudaSlice<u8>;
    type DoneFlag = CudaSlice<u8>;
}
