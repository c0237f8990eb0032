//! Device handle and its ordered stream

use std::sync::Arc;

use cudarc::driver::CudaDevice;

use beamline::Result;

/// A CUDA device bound to one non-default stream.
///
/// Every launch, allocation and copy made through [`crate::CudaBackend`] is
/// issued on this stream, so ops execute in call order. Clones share the
/// same device and stream.
#[derive(Clone)]
pub struct DeviceStream {
    device: Arc<CudaDevice>,
}

impl DeviceStream {
    /// Open device `ordinal` with a dedicated stream.
    ///
    /// # Errors
    /// Returns an error if CUDA device initialization fails.
    pub fn new(ordinal: usize) -> Result<Self> {
        let device = CudaDevice::new_with_stream(ordinal)?;
        tracing::info!(ordinal, "opened CUDA device");
        Ok(Self { device })
    }

    /// The underlying cudarc device.
    #[must_use]
    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.device
    }
}
