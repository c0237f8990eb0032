#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

mod backend_impl;
mod kernels;
pub mod ops;
pub mod stream;

pub use backend_impl::CudaBackend;
pub use stream::DeviceStream;

// Re-export cudarc types that appear in the backend's buffer types
pub use cudarc::driver::{CudaDevice, CudaSlice};
