//! Backend selection
//!
//! Enable the desired backend via feature flags. When several are enabled,
//! accelerators win over the CPU backend:
//!
//! - `cuda`: Native CUDA backend (NVIDIA GPUs only)
//! - `wgpu`: WebGPU backend (cross-platform GPU support)
//! - `tch`: PyTorch backend via libtorch (CUDA if available, else CPU)
//! - `ndarray`: CPU backend using ndarray (default)
//!
//! ```toml
//! [dependencies]
//! burn-multistage = { version = "0.1", features = ["wgpu"] }
//! ```

#[cfg(feature = "ndarray")]
pub use burn_ndarray::{NdArray, NdArrayDevice};

#[cfg(feature = "tch")]
pub use burn_tch::{LibTorch, LibTorchDevice};

#[cfg(feature = "wgpu")]
pub use burn_wgpu::{Wgpu, WgpuDevice};

#[cfg(feature = "cuda")]
pub use burn_cuda::{Cuda, CudaDevice};

#[cfg(feature = "cuda")]
pub type DefaultBackend = Cuda;

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub type DefaultBackend = Wgpu;

#[cfg(all(feature = "tch", not(any(feature = "cuda", feature = "wgpu"))))]
pub type DefaultBackend = LibTorch;

#[cfg(all(
    feature = "ndarray",
    not(any(feature = "cuda", feature = "wgpu", feature = "tch"))
))]
pub type DefaultBackend = NdArray;

/// Device stages run on when the model reports none
#[cfg(feature = "cuda")]
pub fn default_device() -> CudaDevice {
    CudaDevice::default()
}

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub fn default_device() -> WgpuDevice {
    WgpuDevice::default()
}

#[cfg(all(feature = "tch", not(any(feature = "cuda", feature = "wgpu"))))]
pub fn default_device() -> LibTorchDevice {
    if burn_tch::is_cuda_available() {
        LibTorchDevice::Cuda(0)
    } else {
        LibTorchDevice::Cpu
    }
}

#[cfg(all(
    feature = "ndarray",
    not(any(feature = "cuda", feature = "wgpu", feature = "tch"))
))]
pub fn default_device() -> NdArrayDevice {
    NdArrayDevice::default()
}
