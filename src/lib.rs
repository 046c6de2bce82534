// texload: per-face texture loading for mesh rasterisers.
//
// Scatters per-face texture samples into an image buffer, gated by update
// flags, and samples per-face texel cubes from a texture atlas. A rayon CPU
// implementation is the reference; the wgpu compute implementation under
// `gpu` mirrors it and is validated against it.
//
//   tensor / layout   typed, strided, device-tagged buffers
//   validate          residency + contiguity checks run before every call
//   encoding          shape conventions tying the four inputs together
//   scatter, sample   CPU kernels
//   loader            entry points and the `TextureKernel` seam
//   gpu               wgpu device, buffers and compute kernels

pub mod error;
pub mod layout;
pub mod tensor;
pub mod validate;
pub mod encoding;
pub mod scatter;
pub mod sample;
pub mod loader;
pub mod gpu;

pub use encoding::{SamplePlan, ScatterPlan, UpdateGranularity};
pub use error::{ArgumentProblem, Result, TexLoadError};
pub use loader::{load_textures, load_textures_in_place, sample_textures, LoaderConfig, TextureKernel, TextureLoader};
pub use sample::SampleMode;
pub use tensor::{DType, Device, Element, Storage, Tensor};
