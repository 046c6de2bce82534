// gpu/mod.rs — wgpu compute layer.
//
// Mirrors the CPU kernels in the parent crate. The CPU implementations
// remain the authoritative reference; every GPU kernel is tested against
// them.
//
//   device   adapter selection, hardware profiles, dispatch sizing
//   buffer   device-resident tensor storage, upload and readback
//   scatter  claim/resolve pipelines for texture loading
//   sample   atlas sampling pipeline
//   loader   `GpuTextureLoader`, the wgpu `TextureKernel`
//
// Device tensors are plain storage buffers rather than wgpu textures: the
// image may be rank 5 with any channel count, which no texture format
// covers.

pub mod device;
pub mod buffer;
pub mod scatter;
pub mod sample;
pub mod loader;

pub use buffer::GpuBuffer;
pub use device::{DeviceProfile, GpuDevice, GpuError, WorkgroupSize};
pub use loader::GpuTextureLoader;
