// gpu/buffer.rs — Device-resident tensor storage, upload and readback.
//
// RESPONSIBILITIES
// ─────────────────
// 1. `GpuBuffer` — a storage buffer holding the elements of one tensor.
//    This is what `Storage::Gpu` wraps, and what the texture kernels bind.
//
// 2. `Tensor::to_gpu()` — copy a host tensor to the GPU, compacting any
//    strided/permuted layout into logical row-major order on the way.
//
// 3. `Tensor::to_host()` / `read_buffer()` — synchronous readback.
//
//
// THE COMPACTION RULE
// ────────────────────
// A host tensor may be a permuted or padded view:
//
//   host layout (shape 2×3, strides (4, 1)):
//     [a b c _ d e f _]
//
// Uploading it verbatim would hand the GPU gaps it cannot interpret.
// Upload always walks the view in logical order, so the device buffer is
// `[a b c d e f]` and the resulting tensor has a compact layout.
//
//
// SIZE PADDING
// ─────────────
// wgpu rejects zero-sized bindings and copies whose size is not a
// multiple of `wgpu::COPY_BUFFER_ALIGNMENT` (4 bytes). Every buffer is
// therefore allocated with its byte length rounded up to 4, minimum 4.
// The logical length is kept separately in `GpuBuffer::len`.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::error::{ArgumentProblem, Result, TexLoadError};
use crate::gpu::device::{GpuDevice, GpuError};
use crate::layout::Layout;
use crate::tensor::{Device, Element, Storage, Tensor};

/// A storage buffer owned by one or more device tensors.
///
/// The handle is reference-counted: cloning a device tensor (or taking a
/// permuted view of it) shares the same GPU memory.
#[derive(Clone, Debug)]
pub struct GpuBuffer {
    buffer: Arc<wgpu::Buffer>,
    /// Number of elements (not bytes) of logical data.
    len: usize,
}

impl GpuBuffer {
    pub(crate) fn new(buffer: wgpu::Buffer, len: usize) -> Self {
        GpuBuffer { buffer: Arc::new(buffer), len }
    }

    #[inline]
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size in bytes (padded).
    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.buffer.size()
    }
}

/// Usage flags for every tensor buffer: bindable, and copyable both ways.
pub(crate) const TENSOR_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Round a byte length up to `COPY_BUFFER_ALIGNMENT`, minimum one word.
#[inline]
pub(crate) fn padded_size(bytes: u64) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    bytes.max(align).div_ceil(align) * align
}

/// Upload a slice as a new storage buffer.
pub(crate) fn upload_slice<T: Element>(
    gpu: &GpuDevice,
    label: &str,
    data: &[T],
) -> Result<GpuBuffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let size = padded_size(bytes.len() as u64);
    gpu.check_storage_size(label, size)?;

    let buffer = gpu.with_oom_scope(label, || {
        if size as usize == bytes.len() {
            gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytes,
                usage: TENSOR_USAGE,
            })
        } else {
            let mut padded = vec![0u8; size as usize];
            padded[..bytes.len()].copy_from_slice(bytes);
            gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: &padded,
                usage: TENSOR_USAGE,
            })
        }
    })?;
    Ok(GpuBuffer::new(buffer, data.len()))
}

/// Allocate a zero-filled storage buffer for `len` elements of `T`.
pub(crate) fn zeroed<T: Element>(gpu: &GpuDevice, label: &str, len: usize) -> Result<GpuBuffer> {
    let size = padded_size((len * std::mem::size_of::<T>()) as u64);
    gpu.check_storage_size(label, size)?;
    // wgpu zero-initialises new buffers.
    let buffer = gpu.with_oom_scope(label, || {
        gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: TENSOR_USAGE,
            mapped_at_creation: false,
        })
    })?;
    Ok(GpuBuffer::new(buffer, len))
}

/// Read `len` elements of `T` back from a storage buffer.
///
/// **Expensive and synchronous**: stalls until the GPU has finished all
/// submitted work touching `src`.
pub(crate) fn read_buffer<T: Element>(
    gpu: &GpuDevice,
    src: &wgpu::Buffer,
    len: usize,
) -> Result<Vec<T>> {
    let bytes = (len * std::mem::size_of::<T>()) as u64;
    if bytes == 0 {
        return Ok(Vec::new());
    }
    let size = padded_size(bytes);

    let staging = gpu.with_oom_scope("readback staging", || {
        gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texload readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    })?;

    let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("texload readback"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        // The receiver outlives the poll below; a failed send only means
        // the caller already bailed out.
        let _ = tx.send(r);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| GpuError::ReadbackAbandoned)?
        .map_err(GpuError::Readback)?;

    let mapped = slice.get_mapped_range();
    let out: Vec<T> = bytemuck::cast_slice::<u8, T>(&mapped[..bytes as usize]).to_vec();
    drop(mapped);
    staging.unmap();
    Ok(out)
}

impl<T: Element> Tensor<T> {
    /// Upload to the GPU. The result is contiguous and device-resident.
    ///
    /// Uploading a tensor that is already on the GPU returns a clone
    /// sharing the same buffer.
    pub fn to_gpu(&self, gpu: &GpuDevice) -> Result<Tensor<T>> {
        match self.storage() {
            Storage::Gpu(_) => Ok(self.clone()),
            Storage::Host(data) => {
                let compact: Vec<T> = if self.is_contiguous() {
                    data[..self.numel()].to_vec()
                } else {
                    self.layout().positions().map(|p| data[p]).collect()
                };
                let buf = upload_slice(gpu, "texload tensor", &compact)?;
                log::debug!("uploaded {} {} elements ({} bytes)", buf.len(), T::DTYPE, buf.size_bytes());
                Ok(Tensor::from_parts(Storage::Gpu(buf), Layout::contiguous(self.shape())))
            }
        }
    }

    /// Read back to host memory, keeping the layout (a permuted device
    /// view stays a permuted host view).
    pub fn to_host(&self, gpu: &GpuDevice) -> Result<Tensor<T>> {
        match self.storage() {
            Storage::Host(_) => Ok(self.clone()),
            Storage::Gpu(buf) => {
                let span = self.layout().storage_span();
                debug_assert!(span <= buf.len(), "view span {span} exceeds buffer length {}", buf.len());
                let data: Vec<T> = read_buffer(gpu, buf.raw(), span)?;
                Ok(Tensor::from_parts(Storage::Host(data), self.layout().clone()))
            }
        }
    }
}

/// Borrow the storage buffer of a device tensor.
pub(crate) fn device_buffer<'a, T: Element>(
    name: &'static str,
    t: &'a Tensor<T>,
) -> Result<&'a GpuBuffer> {
    match t.storage() {
        Storage::Gpu(buf) => Ok(buf),
        Storage::Host(_) => Err(TexLoadError::invalid(
            name,
            ArgumentProblem::NotResident { expected: Device::Gpu, found: Device::Cpu },
        )),
    }
}
