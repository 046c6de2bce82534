// tensor.rs — Runtime-shaped n-d array, generic over element type.
//
// KEY DIFFERENCES FROM A PLAIN Vec<T>:
// ┌──────────────────────────┬───────────────────────────────────────┐
// │  Vec<T>                  │  Tensor<T>                            │
// ├──────────────────────────┼───────────────────────────────────────┤
// │  1-D, always compact     │  n-D shape + strides + offset         │
// │                          │  (permuted views are not compact)     │
// ├──────────────────────────┼───────────────────────────────────────┤
// │  Always host memory      │  Host Vec<T> OR a wgpu storage buffer │
// │                          │  (Device::Cpu / Device::Gpu)          │
// └──────────────────────────┴───────────────────────────────────────┘
//
// Residency is a real runtime property: a tensor produced by `to_gpu`
// has no host copy at all, and the CPU kernels reject it. Element access
// (`get`, `set`, `to_vec`) is host-only and panics on a device tensor,
// the same way it panics on an out-of-bounds index.

use std::fmt;

use crate::gpu::buffer::GpuBuffer;
use crate::layout::Layout;

// ---------------------------------------------------------------------------
// Element Trait
// ---------------------------------------------------------------------------
// `bytemuck::Pod` is what lets us upload a &[T] to the GPU as raw bytes and
// cast mapped readback bytes back to &[T] without any unsafe code.

/// Element type tag, used in error messages and Debug output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    I32,
    U32,
    U8,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "f32",
            DType::I32 => "i32",
            DType::U32 => "u32",
            DType::U8 => "u8",
        };
        f.write_str(s)
    }
}

/// Trait for types that can be stored in a `Tensor`.
pub trait Element:
    Copy + Default + Send + Sync + PartialEq + fmt::Debug + bytemuck::Pod + 'static
{
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;
}

impl Element for u32 {
    const DTYPE: DType = DType::U32;
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;
}

// ---------------------------------------------------------------------------
// Device / Storage
// ---------------------------------------------------------------------------

/// The memory space a tensor lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// Host memory; consumed by the rayon kernels.
    Cpu,
    /// A wgpu storage buffer; consumed by the compute-shader kernels.
    Gpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu => write!(f, "gpu"),
        }
    }
}

/// Backing storage of a tensor.
#[derive(Clone)]
pub enum Storage<T: Element> {
    Host(Vec<T>),
    Gpu(GpuBuffer),
}

impl<T: Element> Storage<T> {
    pub fn device(&self) -> Device {
        match self {
            Storage::Host(_) => Device::Cpu,
            Storage::Gpu(_) => Device::Gpu,
        }
    }
}

// ---------------------------------------------------------------------------
// Tensor<T>
// ---------------------------------------------------------------------------

/// An n-dimensional array with runtime shape, generic over element type `T`.
///
/// Cloning a host tensor deep-copies its data. Cloning a device tensor
/// shares the underlying GPU buffer (see [`GpuBuffer`]).
#[derive(Clone)]
pub struct Tensor<T: Element> {
    storage: Storage<T>,
    layout: Layout,
}

impl<T: Element> Tensor<T> {
    // --- Constructors ---

    /// Zero-initialised host tensor.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, T::default())
    }

    /// Host tensor filled with `value`.
    pub fn full(shape: &[usize], value: T) -> Self {
        let layout = Layout::contiguous(shape);
        Tensor {
            storage: Storage::Host(vec![value; layout.numel()]),
            layout,
        }
    }

    /// Host tensor from row-major data.
    ///
    /// # Panics
    /// Panics if `data.len()` differs from the product of `shape`.
    pub fn from_vec(shape: &[usize], data: Vec<T>) -> Self {
        let layout = Layout::contiguous(shape);
        assert_eq!(
            data.len(),
            layout.numel(),
            "data length ({}) must equal shape product ({}) for shape {shape:?}",
            data.len(),
            layout.numel(),
        );
        Tensor { storage: Storage::Host(data), layout }
    }

    /// Host tensor over an explicit strided layout.
    ///
    /// # Panics
    /// Panics if `data` is too short to cover every element of the view.
    pub fn from_vec_strided(
        shape: &[usize],
        strides: &[usize],
        offset: usize,
        data: Vec<T>,
    ) -> Self {
        let layout = Layout::from_parts(shape, strides, offset);
        assert!(
            data.len() >= layout.storage_span(),
            "data length ({}) does not cover strided view (needs {})",
            data.len(),
            layout.storage_span(),
        );
        Tensor { storage: Storage::Host(data), layout }
    }

    pub(crate) fn from_parts(storage: Storage<T>, layout: Layout) -> Self {
        Tensor { storage, layout }
    }

    // --- Accessors ---

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    #[inline]
    pub fn numel(&self) -> usize {
        self.layout.numel()
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.storage.device()
    }

    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    #[inline]
    pub fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    /// Raw host storage (including any gaps of a strided view), or `None`
    /// for a device tensor.
    pub fn host_data(&self) -> Option<&[T]> {
        match &self.storage {
            Storage::Host(v) => Some(v),
            Storage::Gpu(_) => None,
        }
    }

    /// Mutable raw host storage, or `None` for a device tensor.
    pub fn host_data_mut(&mut self) -> Option<&mut [T]> {
        match &mut self.storage {
            Storage::Host(v) => Some(v),
            Storage::Gpu(_) => None,
        }
    }

    /// Element at a logical index.
    ///
    /// # Panics
    /// Panics if the index is out of bounds or the tensor is device-resident.
    pub fn get(&self, index: &[usize]) -> T {
        let pos = self.layout.position(index);
        self.expect_host()[pos]
    }

    /// Overwrite the element at a logical index.
    ///
    /// # Panics
    /// Panics if the index is out of bounds or the tensor is device-resident.
    pub fn set(&mut self, index: &[usize], value: T) {
        let pos = self.layout.position(index);
        match &mut self.storage {
            Storage::Host(v) => v[pos] = value,
            Storage::Gpu(_) => panic!("tensor is resident on gpu; call to_host() first"),
        }
    }

    /// All elements in logical row-major order.
    ///
    /// # Panics
    /// Panics if the tensor is device-resident.
    pub fn to_vec(&self) -> Vec<T> {
        let data = self.expect_host();
        self.layout.positions().map(|p| data[p]).collect()
    }

    /// Compact host copy in logical order. Returns `None` for a device
    /// tensor (permute it back, or read it to the host first).
    pub fn to_contiguous(&self) -> Option<Self> {
        self.host_data()?;
        Some(Tensor::from_vec(self.shape(), self.to_vec()))
    }

    // --- Views ---

    /// Reorder dimensions without moving data. The result is generally not
    /// contiguous.
    pub fn permute(self, dims: &[usize]) -> Self {
        let layout = self.layout.permute(dims);
        Tensor { storage: self.storage, layout }
    }

    /// Swap two dimensions.
    pub fn transpose(self, a: usize, b: usize) -> Self {
        let mut dims: Vec<usize> = (0..self.rank()).collect();
        dims.swap(a, b);
        self.permute(&dims)
    }

    /// Reinterpret a contiguous tensor with a new shape of equal size.
    ///
    /// # Panics
    /// Panics if the tensor is not contiguous or the sizes differ.
    pub fn reshape(self, shape: &[usize]) -> Self {
        assert!(self.is_contiguous(), "reshape requires a contiguous tensor");
        let layout = Layout::contiguous(shape);
        assert_eq!(
            layout.numel(),
            self.numel(),
            "cannot reshape {:?} into {shape:?}",
            self.shape(),
        );
        Tensor { storage: self.storage, layout }
    }

    // --- Internal helpers ---

    pub(crate) fn replace_storage(&mut self, storage: Storage<T>) {
        self.storage = storage;
    }

    fn expect_host(&self) -> &[T] {
        match &self.storage {
            Storage::Host(v) => v,
            Storage::Gpu(_) => panic!("tensor is resident on gpu; call to_host() first"),
        }
    }
}

impl Tensor<i32> {
    /// Flag tensor from booleans (`true` → 1).
    pub fn from_flags(shape: &[usize], flags: &[bool]) -> Self {
        Tensor::from_vec(shape, flags.iter().map(|&b| b as i32).collect())
    }
}

impl<T: Element> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor<{}> {{ shape: {:?}, strides: {:?}, offset: {}, device: {}",
            T::DTYPE,
            self.shape(),
            self.layout.strides(),
            self.layout.offset(),
            self.device(),
        )?;
        if let Storage::Host(_) = self.storage {
            let n = self.numel();
            let head: Vec<T> = self.to_vec().into_iter().take(16).collect();
            write!(f, ", data: {head:?}")?;
            if n > 16 {
                write!(f, " ... ({n} elements)")?;
            }
        }
        write!(f, " }}")
    }
}
