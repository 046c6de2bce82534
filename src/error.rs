// error.rs — Error taxonomy for every public entry point.
//
// Three broad classes:
//   - Rejections raised BEFORE any kernel work (InvalidArgument,
//     ShapeMismatch, ConflictingWriters). The image is never touched.
//   - ResourceExhausted — the execution substrate (rayon pool, host
//     allocator, GPU limits / OOM) could not run the kernel. Retry with a
//     smaller batch.
//   - Gpu — device bring-up and readback failures from `gpu::device`.

use std::fmt;

use crate::gpu::device::GpuError;
use crate::tensor::Device;

/// Why a particular input tensor was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentProblem {
    /// The tensor lives in a different memory space than the kernel runs in.
    NotResident { expected: Device, found: Device },
    /// Strides are not compact row-major, or the view starts at an offset.
    NotContiguous {
        shape: Vec<usize>,
        strides: Vec<usize>,
        offset: usize,
    },
    /// A destination coordinate stored in `faces` falls outside the image.
    IndexOutOfRange {
        /// Flat work-item index `(b * F + f) * S + s`.
        item: usize,
        /// Which coordinate of the item (0 = first spatial axis).
        axis: usize,
        value: i64,
        bound: usize,
    },
}

impl fmt::Display for ArgumentProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentProblem::NotResident { expected, found } => {
                write!(f, "must be resident on {expected} (found {found})")
            }
            ArgumentProblem::NotContiguous { shape, strides, offset } => write!(
                f,
                "must be contiguous (shape {shape:?}, strides {strides:?}, offset {offset})"
            ),
            ArgumentProblem::IndexOutOfRange { item, axis, value, bound } => write!(
                f,
                "work item {item}: coordinate {axis} = {value} is outside [0, {bound})"
            ),
        }
    }
}

/// Errors returned by the texture loaders.
#[derive(Debug, thiserror::Error)]
pub enum TexLoadError {
    #[error("{tensor} {problem}")]
    InvalidArgument {
        tensor: &'static str,
        problem: ArgumentProblem,
    },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Two eligible work items target the same destination pixel.
    /// Only raised when `LoaderConfig::check_single_writer` is on.
    #[error(
        "work items {first_item} and {second_item} both write destination pixel {pixel}; \
         at most one eligible writer per pixel is allowed"
    )]
    ConflictingWriters {
        pixel: usize,
        first_item: usize,
        second_item: usize,
    },

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

impl TexLoadError {
    pub(crate) fn invalid(tensor: &'static str, problem: ArgumentProblem) -> Self {
        TexLoadError::InvalidArgument { tensor, problem }
    }

    pub(crate) fn shape<T: ToString>(msg: T) -> Self {
        TexLoadError::ShapeMismatch(msg.to_string())
    }

    pub(crate) fn exhausted<T: ToString>(msg: T) -> Self {
        TexLoadError::ResourceExhausted(msg.to_string())
    }

    /// Name of the offending tensor, if this is an `InvalidArgument`.
    pub fn tensor(&self) -> Option<&'static str> {
        match self {
            TexLoadError::InvalidArgument { tensor, .. } => Some(tensor),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TexLoadError>;
