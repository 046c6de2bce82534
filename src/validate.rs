// validate.rs — Input validator run before any kernel work is scheduled.
//
// Every loader entry point passes ALL of its buffers through
// `check_inputs`, in the order it lists them. For each buffer:
//
//   1. residency  — the buffer lives on the device the kernel executes on
//   2. contiguity — compact row-major strides, zero offset
//
// The first failure is returned as `InvalidArgument` naming the buffer.
// Nothing is mutated, so a rejected call leaves every input untouched.

use crate::error::{ArgumentProblem, Result, TexLoadError};
use crate::layout::Layout;
use crate::tensor::{Device, Element, Tensor};

/// Type-erased view of what the validator needs from a tensor, so that
/// tensors of different element types can be checked in one list.
pub trait TensorMeta {
    fn layout(&self) -> &Layout;
    fn device(&self) -> Device;
}

impl<T: Element> TensorMeta for Tensor<T> {
    fn layout(&self) -> &Layout {
        Tensor::layout(self)
    }

    fn device(&self) -> Device {
        Tensor::device(self)
    }
}

/// Check one buffer: residency first, then contiguity.
pub fn check_input(name: &'static str, t: &dyn TensorMeta, device: Device) -> Result<()> {
    let found = t.device();
    if found != device {
        return Err(TexLoadError::invalid(
            name,
            ArgumentProblem::NotResident { expected: device, found },
        ));
    }
    let layout = t.layout();
    if !layout.is_contiguous() {
        return Err(TexLoadError::invalid(
            name,
            ArgumentProblem::NotContiguous {
                shape: layout.shape().to_vec(),
                strides: layout.strides().to_vec(),
                offset: layout.offset(),
            },
        ));
    }
    Ok(())
}

/// Check every buffer, in order, against `device`.
pub fn check_inputs(device: Device, inputs: &[(&'static str, &dyn TensorMeta)]) -> Result<()> {
    inputs
        .iter()
        .try_for_each(|&(name, t)| check_input(name, t, device))
}

/// The logical elements of a validated host tensor.
pub(crate) fn host_slice<'a, T: Element>(name: &'static str, t: &'a Tensor<T>) -> Result<&'a [T]> {
    check_input(name, t, Device::Cpu)?;
    let n = t.numel();
    t.host_data()
        .map(|d| &d[..n])
        .ok_or_else(|| not_on_host(name))
}

/// Mutable logical elements of a validated host tensor.
pub(crate) fn host_slice_mut<'a, T: Element>(
    name: &'static str,
    t: &'a mut Tensor<T>,
) -> Result<&'a mut [T]> {
    check_input(name, &*t, Device::Cpu)?;
    let n = t.numel();
    t.host_data_mut()
        .map(|d| &mut d[..n])
        .ok_or_else(|| not_on_host(name))
}

fn not_on_host(name: &'static str) -> TexLoadError {
    TexLoadError::invalid(
        name,
        ArgumentProblem::NotResident { expected: Device::Cpu, found: Device::Gpu },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_contiguous_host_tensors() {
        let a = Tensor::<f32>::zeros(&[2, 3]);
        let b = Tensor::<i32>::zeros(&[4]);
        check_inputs(Device::Cpu, &[("a", &a), ("b", &b)]).unwrap();
    }

    #[test]
    fn test_rejects_wrong_device() {
        let a = Tensor::<f32>::zeros(&[2, 3]);
        let err = check_inputs(Device::Gpu, &[("image", &a)]).unwrap_err();
        match err {
            TexLoadError::InvalidArgument { tensor, problem } => {
                assert_eq!(tensor, "image");
                assert_eq!(
                    problem,
                    ArgumentProblem::NotResident { expected: Device::Gpu, found: Device::Cpu }
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_reports_first_failing_buffer_in_order() {
        let ok = Tensor::<f32>::zeros(&[2, 2]);
        let bad = Tensor::<f32>::zeros(&[2, 3]).transpose(0, 1);
        let err = check_inputs(
            Device::Cpu,
            &[("image", &ok), ("faces", &ok), ("is_update", &bad), ("textures", &bad)],
        )
        .unwrap_err();
        assert_eq!(err.tensor(), Some("is_update"));
        assert!(matches!(
            err,
            TexLoadError::InvalidArgument { problem: ArgumentProblem::NotContiguous { .. }, .. }
        ));
    }

    #[test]
    fn test_last_buffer_is_checked_too() {
        let ok = Tensor::<i32>::zeros(&[3]);
        let bad = Tensor::<i32>::from_vec_strided(&[3], &[2], 0, vec![0; 6]);
        let err = check_inputs(
            Device::Cpu,
            &[("image", &ok), ("faces", &ok), ("is_update", &ok), ("textures", &bad)],
        )
        .unwrap_err();
        assert_eq!(err.tensor(), Some("textures"));
    }

    #[test]
    fn test_host_slice_trims_to_numel() {
        let t = Tensor::<u8>::from_vec(&[2, 2], vec![1, 2, 3, 4]);
        assert_eq!(host_slice("t", &t).unwrap(), &[1, 2, 3, 4]);
    }
}
