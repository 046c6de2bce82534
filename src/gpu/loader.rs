// gpu/loader.rs — GPU texture loader.
//
// Drop-in GPU counterpart of `TextureLoader`: the same entry points
// (`load_textures`, `load_textures_in_place`, `sample_textures`) accept a
// `GpuTextureLoader` once the inputs have been uploaded with `to_gpu()`.
//
// HOST ROUND-TRIPS
// ─────────────────
// The fast path never reads tensor data back except the one-word status.
// The host copy of `faces` / `is_update` is only fetched when:
//   - `check_single_writer` is on (the conflict check runs on the CPU
//     kernel's claim phase), or
//   - the device reported an out-of-range coordinate (the CPU bounds check
//     names the lowest offending work item), or
//   - the image has no pixels or no channels (nothing to dispatch, but
//     coordinates must still be checked).

use crate::encoding::{SamplePlan, ScatterPlan};
use crate::error::{Result, TexLoadError};
use crate::gpu::buffer::device_buffer;
use crate::gpu::device::GpuDevice;
use crate::gpu::sample::GpuSamplePipeline;
use crate::gpu::scatter::GpuScatterPipeline;
use crate::loader::{LoaderConfig, TextureKernel};
use crate::scatter;
use crate::tensor::{Device, Storage, Tensor};
use crate::validate::host_slice;

/// Texture loader that runs on a wgpu device.
pub struct GpuTextureLoader<'g> {
    gpu:     &'g GpuDevice,
    config:  LoaderConfig,
    scatter: GpuScatterPipeline,
    sample:  GpuSamplePipeline,
}

impl<'g> GpuTextureLoader<'g> {
    /// Compile the pipelines for `gpu`.
    pub fn new(gpu: &'g GpuDevice, config: LoaderConfig) -> Self {
        GpuTextureLoader {
            gpu,
            scatter: GpuScatterPipeline::new(gpu),
            sample: GpuSamplePipeline::new(gpu),
            config,
        }
    }

    pub fn gpu(&self) -> &GpuDevice {
        self.gpu
    }

    /// Run the CPU bounds check (and, if enabled, the conflict check) on a
    /// host copy of the indices.
    fn host_checks(
        &self,
        plan: &ScatterPlan,
        faces: &Tensor<i32>,
        is_update: &Tensor<i32>,
        check_single_writer: bool,
    ) -> Result<()> {
        let faces = faces.to_host(self.gpu)?;
        let faces = host_slice("faces", &faces)?;
        scatter::check_bounds(plan, faces, self.config.min_items_per_task)?;

        if check_single_writer && plan.image.pixels() > 0 {
            let flags = is_update.to_host(self.gpu)?;
            let flags = host_slice("is_update", &flags)?;
            let opts = self.config.scatter_options();
            scatter::claim(plan, faces, flags, opts)?;
        }
        Ok(())
    }
}

impl TextureKernel for GpuTextureLoader<'_> {
    fn device(&self) -> Device {
        Device::Gpu
    }

    fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn scatter(
        &self,
        plan: &ScatterPlan,
        image: &mut Tensor<f32>,
        faces: &Tensor<i32>,
        textures: &Tensor<f32>,
        is_update: &Tensor<i32>,
    ) -> Result<()> {
        if plan.items() == 0 {
            return Ok(());
        }
        if plan.image.pixels() == 0 || plan.image.channels == 0 {
            return self.host_checks(plan, faces, is_update, false);
        }
        if self.config.check_single_writer {
            self.host_checks(plan, faces, is_update, true)?;
        }

        let out = self.scatter.run(
            self.gpu,
            plan,
            device_buffer("image", image)?,
            device_buffer("faces", faces)?,
            device_buffer("textures", textures)?,
            device_buffer("is_update", is_update)?,
        )?;

        if out.out_of_range {
            self.host_checks(plan, faces, is_update, false)?;
            return Err(TexLoadError::shape(
                "device reported an out-of-range coordinate that the host check did not reproduce",
            ));
        }
        image.replace_storage(Storage::Gpu(out.image));
        Ok(())
    }

    fn sample(
        &self,
        plan: &SamplePlan,
        atlas: &Tensor<f32>,
        uv_faces: &Tensor<f32>,
        textures: &mut Tensor<f32>,
        is_update: &Tensor<i32>,
    ) -> Result<()> {
        if plan.items() == 0 || plan.channels == 0 {
            return Ok(());
        }
        let out = self.sample.run(
            self.gpu,
            plan,
            self.config.sample_mode,
            device_buffer("atlas", atlas)?,
            device_buffer("uv_faces", uv_faces)?,
            device_buffer("textures", textures)?,
            device_buffer("is_update", is_update)?,
        )?;
        textures.replace_storage(Storage::Gpu(out));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests — CPU kernel is the reference
// ---------------------------------------------------------------------------
