// gpu/sample.rs — GPU texture-atlas sampling.
//
// One invocation per texel of every face cube. Each invocation writes only
// its own C channels, so no coordination is needed. Faces whose flag is 0
// keep their old contents: the output starts as a copy of `textures`.

use wgpu::util::DeviceExt;

use crate::encoding::SamplePlan;
use crate::error::Result;
use crate::gpu::buffer::{self, GpuBuffer};
use crate::gpu::device::{extent_u32, storage_entry, uniform_entry, GpuDevice};
use crate::sample::SampleMode;

// Must match WGSL struct SampleParams.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SampleParams {
    items:           u32,
    row_pitch:       u32,
    faces_per_batch: u32,
    texture_size:    u32,
    channels:        u32,
    height:          u32,
    width:           u32,
    mode:            u32,
}

/// Compiled sampling pipeline. Create once per device.
pub struct GpuSamplePipeline {
    pipeline: wgpu::ComputePipeline,
    bgl:      wgpu::BindGroupLayout,
}

impl GpuSamplePipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let shader_src = gpu.workgroup_size.specialise(include_str!("../shaders/sample.wgsl"));
        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label:  Some("sample.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuSample BGL"),
            entries: &[
                storage_entry(0, true),  // atlas
                storage_entry(1, true),  // uv_faces
                storage_entry(2, true),  // is_update
                storage_entry(3, false), // textures (output copy)
                uniform_entry(4),
            ],
        });

        let layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("GpuSample pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label:               Some("sample_atlas"),
            layout:              Some(&layout),
            module:              &shader,
            entry_point:         "sample_atlas",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache:               None,
        });

        GpuSamplePipeline { pipeline, bgl }
    }

    /// Sample into a copy of `textures` and return the copy.
    pub fn run(
        &self,
        gpu:      &GpuDevice,
        plan:     &SamplePlan,
        mode:     SampleMode,
        atlas:    &GpuBuffer,
        uv_faces: &GpuBuffer,
        textures: &GpuBuffer,
        flags:    &GpuBuffer,
    ) -> Result<GpuBuffer> {
        let grid = gpu.dispatch_linear(plan.items())?;
        let params = SampleParams {
            items:           extent_u32("texels", plan.items())?,
            row_pitch:       grid.row_pitch,
            faces_per_batch: extent_u32("faces", plan.faces.max(1))?,
            texture_size:    extent_u32("texture size", plan.texture_size)?,
            channels:        extent_u32("channels", plan.channels)?,
            height:          extent_u32("atlas height", plan.height)?,
            width:           extent_u32("atlas width", plan.width)?,
            mode:            mode.code(),
        };

        let output = buffer::zeroed::<f32>(gpu, "GpuSample textures", textures.len())?;
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label:    Some("GpuSample params"),
            contents: bytemuck::bytes_of(&params),
            usage:    wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label:  Some("GpuSample BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: atlas.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: uv_faces.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: flags.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: output.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: params_buf.as_entire_binding() },
            ],
        });

        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuSample dispatch") },
        );
        encoder.copy_buffer_to_buffer(textures.raw(), 0, output.raw(), 0, textures.size_bytes());
        if grid.groups_x > 0 {
            let mut pass = encoder.begin_compute_pass(
                &wgpu::ComputePassDescriptor { label: Some("sample_atlas"), timestamp_writes: None },
            );
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(grid.groups_x, grid.groups_y, 1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        log::debug!(
            "gpu sample: {} texels, {:?}, {}×{} groups",
            params.items, mode, grid.groups_x, grid.groups_y
        );

        Ok(output)
    }
}
