// gpu/scatter.rs — GPU texture-load scatter.
//
// Mirrors scatter.rs phase for phase, in one command buffer:
//
//   copy     image → fresh output buffer
//   claim    per work item: bounds, flag gate, winners[pixel] = item + 1
//   resolve  per pixel: copy the winner's C channels into the output
//
// OUTPUT STRATEGY: winner table, no atomics
// ─────────────────────────────────────────
// Concurrent claims on one pixel are plain u32 stores, so exactly one whole
// work-item id survives and resolve copies all of its channels. Which one
// survives depends on scheduling; the CPU kernel is the deterministic
// reference. No storage atomics: naga's SPIR-V memory semantics for them
// are rejected by strict Vulkan validation layers.
//
// The input image buffer is never written. The caller swaps the output in
// only when `out_of_range` is false, so a rejected call mutates nothing.

use wgpu::util::DeviceExt;

use crate::encoding::ScatterPlan;
use crate::error::Result;
use crate::gpu::buffer::{self, GpuBuffer};
use crate::gpu::device::{extent_u32, storage_entry, uniform_entry, GpuDevice};

// ---------------------------------------------------------------------------
// Uniform params (must match WGSL struct ScatterParams exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ScatterParams {
    items:           u32,
    pixels:          u32,
    claim_pitch:     u32,
    resolve_pitch:   u32,
    coords:          u32,
    items_per_batch: u32,
    samples:         u32,
    granularity:     u32,
    channels:        u32,
    layers:          u32,
    height:          u32,
    width:           u32,
    flag_strides:    [u32; 4],
}

/// Result of one scatter dispatch.
pub struct ScatterOutput {
    /// The updated image (a new buffer).
    pub image: GpuBuffer,
    /// Some work item's coordinate fell outside the image; `image` must
    /// be discarded.
    pub out_of_range: bool,
}

// ---------------------------------------------------------------------------
// GpuScatterPipeline
// ---------------------------------------------------------------------------

/// Compiled claim/resolve pipelines. Create once per device.
pub struct GpuScatterPipeline {
    claim:   wgpu::ComputePipeline,
    resolve: wgpu::ComputePipeline,
    bgl:     wgpu::BindGroupLayout,
}

impl GpuScatterPipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let shader_src = gpu.workgroup_size.specialise(include_str!("../shaders/scatter.wgsl"));
        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label:  Some("scatter.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuScatter BGL"),
            entries: &[
                storage_entry(0, true),  // faces
                storage_entry(1, true),  // textures
                storage_entry(2, true),  // is_update
                storage_entry(3, false), // winners
                storage_entry(4, false), // output image
                storage_entry(5, false), // status word
                uniform_entry(6),
            ],
        });

        let layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("GpuScatter pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let make = |entry_point: &'static str| {
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label:               Some(entry_point),
                layout:              Some(&layout),
                module:              &shader,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache:               None,
            })
        };

        GpuScatterPipeline { claim: make("claim"), resolve: make("resolve"), bgl }
    }

    /// Run claim and resolve over validated device buffers.
    pub fn run(
        &self,
        gpu:      &GpuDevice,
        plan:     &ScatterPlan,
        image:    &GpuBuffer,
        faces:    &GpuBuffer,
        textures: &GpuBuffer,
        flags:    &GpuBuffer,
    ) -> Result<ScatterOutput> {
        let pixels = plan.image.pixels();
        let claim_grid = gpu.dispatch_linear(plan.items())?;
        let resolve_grid = gpu.dispatch_linear(pixels)?;
        let s = plan.pixel_flag_strides;

        let params = ScatterParams {
            items:           extent_u32("work items", plan.items())?,
            pixels:          extent_u32("pixels", pixels)?,
            claim_pitch:     claim_grid.row_pitch,
            resolve_pitch:   resolve_grid.row_pitch,
            coords:          plan.image.coords() as u32,
            items_per_batch: extent_u32("items per batch", (plan.faces * plan.samples).max(1))?,
            samples:         extent_u32("samples", plan.samples.max(1))?,
            granularity:     plan.granularity.code(),
            channels:        extent_u32("channels", plan.image.channels)?,
            layers:          extent_u32("layers", plan.image.layers)?,
            height:          extent_u32("height", plan.image.height)?,
            width:           extent_u32("width", plan.image.width)?,
            flag_strides:    [
                extent_u32("flag stride", s[0])?,
                extent_u32("flag stride", s[1])?,
                extent_u32("flag stride", s[2])?,
                extent_u32("flag stride", s[3])?,
            ],
        };

        let winners = buffer::zeroed::<u32>(gpu, "GpuScatter winners", pixels)?;
        let status = buffer::zeroed::<u32>(gpu, "GpuScatter status", 1)?;
        let output = buffer::zeroed::<f32>(gpu, "GpuScatter image", image.len())?;

        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label:    Some("GpuScatter params"),
            contents: bytemuck::bytes_of(&params),
            usage:    wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label:  Some("GpuScatter BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: faces.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: textures.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: flags.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: winners.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: output.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: status.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: params_buf.as_entire_binding() },
            ],
        });

        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuScatter dispatch") },
        );
        encoder.copy_buffer_to_buffer(image.raw(), 0, output.raw(), 0, image.size_bytes());
        // Separate passes: wgpu orders claim writes before resolve reads.
        for (pipeline, grid, label) in [
            (&self.claim, claim_grid, "claim"),
            (&self.resolve, resolve_grid, "resolve"),
        ] {
            if grid.groups_x == 0 {
                continue;
            }
            let mut pass = encoder.begin_compute_pass(
                &wgpu::ComputePassDescriptor { label: Some(label), timestamp_writes: None },
            );
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(grid.groups_x, grid.groups_y, 1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let out_of_range = buffer::read_buffer::<u32>(gpu, status.raw(), 1)?
            .first()
            .is_some_and(|&s| s != 0);
        log::debug!(
            "gpu scatter: {} items ({}×{} groups), {} pixels ({}×{} groups), out_of_range = {}",
            params.items, claim_grid.groups_x, claim_grid.groups_y,
            params.pixels, resolve_grid.groups_x, resolve_grid.groups_y,
            out_of_range
        );

        Ok(ScatterOutput { image: output, out_of_range })
    }
}
