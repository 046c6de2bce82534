// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and select the first non-CPU one.
//   - Expose a `DeviceProfile` for simulating hardware limits on a
//     development machine (e.g., cap invocations to match Raspberry Pi).
//   - Provide `WorkgroupSize` and the dispatch sizing used by every
//     texture kernel.
//   - Map oversized requests onto `ResourceExhausted` BEFORE dispatch,
//     instead of letting wgpu's validation layer panic.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe on WSL2. We enumerate explicitly and prefer real
// hardware, falling back to whatever exists.
//
// LINEAR DISPATCH:
// The texture kernels are 1-D over work items (faces × samples, or
// destination pixels), but `dispatch_workgroups` caps each dimension at
// `max_compute_workgroups_per_dimension` (65535 by default). A 1-D count
// is therefore folded into a 2-D grid; the shader rebuilds the linear id
// as `gid.y * row_pitch + gid.x` and guards `id >= count`.

use std::fmt;

use crate::error::{Result, TexLoadError};

/// Hardware profile controlling device limits and default workgroup sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    /// Use the adapter's actual hardware limits. No artificial caps.
    Native,
    /// Simulate Raspberry Pi 4/5 (VideoCore VI/VII, V3DV Vulkan): 256
    /// invocations per workgroup, 128 MiB storage bindings.
    RaspberryPi,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::RaspberryPi => write!(f, "RaspberryPi (simulated limits)"),
        }
    }
}

/// A workgroup configuration for compute dispatches.
///
/// The kernels are linear, so the product `x * y` is what matters; it
/// must not exceed the profile's `max_compute_invocations_per_workgroup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Validated constructor: both sides non-zero and `x * y <= max`.
    pub fn checked(x: u32, y: u32, max: u32) -> std::result::Result<Self, GpuError> {
        if x == 0 || y == 0 {
            return Err(GpuError::EmptyWorkgroup { x, y });
        }
        match x.checked_mul(y) {
            Some(total) if total <= max => Ok(WorkgroupSize { x, y }),
            Some(total) => Err(GpuError::WorkgroupTooLarge { total: total as u64, max }),
            None => Err(GpuError::WorkgroupTooLarge { total: x as u64 * y as u64, max }),
        }
    }

    /// Total invocations per workgroup (x * y), saturating at `u32::MAX`.
    pub fn total(&self) -> u32 {
        self.x.saturating_mul(self.y)
    }

    /// - `Native`: 16×8 = 128 invocations (4 NVIDIA warps / 2 AMD waves).
    /// - `RaspberryPi`: 8×8 = 64, well inside the 256 limit.
    fn for_profile(profile: DeviceProfile) -> Self {
        match profile {
            DeviceProfile::Native => WorkgroupSize { x: 16, y: 8 },
            DeviceProfile::RaspberryPi => WorkgroupSize { x: 8, y: 8 },
        }
    }

    /// Substitute `{{WG_X}}` / `{{WG_Y}}` placeholders in a WGSL template.
    ///
    /// naga does not accept `override` expressions inside
    /// `@workgroup_size`, so the sizes are baked into the source text.
    pub fn specialise(&self, template: &str) -> String {
        template
            .replace("{{WG_X}}", &self.x.to_string())
            .replace("{{WG_Y}}", &self.y.to_string())
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// A 2-D grid of workgroups covering `count` linear work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearDispatch {
    /// Workgroups along x.
    pub groups_x: u32,
    /// Workgroups along y.
    pub groups_y: u32,
    /// Invocations per grid row: `groups_x * workgroup.x`. The shader
    /// computes `id = gid.y * row_pitch + gid.x`.
    pub row_pitch: u32,
}

/// Fold `count` linear items into a 2-D dispatch.
///
/// Each workgroup covers `wg.total()` items, laid out as one grid row of
/// `wg.x` columns times `wg.y` rows of the grid; the shader's linear id
/// formula makes the mapping exact.
pub fn linear_dispatch(
    count: u32,
    wg: WorkgroupSize,
    max_per_dim: u32,
) -> Option<LinearDispatch> {
    if count == 0 {
        return Some(LinearDispatch { groups_x: 0, groups_y: 0, row_pitch: 0 });
    }
    if wg.x == 0 || wg.y == 0 || max_per_dim == 0 {
        return None;
    }
    // Invocation grid is (groups_x * wg.x) wide and (groups_y * wg.y) tall.
    // Pick the narrowest width that keeps groups_y within the limit.
    let per_group = wg.total();
    let groups_needed = count.div_ceil(per_group);
    let groups_x = groups_needed.min(max_per_dim);
    let row_pitch = groups_x.checked_mul(wg.x)?;
    let rows = count.div_ceil(row_pitch);
    let groups_y = rows.div_ceil(wg.y);
    if groups_y > max_per_dim {
        return None;
    }
    Some(LinearDispatch { groups_x, groups_y, row_pitch })
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// The core GPU context: adapter, device, queue, and active profile.
///
/// Hold one `GpuDevice` for the lifetime of the application; creating one
/// is expensive (Vulkan instance + device initialisation).
///
/// # Field drop order
/// `_instance` is declared last so the `wgpu::Instance` outlives `device`
/// and `queue` (dzn on WSL2 crashes if the instance goes first).
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    pub limits: wgpu::Limits,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` with `DeviceProfile::Native` limits.
    pub fn new() -> std::result::Result<Self, GpuError> {
        Self::new_with_profile(DeviceProfile::Native)
    }

    /// Create a `GpuDevice` with an explicit hardware profile.
    pub fn new_with_profile(profile: DeviceProfile) -> std::result::Result<Self, GpuError> {
        pollster::block_on(Self::init_async(profile))
    }

    async fn init_async(profile: DeviceProfile) -> std::result::Result<Self, GpuError> {
        // ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER lets dzn (WSL2) enumerate;
        // the kernels only use storage buffers and compute dispatches.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let all_adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::VULKAN)
            .into_iter()
            .collect();

        if all_adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }

        for a in &all_adapters {
            let info = a.get_info();
            log::info!("Vulkan adapter: {} ({:?}, {:?})", info.name, info.backend, info.device_type);
        }

        // Tier 1: anything that is not a software rasteriser.
        // Tier 2: whatever exists.
        let adapter = all_adapters
            .into_iter()
            .find(|a| !matches!(a.get_info().device_type, wgpu::DeviceType::Cpu))
            .or_else(|| {
                instance
                    .enumerate_adapters(wgpu::Backends::VULKAN)
                    .into_iter()
                    .next()
            })
            .ok_or(GpuError::NoSuitableAdapter)?;

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            vendor: raw_info.vendor,
            device: raw_info.device,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        let profile = match profile {
            DeviceProfile::Native if raw_info.name.to_ascii_lowercase().contains("v3d") => {
                log::info!("V3D adapter detected, using RaspberryPi profile");
                DeviceProfile::RaspberryPi
            }
            other => other,
        };

        let limits = limits_for_profile(profile);

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("texload"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        let workgroup_size = WorkgroupSize::for_profile(profile);
        log::info!("selected {adapter_info}, profile {profile}, workgroup {workgroup_size}");

        Ok(GpuDevice {
            device,
            queue,
            profile,
            adapter_info,
            workgroup_size,
            limits,
            _instance: instance,
        })
    }

    /// Override the default workgroup size, validating against the active profile.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> std::result::Result<(), GpuError> {
        self.workgroup_size = WorkgroupSize::checked(x, y, max_invocations_for_profile(self.profile))?;
        Ok(())
    }

    /// Dispatch grid for `count` linear work items.
    ///
    /// Returns `ResourceExhausted` if `count` does not fit in a `u32` or the
    /// folded grid still exceeds the per-dimension workgroup limit.
    pub fn dispatch_linear(&self, count: usize) -> Result<LinearDispatch> {
        let count = u32::try_from(count).map_err(|_| {
            TexLoadError::exhausted(format!("{count} work items exceed a single dispatch"))
        })?;
        linear_dispatch(
            count,
            self.workgroup_size,
            self.limits.max_compute_workgroups_per_dimension,
        )
        .ok_or_else(|| {
            TexLoadError::exhausted(format!(
                "{count} work items need more than {} workgroups per dimension",
                self.limits.max_compute_workgroups_per_dimension
            ))
        })
    }

    /// Reject a storage binding larger than the device allows.
    pub fn check_storage_size(&self, label: &str, bytes: u64) -> Result<()> {
        let max_binding = self.limits.max_storage_buffer_binding_size as u64;
        let max_buffer = self.limits.max_buffer_size;
        if bytes > max_binding || bytes > max_buffer {
            return Err(TexLoadError::exhausted(format!(
                "{label}: {bytes} bytes exceeds device storage limit of {} bytes",
                max_binding.min(max_buffer)
            )));
        }
        Ok(())
    }

    /// Run `f` inside an OutOfMemory error scope; an allocation failure
    /// inside it becomes `ResourceExhausted`.
    pub fn with_oom_scope<R>(&self, what: &str, f: impl FnOnce() -> R) -> Result<R> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let out = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(TexLoadError::exhausted(format!("{what}: {e}"))),
            None => Ok(out),
        }
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {}, workgroup: {} }}",
            self.adapter_info, self.profile, self.workgroup_size
        )
    }
}

// ============================================================
// Limits helpers
// ============================================================

/// Build wgpu limits for the given profile. Non-native profiles request
/// *lower* limits so violations surface on the development machine.
fn limits_for_profile(profile: DeviceProfile) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default(),
        DeviceProfile::RaspberryPi => wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_texture_dimension_2d: 4096,
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

fn max_invocations_for_profile(profile: DeviceProfile) -> u32 {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default().max_compute_invocations_per_workgroup,
        DeviceProfile::RaspberryPi => 256,
    }
}

// ============================================================
// Pipeline helpers
// ============================================================

/// Bind group layout entry for a compute-visible storage buffer.
pub(crate) fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bind group layout entry for the params uniform.
pub(crate) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Narrow a host extent to the `u32` the shaders index with.
pub(crate) fn extent_u32(what: &str, value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| TexLoadError::exhausted(format!("{what} = {value} does not fit a shader index")))
}

// ============================================================
// Error type
// ============================================================

/// Errors from GPU device initialisation, configuration and readback.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error(
        "no suitable Vulkan adapter found. \
         On WSL2: ensure Vulkan is installed and `vulkaninfo` lists a real GPU."
    )]
    NoSuitableAdapter,

    #[error("device request failed: {0}")]
    DeviceRequest(#[source] wgpu::RequestDeviceError),

    #[error("workgroup size {total} exceeds profile limit of {max} invocations")]
    WorkgroupTooLarge { total: u64, max: u32 },

    #[error("workgroup size {x}×{y} has no invocations")]
    EmptyWorkgroup { x: u32, y: u32 },

    #[error("buffer readback failed: {0}")]
    Readback(#[source] wgpu::BufferAsyncError),

    #[error("buffer readback callback was dropped before completing")]
    ReadbackAbandoned,
}

// ============================================================
// Tests
// ============================================================
