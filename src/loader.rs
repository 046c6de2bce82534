// loader.rs — Texture loader entry points and the CPU kernel.
//
// Every call goes through the same three steps, whichever device runs it:
//
//   1. validate  — all four buffers against the kernel's device
//                  (residency, then contiguity); scatter checks image,
//                  faces, is_update, textures in that order
//   2. plan      — check the shapes against the index encoding
//   3. dispatch  — hand the plan and buffers to the kernel
//
// Steps 1 and 2 have no side effects, so a rejected call leaves every
// buffer exactly as it was.
//
// NEW RUST CONCEPTS:
// - Generic functions over `K: TextureKernel + ?Sized`, so the entry points
//   accept both concrete loaders and `&dyn TextureKernel`.
// - `rayon::ThreadPool::install` to run parallel iterators on a private
//   pool instead of the global one.

use crate::encoding::{SamplePlan, ScatterPlan, UpdateGranularity};
use crate::error::{Result, TexLoadError};
use crate::sample::{self, SampleMode};
use crate::scatter::{self, ScatterOptions};
use crate::tensor::{Device, Tensor};
use crate::validate::{check_inputs, host_slice, host_slice_mut, TensorMeta};

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Reject calls where two eligible work items target the same pixel.
    pub check_single_writer: bool,
    /// Pin the `is_update` granularity. `None` infers it from the shape.
    pub update_granularity: Option<UpdateGranularity>,
    /// Atlas filtering for `sample_textures`.
    pub sample_mode: SampleMode,
    /// Size of a dedicated rayon pool (CPU only). `None` uses the global pool.
    pub num_threads: Option<usize>,
    /// Minimum work items per rayon task.
    pub min_items_per_task: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            check_single_writer: cfg!(debug_assertions),
            update_granularity: None,
            sample_mode: SampleMode::Bilinear,
            num_threads: None,
            min_items_per_task: 1024,
        }
    }
}

impl LoaderConfig {
    pub(crate) fn scatter_options(&self) -> ScatterOptions {
        ScatterOptions {
            check_single_writer: self.check_single_writer,
            min_items_per_task: self.min_items_per_task,
        }
    }
}

/// A device that can run the texture kernels.
///
/// Implementors receive buffers that have already been validated for
/// their `device()` and a plan that matches the buffers' shapes.
pub trait TextureKernel {
    /// Device the kernel executes on; inputs must be resident there.
    fn device(&self) -> Device;

    fn config(&self) -> &LoaderConfig;

    /// Write eligible texture samples into `image`.
    fn scatter(
        &self,
        plan: &ScatterPlan,
        image: &mut Tensor<f32>,
        faces: &Tensor<i32>,
        textures: &Tensor<f32>,
        is_update: &Tensor<i32>,
    ) -> Result<()>;

    /// Fill enabled faces' texel cubes from `atlas`.
    fn sample(
        &self,
        plan: &SamplePlan,
        atlas: &Tensor<f32>,
        uv_faces: &Tensor<f32>,
        textures: &mut Tensor<f32>,
        is_update: &Tensor<i32>,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Validate the scatter inputs and build their plan. Reads only metadata.
fn prepare_scatter<K: TextureKernel + ?Sized>(
    kernel: &K,
    image: &Tensor<f32>,
    faces: &Tensor<i32>,
    textures: &Tensor<f32>,
    is_update: &Tensor<i32>,
) -> Result<ScatterPlan> {
    // Flags are checked ahead of the texture payload.
    let inputs: [(&'static str, &dyn TensorMeta); 4] = [
        ("image", image),
        ("faces", faces),
        ("is_update", is_update),
        ("textures", textures),
    ];
    check_inputs(kernel.device(), &inputs)?;

    ScatterPlan::new(
        image.layout(),
        faces.layout(),
        textures.layout(),
        is_update.layout(),
        kernel.config().update_granularity,
    )
}

/// Scatter texture samples into `image` in place.
///
/// On error `image` is unchanged.
pub fn load_textures_in_place<K: TextureKernel + ?Sized>(
    kernel: &K,
    image: &mut Tensor<f32>,
    faces: &Tensor<i32>,
    textures: &Tensor<f32>,
    is_update: &Tensor<i32>,
) -> Result<()> {
    let plan = prepare_scatter(kernel, image, faces, textures, is_update)?;
    kernel.scatter(&plan, image, faces, textures, is_update)
}

/// Scatter texture samples into a copy of `image` and return it.
///
/// The copy is only made once the inputs have been accepted.
pub fn load_textures<K: TextureKernel + ?Sized>(
    kernel: &K,
    image: &Tensor<f32>,
    faces: &Tensor<i32>,
    textures: &Tensor<f32>,
    is_update: &Tensor<i32>,
) -> Result<Tensor<f32>> {
    let plan = prepare_scatter(kernel, image, faces, textures, is_update)?;
    let mut out = image.clone();
    kernel.scatter(&plan, &mut out, faces, textures, is_update)?;
    Ok(out)
}

/// Sample each enabled face's texel cube from a texture atlas.
///
/// On error `textures` is unchanged.
pub fn sample_textures<K: TextureKernel + ?Sized>(
    kernel: &K,
    atlas: &Tensor<f32>,
    uv_faces: &Tensor<f32>,
    textures: &mut Tensor<f32>,
    is_update: &Tensor<i32>,
) -> Result<()> {
    let inputs: [(&'static str, &dyn TensorMeta); 4] = [
        ("atlas", atlas),
        ("uv_faces", uv_faces),
        ("textures", &*textures),
        ("is_update", is_update),
    ];
    check_inputs(kernel.device(), &inputs)?;

    let plan = SamplePlan::new(atlas.layout(), uv_faces.layout(), textures.layout(), is_update.layout())?;
    kernel.sample(&plan, atlas, uv_faces, textures, is_update)
}

// ---------------------------------------------------------------------------
// CPU kernel
// ---------------------------------------------------------------------------

/// CPU texture loader backed by rayon.
pub struct TextureLoader {
    config: LoaderConfig,
    pool: Option<rayon::ThreadPool>,
}

impl TextureLoader {
    /// Build a loader. With `num_threads` set, a dedicated pool is created.
    pub fn new(config: LoaderConfig) -> Result<Self> {
        let pool = match config.num_threads {
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("texload-{i}"))
                    .build()
                    .map_err(|e| TexLoadError::exhausted(format!("rayon pool of {n} threads: {e}")))?;
                log::debug!("texture loader: dedicated pool of {} threads", pool.current_num_threads());
                Some(pool)
            }
            None => None,
        };
        Ok(TextureLoader { config, pool })
    }

    /// Threads the kernels will run on.
    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl Default for TextureLoader {
    fn default() -> Self {
        TextureLoader { config: LoaderConfig::default(), pool: None }
    }
}

impl TextureKernel for TextureLoader {
    fn device(&self) -> Device {
        Device::Cpu
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
        let faces = host_slice("faces", faces)?;
        let textures = host_slice("textures", textures)?;
        let flags = host_slice("is_update", is_update)?;
        let image = host_slice_mut("image", image)?;
        let opts = self.config.scatter_options();
        self.install(|| scatter::scatter(plan, image, faces, textures, flags, opts))?;
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
        let atlas = host_slice("atlas", atlas)?;
        let uv = host_slice("uv_faces", uv_faces)?;
        let flags = host_slice("is_update", is_update)?;
        let textures = host_slice_mut("textures", textures)?;
        let mode = self.config.sample_mode;
        let min_len = self.config.min_items_per_task;
        self.install(|| sample::sample(plan, atlas, uv, textures, flags, mode, min_len));
        Ok(())
    }
}
