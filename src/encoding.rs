// encoding.rs — Explicit index encoding shared by the CPU and GPU kernels.
//
// The tensors handed to a loader do not describe how they relate to each
// other; that relation is a convention. This module writes the convention
// down once, checks it against the actual shapes, and hands the kernels a
// plan with every extent they need.
//
// SCATTER ENCODING
// ─────────────────
//   image      f32  (B, H, W, C)            rank 4, L = 1
//                   (B, L, H, W, C)         rank 5
//   faces      i32  (B, F, S1..Sn, K)       K = rank(image) - 2
//                   [.., :] = (row, col) or (layer, row, col)
//   textures   f32  (B, F, S1..Sn, C)
//   is_update  i32  (B, F, S1..Sn)          PerSample
//                   (B, F)                  PerFace
//                   broadcastable to (B, [L,] H, W)   PerPixel
//
// Work item i = (b * F + f) * S + s, with S = S1 * ... * Sn (1 if n = 0).
// Destination pixel p = ((b * L + l) * H + y) * W + x; its channels are
// image[p * C .. p * C + C].

use std::fmt;

use crate::error::{Result, TexLoadError};
use crate::layout::{broadcast_strides, Layout};

/// How `is_update` is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateGranularity {
    /// One flag per work item, shape `(B, F, S1..Sn)`.
    PerSample,
    /// One flag per face, shape `(B, F)`.
    PerFace,
    /// One flag per destination pixel, broadcast right-aligned onto
    /// `(B, [L,] H, W)`.
    PerPixel,
}

impl UpdateGranularity {
    /// Numeric code understood by the WGSL kernels.
    pub(crate) fn code(self) -> u32 {
        match self {
            UpdateGranularity::PerSample => 0,
            UpdateGranularity::PerFace => 1,
            UpdateGranularity::PerPixel => 2,
        }
    }
}

impl fmt::Display for UpdateGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateGranularity::PerSample => write!(f, "per-sample"),
            UpdateGranularity::PerFace => write!(f, "per-face"),
            UpdateGranularity::PerPixel => write!(f, "per-pixel"),
        }
    }
}

/// Extents of the destination image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDims {
    pub batch: usize,
    pub layers: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    /// Rank of the image tensor (4 or 5).
    pub rank: usize,
}

impl ImageDims {
    pub fn from_shape(shape: &[usize]) -> Result<Self> {
        match *shape {
            [batch, height, width, channels] => Ok(ImageDims {
                batch,
                layers: 1,
                height,
                width,
                channels,
                rank: 4,
            }),
            [batch, layers, height, width, channels] => Ok(ImageDims {
                batch,
                layers,
                height,
                width,
                channels,
                rank: 5,
            }),
            _ => Err(TexLoadError::shape(format!(
                "image must be (B, H, W, C) or (B, L, H, W, C), got {shape:?}"
            ))),
        }
    }

    /// Number of coordinates each face sample carries.
    #[inline]
    pub fn coords(&self) -> usize {
        self.rank - 2
    }

    /// Number of destination pixels (`B * L * H * W`).
    #[inline]
    pub fn pixels(&self) -> usize {
        self.batch * self.layers * self.height * self.width
    }

    /// Shape of the pixel region that per-pixel flags broadcast onto.
    fn pixel_region(&self) -> Vec<usize> {
        if self.rank == 5 {
            vec![self.batch, self.layers, self.height, self.width]
        } else {
            vec![self.batch, self.height, self.width]
        }
    }
}

/// Validated interpretation of one scatter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScatterPlan {
    pub image: ImageDims,
    /// Faces per batch element (`F`).
    pub faces: usize,
    /// Samples per face (`S`).
    pub samples: usize,
    pub granularity: UpdateGranularity,
    /// For `PerPixel`: strides into the flag buffer for (b, l, y, x);
    /// broadcast axes have stride 0. Unused otherwise.
    pub pixel_flag_strides: [usize; 4],
}

impl ScatterPlan {
    /// Check the four layouts against the scatter encoding.
    ///
    /// `forced` pins the flag granularity. With `None` the shape of
    /// `is_update` must fit exactly one granularity; a shape that fits
    /// several (say a `(B, F)` mask when `(B, F) == (H, W)`) is a
    /// `ShapeMismatch` unless it holds a single flag.
    pub fn new(
        image: &Layout,
        faces: &Layout,
        textures: &Layout,
        is_update: &Layout,
        forced: Option<UpdateGranularity>,
    ) -> Result<Self> {
        let dims = ImageDims::from_shape(image.shape())?;
        let k = dims.coords();

        let fs = faces.shape();
        if fs.len() < 3 {
            return Err(TexLoadError::shape(format!(
                "faces must be (B, F, ..., {k}), got {fs:?}"
            )));
        }
        if fs[0] != dims.batch {
            return Err(TexLoadError::shape(format!(
                "faces batch {} does not match image batch {}",
                fs[0], dims.batch
            )));
        }
        if fs[fs.len() - 1] != k {
            return Err(TexLoadError::shape(format!(
                "faces last dimension must hold {k} coordinates for a rank-{} image, got {}",
                dims.rank,
                fs[fs.len() - 1]
            )));
        }
        let num_faces = fs[1];
        let sample_dims = &fs[2..fs.len() - 1];
        let samples: usize = sample_dims.iter().product();

        let ts = textures.shape();
        if ts.len() != fs.len()
            || ts[0] != dims.batch
            || ts[1] != num_faces
            || &ts[2..ts.len() - 1] != sample_dims
        {
            return Err(TexLoadError::shape(format!(
                "textures {ts:?} must be (B, F, sample dims.., C) matching faces {fs:?}"
            )));
        }
        if ts[ts.len() - 1] != dims.channels {
            return Err(TexLoadError::shape(format!(
                "textures have {} channels but image has {}",
                ts[ts.len() - 1],
                dims.channels
            )));
        }

        let us = is_update.shape();
        let per_sample: Vec<usize> = fs[..fs.len() - 1].to_vec();
        let per_face = [dims.batch, num_faces];
        let region = dims.pixel_region();

        let pixel_strides = || -> Option<[usize; 4]> {
            let s = broadcast_strides(us, &region)?;
            Some(if dims.rank == 5 {
                [s[0], s[1], s[2], s[3]]
            } else {
                [s[0], 0, s[1], s[2]]
            })
        };

        let mismatch = |g: UpdateGranularity| {
            TexLoadError::shape(format!(
                "is_update {us:?} is not a valid {g} mask (faces {fs:?}, image {:?})",
                image.shape()
            ))
        };

        let (granularity, pixel_flag_strides) = match forced {
            Some(UpdateGranularity::PerSample) => {
                if us != per_sample.as_slice() {
                    return Err(mismatch(UpdateGranularity::PerSample));
                }
                (UpdateGranularity::PerSample, [0; 4])
            }
            Some(UpdateGranularity::PerFace) => {
                if us != per_face {
                    return Err(mismatch(UpdateGranularity::PerFace));
                }
                (UpdateGranularity::PerFace, [0; 4])
            }
            Some(UpdateGranularity::PerPixel) => {
                let s = pixel_strides().ok_or_else(|| mismatch(UpdateGranularity::PerPixel))?;
                (UpdateGranularity::PerPixel, s)
            }
            None => {
                // Without sample dims the per-sample and per-face shapes are
                // the same and index identically; count that as one reading.
                let mut candidates: Vec<(UpdateGranularity, [usize; 4])> = Vec::with_capacity(2);
                if us == per_sample.as_slice() {
                    candidates.push((UpdateGranularity::PerSample, [0; 4]));
                } else if us == per_face {
                    candidates.push((UpdateGranularity::PerFace, [0; 4]));
                }
                if let Some(s) = pixel_strides() {
                    candidates.push((UpdateGranularity::PerPixel, s));
                }
                match candidates.as_slice() {
                    [] => {
                        return Err(TexLoadError::shape(format!(
                            "is_update {us:?} matches neither per-sample {per_sample:?}, \
                             per-face {per_face:?} nor per-pixel {region:?}"
                        )))
                    }
                    [only] => *only,
                    // A single flag gates every item the same way under any reading.
                    [first, ..] if us.iter().product::<usize>() <= 1 => *first,
                    [first, second, ..] => {
                        return Err(TexLoadError::shape(format!(
                            "is_update {us:?} is ambiguous: it is both a valid {} mask and a \
                             valid {} mask for faces {fs:?}, image {:?}; set \
                             LoaderConfig::update_granularity",
                            first.0,
                            second.0,
                            image.shape()
                        )))
                    }
                }
            }
        };

        let plan = ScatterPlan {
            image: dims,
            faces: num_faces,
            samples,
            granularity,
            pixel_flag_strides,
        };
        log::debug!(
            "scatter plan: image {:?}, {} faces × {} samples, {} flags",
            image.shape(),
            plan.faces,
            plan.samples,
            plan.granularity
        );
        Ok(plan)
    }

    /// Total work items (`B * F * S`).
    #[inline]
    pub fn items(&self) -> usize {
        self.image.batch * self.faces * self.samples
    }

    /// Batch element a work item belongs to.
    #[inline]
    pub fn batch_of(&self, item: usize) -> usize {
        item / (self.faces * self.samples)
    }

    /// Resolve a work item's coordinates to a destination pixel.
    ///
    /// `coords` is the item's slice of `faces` (length `K`). On failure
    /// returns `(axis, value, bound)` of the first offending coordinate.
    #[inline]
    pub fn destination(&self, item: usize, coords: &[i32]) -> std::result::Result<usize, (usize, i64, usize)> {
        let d = &self.image;
        debug_assert_eq!(coords.len(), d.coords(), "plan expects {} coordinates", d.coords());
        // Rank-4 images carry (row, col); pad the layer axis with 0.
        let bounds = [d.layers, d.height, d.width];
        let first = 3 - coords.len();
        let mut idx = [0usize; 3];
        for (axis, &v) in coords.iter().enumerate() {
            let bound = bounds[first + axis];
            if v < 0 || v as usize >= bound {
                return Err((axis, v as i64, bound));
            }
            idx[first + axis] = v as usize;
        }
        let [l, y, x] = idx;
        let b = self.batch_of(item);
        Ok(((b * d.layers + l) * d.height + y) * d.width + x)
    }

    /// Index into the flag buffer for a work item landing on `pixel`.
    #[inline]
    pub fn flag_index(&self, item: usize, pixel: usize) -> usize {
        match self.granularity {
            UpdateGranularity::PerSample => item,
            UpdateGranularity::PerFace => item / self.samples,
            UpdateGranularity::PerPixel => {
                let d = &self.image;
                let x = pixel % d.width;
                let y = (pixel / d.width) % d.height;
                let l = (pixel / (d.width * d.height)) % d.layers;
                let b = pixel / (d.width * d.height * d.layers);
                let s = &self.pixel_flag_strides;
                b * s[0] + l * s[1] + y * s[2] + x * s[3]
            }
        }
    }
}

/// Validated interpretation of one sampling call.
///
/// ```text
///   atlas      f32  ([B,] H, W, C)
///   uv_faces   f32  ([B,] F, 3, 2)
///   textures   f32  ([B,] F, T, T, T, C)
///   is_update  i32  ([B,] F)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplePlan {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub faces: usize,
    /// Edge length `T` of each face's texel cube.
    pub texture_size: usize,
}

impl SamplePlan {
    pub fn new(atlas: &Layout, uv_faces: &Layout, textures: &Layout, is_update: &Layout) -> Result<Self> {
        let a = atlas.shape();
        let (batch, height, width, channels, batched) = match *a {
            [h, w, c] => (1, h, w, c, false),
            [b, h, w, c] => (b, h, w, c, true),
            _ => {
                return Err(TexLoadError::shape(format!(
                    "atlas must be (H, W, C) or (B, H, W, C), got {a:?}"
                )))
            }
        };
        let lead = usize::from(batched);

        let uv = uv_faces.shape();
        if uv.len() != 3 + lead || uv[uv.len() - 2..] != [3, 2] || (batched && uv[0] != batch) {
            return Err(TexLoadError::shape(format!(
                "uv_faces must be ({}F, 3, 2), got {uv:?}",
                if batched { "B, " } else { "" }
            )));
        }
        let faces = uv[lead];

        let t = textures.shape();
        let texture_size = t.get(lead + 1).copied().unwrap_or(0);
        let expected: Vec<usize> = if batched {
            vec![batch, faces, texture_size, texture_size, texture_size, channels]
        } else {
            vec![faces, texture_size, texture_size, texture_size, channels]
        };
        if t != expected.as_slice() || texture_size == 0 {
            return Err(TexLoadError::shape(format!(
                "textures must be ({}F, T, T, T, {channels}) with T >= 1, got {t:?}",
                if batched { "B, " } else { "" }
            )));
        }

        let u = is_update.shape();
        let expected_flags: Vec<usize> = if batched { vec![batch, faces] } else { vec![faces] };
        if u != expected_flags.as_slice() {
            return Err(TexLoadError::shape(format!(
                "is_update must be {expected_flags:?} (one flag per face), got {u:?}"
            )));
        }

        if batch * faces > 0 && (height == 0 || width == 0) {
            return Err(TexLoadError::shape("cannot sample from an empty atlas"));
        }

        Ok(SamplePlan { batch, height, width, channels, faces, texture_size })
    }

    /// Texels per face (`T³`).
    #[inline]
    pub fn texels_per_face(&self) -> usize {
        self.texture_size.pow(3)
    }

    /// Total work items (`B * F * T³`).
    #[inline]
    pub fn items(&self) -> usize {
        self.batch * self.faces * self.texels_per_face()
    }
}
