// sample.rs — CPU texture-atlas sampling (the gather half of texture loading).
//
// Each face carries a T×T×T cube of texels. Texel (i, j, k) sits at the
// barycentric point (i, j, k) / (T - 1) of the face's UV triangle; its
// colour is read from the atlas at that point.
//
//   weights  w = (i, j, k) / (T - 1), normalised so Σw = 1 (when Σw > 0)
//            T == 1 uses the centroid (⅓, ⅓, ⅓)
//
//   uv       (u, v) = Σ w_v · uv_v
//   pixel    x = u · (W - 1),  y = v · (H - 1),  clamped into the atlas
//
// Bilinear blends the four texels around (x, y); the +1 neighbour is
// clamped at the right/bottom edge. Nearest rounds to the closest texel.
//
// Parallelism is one rayon task per face cube: faces are disjoint slices of
// `textures`, so no synchronisation is needed.

use rayon::prelude::*;

use crate::encoding::SamplePlan;

/// Atlas filtering used when sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleMode {
    #[default]
    Bilinear,
    Nearest,
}

impl SampleMode {
    /// Numeric code understood by the WGSL kernel.
    pub(crate) fn code(self) -> u32 {
        match self {
            SampleMode::Bilinear => 0,
            SampleMode::Nearest => 1,
        }
    }
}

/// Barycentric weights of texel `(i, j, k)` in a cube of edge `t`.
#[inline]
pub fn barycentric(i: usize, j: usize, k: usize, t: usize) -> [f32; 3] {
    if t <= 1 {
        return [1.0 / 3.0; 3];
    }
    let d = (t - 1) as f32;
    let w = [i as f32 / d, j as f32 / d, k as f32 / d];
    let sum = w[0] + w[1] + w[2];
    if sum > 0.0 {
        [w[0] / sum, w[1] / sum, w[2] / sum]
    } else {
        w
    }
}

/// Read one atlas location into `out` (length C).
///
/// `atlas` is one batch element, `(H, W, C)` row-major. `x`/`y` are in
/// pixel units and clamped here.
#[inline]
fn read_atlas(atlas: &[f32], height: usize, width: usize, x: f32, y: f32, mode: SampleMode, out: &mut [f32]) {
    let c = out.len();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);
    let at = |row: usize, col: usize| &atlas[(row * width + col) * c..(row * width + col + 1) * c];

    match mode {
        SampleMode::Nearest => {
            // Round half up; matches floor(x + 0.5) in the WGSL kernel.
            let col = ((x + 0.5).floor() as usize).min(width - 1);
            let row = ((y + 0.5).floor() as usize).min(height - 1);
            out.copy_from_slice(at(row, col));
        }
        SampleMode::Bilinear => {
            let x0 = x.floor() as usize;
            let y0 = y.floor() as usize;
            let x1 = (x0 + 1).min(width - 1);
            let y1 = (y0 + 1).min(height - 1);
            let fx = x - x0 as f32;
            let fy = y - y0 as f32;
            let (p00, p01, p10, p11) = (at(y0, x0), at(y0, x1), at(y1, x0), at(y1, x1));
            for ch in 0..c {
                let top = p00[ch] * (1.0 - fx) + p01[ch] * fx;
                let bottom = p10[ch] * (1.0 - fx) + p11[ch] * fx;
                out[ch] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }
}

/// Fill every enabled face's texel cube from the atlas.
///
/// Slices are the logical element ranges of the validated tensors.
/// Returns the number of faces sampled.
pub fn sample(
    plan: &SamplePlan,
    atlas: &[f32],
    uv_faces: &[f32],
    textures: &mut [f32],
    flags: &[i32],
    mode: SampleMode,
    min_items_per_task: usize,
) -> usize {
    let t = plan.texture_size;
    let c = plan.channels;
    let cube = plan.texels_per_face() * c;
    if plan.items() == 0 || cube == 0 {
        return 0;
    }
    let atlas_len = plan.height * plan.width * c;
    let min_faces = (min_items_per_task / plan.texels_per_face()).max(1);

    let sampled = textures
        .par_chunks_mut(cube)
        .enumerate()
        .with_min_len(min_faces)
        .map(|(face, texels)| {
            if flags[face] == 0 {
                return 0;
            }
            let b = face / plan.faces;
            let atlas_b = &atlas[b * atlas_len..(b + 1) * atlas_len];
            let uv = &uv_faces[face * 6..face * 6 + 6];

            for (n, out) in texels.chunks_exact_mut(c).enumerate() {
                let (i, j, k) = (n / (t * t), (n / t) % t, n % t);
                let w = barycentric(i, j, k, t);
                let u = w[0] * uv[0] + w[1] * uv[2] + w[2] * uv[4];
                let v = w[0] * uv[1] + w[1] * uv[3] + w[2] * uv[5];
                let x = u * (plan.width - 1) as f32;
                let y = v * (plan.height - 1) as f32;
                read_atlas(atlas_b, plan.height, plan.width, x, y, mode, out);
            }
            1
        })
        .sum();

    log::debug!("sample: {sampled}/{} faces, T = {t}, {mode:?}", plan.batch * plan.faces);
    sampled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use approx::assert_abs_diff_eq;

    fn plan(atlas: &[usize], uv: &[usize], tex: &[usize], flags: &[usize]) -> SamplePlan {
        SamplePlan::new(
            &Layout::contiguous(atlas),
            &Layout::contiguous(uv),
            &Layout::contiguous(tex),
            &Layout::contiguous(flags),
        )
        .unwrap()
    }

    #[test]
    fn test_barycentric_weights() {
        assert_eq!(barycentric(0, 0, 0, 1), [1.0 / 3.0; 3]);
        assert_eq!(barycentric(0, 0, 0, 4), [0.0; 3]);
        assert_eq!(barycentric(3, 0, 0, 4), [1.0, 0.0, 0.0]);
        let w = barycentric(1, 1, 2, 3);
        assert_abs_diff_eq!(w[0] + w[1] + w[2], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(w[2], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_constant_atlas_gives_constant_cube() {
        let p = plan(&[4, 4, 2], &[1, 3, 2], &[1, 3, 3, 3, 2], &[1]);
        let atlas: Vec<f32> = [0.25, 0.75].repeat(16);
        let uv = [0.1, 0.2, 0.9, 0.3, 0.4, 0.8];
        let mut tex = vec![0.0f32; 27 * 2];
        assert_eq!(sample(&p, &atlas, &uv, &mut tex, &[1], SampleMode::Bilinear, 1), 1);
        for px in tex.chunks_exact(2) {
            assert_abs_diff_eq!(px[0], 0.25, epsilon = 1e-6);
            assert_abs_diff_eq!(px[1], 0.75, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_nearest_corner_reads_exact_texel() {
        // 2×3 atlas, value = 10 * row + col.
        let p = plan(&[2, 3, 1], &[1, 3, 2], &[1, 2, 2, 2, 1], &[1]);
        let atlas = [0.0, 1.0, 2.0, 10.0, 11.0, 12.0];
        // vertex 0 at (u=1, v=0), vertex 1 at (0, 1), vertex 2 at (0.5, 1).
        let uv = [1.0, 0.0, 0.0, 1.0, 0.5, 1.0];
        let mut tex = vec![-1.0f32; 8];
        sample(&p, &atlas, &uv, &mut tex, &[1], SampleMode::Nearest, 1);
        // texel (1,0,0) → vertex 0 → (x=2, y=0)
        assert_eq!(tex[4], 2.0);
        // texel (0,1,0) → vertex 1 → (x=0, y=1)
        assert_eq!(tex[2], 10.0);
        // texel (0,0,0) has zero weights → (0, 0)
        assert_eq!(tex[0], 0.0);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let p = plan(&[1, 2, 1], &[1, 3, 2], &[1, 1, 1, 1, 1], &[1]);
        let atlas = [0.0, 1.0];
        // Centroid of three identical vertices at u = 0.5.
        let uv = [0.5, 0.0, 0.5, 0.0, 0.5, 0.0];
        let mut tex = vec![0.0f32; 1];
        sample(&p, &atlas, &uv, &mut tex, &[1], SampleMode::Bilinear, 1);
        assert_abs_diff_eq!(tex[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_gated_face_untouched() {
        let p = plan(&[2, 2, 1], &[2, 3, 2], &[2, 1, 1, 1, 1], &[2]);
        let atlas = [3.0; 4];
        let uv = [0.0; 12];
        let mut tex = vec![-7.0f32; 2];
        let n = sample(&p, &atlas, &uv, &mut tex, &[0, 1], SampleMode::Bilinear, 1);
        assert_eq!(n, 1);
        assert_eq!(tex, vec![-7.0, 3.0]);
    }

    #[test]
    fn test_batched_faces_read_their_own_atlas() {
        let p = plan(&[2, 1, 1, 1], &[2, 1, 3, 2], &[2, 1, 1, 1, 1, 1], &[2, 1]);
        let atlas = [4.0, 9.0];
        let uv = [0.0; 12];
        let mut tex = vec![0.0f32; 2];
        sample(&p, &atlas, &uv, &mut tex, &[1, 1], SampleMode::Nearest, 1);
        assert_eq!(tex, vec![4.0, 9.0]);
    }
}
