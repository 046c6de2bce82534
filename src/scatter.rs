// scatter.rs — CPU texture-load kernel (reference implementation).
//
// Writes per-face texture samples into destination pixels, gated by the
// update flags. Runs in three data-parallel phases on the current rayon
// pool; phases are separated by rayon's fork-join barrier.
//
//   1. bounds  — every work item's destination coordinate is checked.
//                The lowest offending item is reported. No writes yet.
//
//   2. claim   — each ELIGIBLE item (flag != 0) claims its destination in
//                a per-pixel winner table via `fetch_max(item + 1)`.
//                Still no writes to the image.
//
//   3. resolve — each destination pixel copies all C channels of its
//                winner (if any). Pixels nobody claimed are untouched.
//
// WHY A WINNER TABLE INSTEAD OF WRITING DIRECTLY
// ───────────────────────────────────────────────
// Two items landing on the same pixel is a caller error, but it must not
// tear a pixel (channel 0 from one sample, channel 1 from another), and
// Rust does not allow unsynchronised writes to shared memory anyway.
// Resolving through one atomic word per pixel gives each pixel exactly
// one source, and `fetch_max` makes the outcome deterministic: the
// highest work-item index wins, independent of scheduling.
//
// With `check_single_writer` on, a claim that finds the slot already taken
// aborts the call with `ConflictingWriters` before phase 3 runs.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::encoding::ScatterPlan;
use crate::error::{ArgumentProblem, Result, TexLoadError};

/// Per-call knobs for the CPU scatter.
#[derive(Debug, Clone, Copy)]
pub struct ScatterOptions {
    /// Reject calls where two eligible items target the same pixel.
    pub check_single_writer: bool,
    /// Minimum work items per rayon task.
    pub min_items_per_task: usize,
}

impl Default for ScatterOptions {
    fn default() -> Self {
        ScatterOptions {
            check_single_writer: cfg!(debug_assertions),
            min_items_per_task: 1024,
        }
    }
}

/// Run the scatter on the current rayon pool.
///
/// Slices are the logical (contiguous) element ranges of the validated
/// tensors. Returns the number of destination pixels written.
pub fn scatter(
    plan: &ScatterPlan,
    image: &mut [f32],
    faces: &[i32],
    textures: &[f32],
    flags: &[i32],
    opts: ScatterOptions,
) -> Result<usize> {
    let items = plan.items();
    let channels = plan.image.channels;
    // Coordinates into an empty image are still out of range.
    check_bounds(plan, faces, opts.min_items_per_task)?;
    if items == 0 || channels == 0 || plan.image.pixels() == 0 {
        return Ok(0);
    }

    let winners = claim(plan, faces, flags, opts)?;
    let written = resolve(image, textures, &winners, channels, opts.min_items_per_task);

    log::debug!("scatter: {items} items, {written} pixels written");
    Ok(written)
}

/// Phase 1: report the lowest work item whose coordinate leaves the image.
pub fn check_bounds(plan: &ScatterPlan, faces: &[i32], min_len: usize) -> Result<()> {
    let k = plan.image.coords();
    let bad = (0..plan.items())
        .into_par_iter()
        .with_min_len(min_len.max(1))
        .find_map_first(|i| {
            plan.destination(i, &faces[i * k..(i + 1) * k])
                .err()
                .map(|(axis, value, bound)| (i, axis, value, bound))
        });
    match bad {
        Some((item, axis, value, bound)) => Err(TexLoadError::invalid(
            "faces",
            ArgumentProblem::IndexOutOfRange { item, axis, value, bound },
        )),
        None => Ok(()),
    }
}

/// Phase 2: build the winner table. Slot `p` holds `item + 1` of the
/// winning item for pixel `p`, or 0 if no eligible item targets it.
pub fn claim(
    plan: &ScatterPlan,
    faces: &[i32],
    flags: &[i32],
    opts: ScatterOptions,
) -> Result<Vec<AtomicUsize>> {
    let pixels = plan.image.pixels();
    let mut winners: Vec<AtomicUsize> = Vec::new();
    winners.try_reserve_exact(pixels).map_err(|e| {
        TexLoadError::exhausted(format!("winner table for {pixels} pixels: {e}"))
    })?;
    winners.resize_with(pixels, || AtomicUsize::new(0));

    let k = plan.image.coords();
    let claim_one = |i: usize| -> std::result::Result<(), TexLoadError> {
        // Bounds were checked in phase 1.
        let Ok(p) = plan.destination(i, &faces[i * k..(i + 1) * k]) else {
            return Ok(());
        };
        if flags[plan.flag_index(i, p)] == 0 {
            return Ok(());
        }
        let prev = winners[p].fetch_max(i + 1, Ordering::Relaxed);
        if opts.check_single_writer && prev != 0 {
            let other = prev - 1;
            log::warn!("work items {other} and {i} both target pixel {p}");
            return Err(TexLoadError::ConflictingWriters {
                pixel: p,
                first_item: other.min(i),
                second_item: other.max(i),
            });
        }
        Ok(())
    };

    (0..plan.items())
        .into_par_iter()
        .with_min_len(opts.min_items_per_task.max(1))
        .try_for_each(claim_one)?;

    Ok(winners)
}

/// Phase 3: copy each winner's channels into its pixel.
pub fn resolve(
    image: &mut [f32],
    textures: &[f32],
    winners: &[AtomicUsize],
    channels: usize,
    min_len: usize,
) -> usize {
    image
        .par_chunks_mut(channels)
        .zip(winners.par_iter())
        .with_min_len((min_len / channels).max(1))
        .map(|(pixel, slot)| match slot.load(Ordering::Relaxed) {
            0 => 0,
            w => {
                let src = (w - 1) * channels;
                pixel.copy_from_slice(&textures[src..src + channels]);
                1
            }
        })
        .sum()
}
