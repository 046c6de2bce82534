// layout.rs — Shape / stride metadata for n-dimensional tensors.
//
// A Layout maps a logical index (i0, i1, ..., in) to a flat element
// position in the backing storage:
//
//   pos = offset + i0 * strides[0] + i1 * strides[1] + ... + in * strides[n]
//
// Row-major "compact" strides for shape (2, 3, 4):
//
//   strides = (12, 4, 1)      — last dimension varies fastest
//
// A permuted view of the same buffer, e.g. dims (2, 0, 1), has shape
// (4, 2, 3) and strides (1, 12, 4). Same bytes, different walk, and no
// longer contiguous, so it cannot be handed to a kernel that indexes the
// buffer directly.

/// Row-major compact strides for `shape`, in elements.
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut acc = 1usize;
    for (s, &d) in strides.iter_mut().zip(shape).rev() {
        *s = acc;
        acc *= d.max(1);
    }
    strides
}

/// Shape, strides and element offset of a tensor view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
}

impl Layout {
    /// Compact row-major layout starting at element 0.
    pub fn contiguous(shape: &[usize]) -> Self {
        Layout {
            shape: shape.to_vec(),
            strides: contiguous_strides(shape),
            offset: 0,
        }
    }

    /// Arbitrary strided layout.
    ///
    /// # Panics
    /// Panics if `shape` and `strides` have different ranks.
    pub fn from_parts(shape: &[usize], strides: &[usize], offset: usize) -> Self {
        assert_eq!(
            shape.len(),
            strides.len(),
            "shape rank ({}) must equal strides rank ({})",
            shape.len(),
            strides.len(),
        );
        Layout {
            shape: shape.to_vec(),
            strides: strides.to_vec(),
            offset,
        }
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of logical elements.
    #[inline]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Smallest storage length (in elements) that covers every logical
    /// element of this view. Zero for empty tensors.
    pub fn storage_span(&self) -> usize {
        if self.numel() == 0 {
            return 0;
        }
        let last: usize = self
            .shape
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| (d - 1) * s)
            .sum();
        self.offset + last + 1
    }

    /// True when the elements appear in row-major order with no gaps,
    /// starting at element 0 of the storage.
    ///
    /// Dimensions of extent 1 never move the index, so their stride is
    /// ignored. Empty tensors are trivially contiguous.
    pub fn is_contiguous(&self) -> bool {
        if self.numel() == 0 {
            return true;
        }
        if self.offset != 0 {
            return false;
        }
        let mut expected = 1usize;
        for (&d, &s) in self.shape.iter().zip(&self.strides).rev() {
            if d != 1 && s != expected {
                return false;
            }
            expected *= d;
        }
        true
    }

    /// Flat storage position of a logical index.
    ///
    /// # Panics
    /// Panics if the rank differs or any coordinate is out of bounds.
    #[inline]
    pub fn position(&self, index: &[usize]) -> usize {
        assert_eq!(
            index.len(),
            self.shape.len(),
            "index rank {} does not match tensor rank {}",
            index.len(),
            self.shape.len(),
        );
        let mut pos = self.offset;
        for (axis, ((&i, &d), &s)) in index.iter().zip(&self.shape).zip(&self.strides).enumerate() {
            assert!(i < d, "index {i} out of bounds for axis {axis} with extent {d}");
            pos += i * s;
        }
        pos
    }

    /// Reorder dimensions. `dims[k]` names the source axis that becomes axis `k`.
    ///
    /// # Panics
    /// Panics if `dims` is not a permutation of `0..rank`.
    pub fn permute(&self, dims: &[usize]) -> Layout {
        let rank = self.rank();
        assert_eq!(dims.len(), rank, "permutation {dims:?} has wrong rank for {rank}-d tensor");
        let mut seen = vec![false; rank];
        for &d in dims {
            assert!(d < rank && !seen[d], "{dims:?} is not a permutation of 0..{rank}");
            seen[d] = true;
        }
        Layout {
            shape: dims.iter().map(|&d| self.shape[d]).collect(),
            strides: dims.iter().map(|&d| self.strides[d]).collect(),
            offset: self.offset,
        }
    }

    /// Iterate storage positions in logical row-major order.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        let n = self.numel();
        (0..n).map(move |mut flat| {
            let mut pos = self.offset;
            for (&d, &s) in self.shape.iter().zip(&self.strides).rev() {
                pos += (flat % d) * s;
                flat /= d;
            }
            pos
        })
    }
}

/// Right-aligned (numpy-style) broadcast of `shape` onto `target`.
///
/// Returns the strides to use when walking `target` with a buffer laid out
/// contiguously as `shape`: broadcast dimensions get stride 0. Returns
/// `None` if `shape` cannot broadcast to `target`.
pub fn broadcast_strides(shape: &[usize], target: &[usize]) -> Option<Vec<usize>> {
    if shape.len() > target.len() {
        return None;
    }
    let src_strides = contiguous_strides(shape);
    let lead = target.len() - shape.len();
    let mut out = vec![0usize; target.len()];
    for (k, (&d, &s)) in shape.iter().zip(&src_strides).enumerate() {
        let t = target[lead + k];
        if d == t {
            out[lead + k] = if d == 1 { 0 } else { s };
        } else if d == 1 {
            out[lead + k] = 0;
        } else {
            return None;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[5]), vec![1]);
        assert!(contiguous_strides(&[]).is_empty());
    }

    #[test]
    fn test_contiguous_layout_is_contiguous() {
        let l = Layout::contiguous(&[1, 1, 2, 2, 3]);
        assert!(l.is_contiguous());
        assert_eq!(l.numel(), 12);
        assert_eq!(l.storage_span(), 12);
    }

    #[test]
    fn test_permute_breaks_contiguity() {
        let l = Layout::contiguous(&[2, 3]).permute(&[1, 0]);
        assert_eq!(l.shape(), &[3, 2]);
        assert_eq!(l.strides(), &[1, 3]);
        assert!(!l.is_contiguous());
    }

    #[test]
    fn test_unit_dims_ignore_stride() {
        // Size-1 axes may carry any stride without affecting contiguity.
        let l = Layout::from_parts(&[1, 4], &[99, 1], 0);
        assert!(l.is_contiguous());
    }

    #[test]
    fn test_offset_is_not_contiguous() {
        let l = Layout::from_parts(&[4], &[1], 2);
        assert!(!l.is_contiguous());
        assert_eq!(l.storage_span(), 6);
    }

    #[test]
    fn test_padded_rows_not_contiguous() {
        // Width 3, row stride 4 — the padded-image case.
        let l = Layout::from_parts(&[2, 3], &[4, 1], 0);
        assert!(!l.is_contiguous());
        let pos: Vec<usize> = l.positions().collect();
        assert_eq!(pos, vec![0, 1, 2, 4, 5, 6]);
    }

    #[test]
    fn test_position() {
        let l = Layout::contiguous(&[2, 3, 4]);
        assert_eq!(l.position(&[1, 2, 3]), 23);
        let t = l.permute(&[2, 0, 1]);
        assert_eq!(t.position(&[3, 1, 2]), 23);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_position_out_of_bounds_panics() {
        Layout::contiguous(&[2, 2]).position(&[2, 0]);
    }

    #[test]
    fn test_broadcast_strides() {
        // (H, W) onto (B, L, H, W)
        assert_eq!(broadcast_strides(&[2, 3], &[4, 1, 2, 3]), Some(vec![0, 0, 3, 1]));
        // Size-1 axis broadcasts.
        assert_eq!(broadcast_strides(&[1, 3], &[2, 3]), Some(vec![0, 1]));
        // Incompatible.
        assert_eq!(broadcast_strides(&[2, 4], &[2, 3]), None);
        // Too many dims.
        assert_eq!(broadcast_strides(&[1, 2, 3], &[2, 3]), None);
    }
}
