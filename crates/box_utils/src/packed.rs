//! Fixed-capacity row buffers for ragged per-image data.
//!
//! Every variable-length set in the pipeline (ground truth, proposals,
//! sampled ROIs, detections) is carried as a [`PackedRows`]: up to `capacity`
//! rows of `row_len` values plus an explicit count of valid rows. Batching
//! pads each image to `capacity` with zero rows; reading a padded buffer back
//! keeps only rows that fail [`is_padding_row`].

use crate::boxes::BoxCoords;

/// The one predicate for padding: a row whose values are all zero.
pub fn is_padding_row(row: &[f32]) -> bool {
    row.iter().all(|v| *v == 0.0)
}

/// Indices of the non-padding rows of a flat padded buffer.
pub fn valid_row_indices(flat: &[f32], row_len: usize) -> Vec<usize> {
    if row_len == 0 {
        return Vec::new();
    }
    flat.chunks_exact(row_len)
        .enumerate()
        .filter(|(_, row)| !is_padding_row(row))
        .map(|(i, _)| i)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackedRows {
    data: Vec<f32>,
    row_len: usize,
    capacity: usize,
}

impl PackedRows {
    pub fn new(capacity: usize, row_len: usize) -> Self {
        assert!(row_len > 0, "PackedRows needs a non-zero row length");
        Self {
            data: Vec::with_capacity(capacity * row_len),
            row_len,
            capacity,
        }
    }

    /// Collect rows until `capacity` is reached; extra rows are dropped.
    pub fn from_rows<R, I>(rows: I, capacity: usize, row_len: usize) -> Self
    where
        R: AsRef<[f32]>,
        I: IntoIterator<Item = R>,
    {
        let mut packed = Self::new(capacity, row_len);
        for row in rows {
            if !packed.push(row.as_ref()) {
                break;
            }
        }
        packed
    }

    pub fn from_boxes(boxes: &[BoxCoords], capacity: usize) -> Self {
        Self::from_rows(boxes.iter(), capacity, 4)
    }

    /// Read back the first `capacity` rows of a padded buffer, keeping only
    /// non-padding rows.
    pub fn from_padded(flat: &[f32], capacity: usize, row_len: usize) -> Self {
        let mut packed = Self::new(capacity, row_len);
        for row in flat.chunks_exact(row_len).take(capacity) {
            if !is_padding_row(row) {
                packed.push(row);
            }
        }
        packed
    }

    /// Appends a row. Returns false, leaving the buffer unchanged, when full.
    pub fn push(&mut self, row: &[f32]) -> bool {
        assert_eq!(row.len(), self.row_len, "row length mismatch");
        if self.is_full() {
            return false;
        }
        self.data.extend_from_slice(row);
        true
    }

    /// Rows at `indices`, in that order, with the same capacity.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut out = Self::new(self.capacity, self.row_len);
        for &i in indices {
            if let Some(row) = self.row(i) {
                out.push(row);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.row_len
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn row_len(&self) -> usize {
        self.row_len
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.row_len)?;
        self.data.get(start..start + self.row_len)
    }

    /// Valid rows only.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.row_len)
    }

    /// Valid rows as boxes; rows shorter than four values are zero-filled.
    pub fn boxes(&self) -> Vec<BoxCoords> {
        self.rows()
            .map(|r| {
                let mut b = [0.0; 4];
                for (dst, src) in b.iter_mut().zip(r) {
                    *dst = *src;
                }
                b
            })
            .collect()
    }

    /// Valid rows, flattened, without padding.
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// `capacity * row_len` values, zero beyond the valid rows.
    pub fn padded(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.capacity * self.row_len];
        out[..self.data.len()].copy_from_slice(&self.data);
        out
    }
}

/// Stack images into one `[items.len(), capacity, row_len]` buffer, padding
/// each with zero rows and dropping rows beyond `capacity`.
pub fn stack_padded(items: &[PackedRows], capacity: usize, row_len: usize) -> Vec<f32> {
    let stride = capacity * row_len;
    let mut out = vec![0.0; items.len() * stride];
    for (slot, item) in out.chunks_exact_mut(stride.max(1)).zip(items) {
        debug_assert_eq!(item.row_len(), row_len);
        let n = item.as_flat().len().min(stride);
        slot[..n].copy_from_slice(&item.as_flat()[..n]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_stops_at_capacity() {
        let mut p = PackedRows::new(2, 4);
        assert!(p.push(&[1.0, 1.0, 2.0, 2.0]));
        assert!(p.push(&[0.0, 0.0, 1.0, 1.0]));
        assert!(!p.push(&[3.0, 3.0, 4.0, 4.0]));
        assert_eq!(p.len(), 2);
        assert!(p.is_full());
    }

    #[test]
    fn padded_round_trip_drops_zero_rows() {
        let p = PackedRows::from_boxes(&[[0.1, 0.1, 0.2, 0.2], [0.3, 0.3, 0.5, 0.5]], 4);
        let flat = p.padded();
        assert_eq!(flat.len(), 16);
        assert!(is_padding_row(&flat[8..12]));
        let back = PackedRows::from_padded(&flat, 4, 4);
        assert_eq!(back, p);
        assert_eq!(valid_row_indices(&flat, 4), vec![0, 1]);
    }

    #[test]
    fn from_padded_skips_interior_padding() {
        let flat = [1.0, 0.0, 0.0, 2.0];
        let back = PackedRows::from_padded(&flat, 4, 1);
        assert_eq!(back.as_flat(), &[1.0, 2.0]);
        assert_eq!(valid_row_indices(&flat, 1), vec![0, 3]);
    }

    #[test]
    fn stack_pads_each_image() {
        let a = PackedRows::from_rows([[1.0f32, 2.0]], 3, 2);
        let b = PackedRows::new(3, 2);
        let stacked = stack_padded(&[a, b], 3, 2);
        assert_eq!(stacked.len(), 12);
        assert_eq!(&stacked[..2], &[1.0, 2.0]);
        assert!(stacked[2..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn select_keeps_capacity() {
        let p = PackedRows::from_rows([[1.0f32], [2.0], [3.0]], 5, 1);
        let s = p.select(&[2, 0, 9]);
        assert_eq!(s.as_flat(), &[3.0, 1.0]);
        assert_eq!(s.capacity(), 5);
    }
}
