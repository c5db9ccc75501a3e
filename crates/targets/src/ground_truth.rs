use box_utils::{valid_row_indices, BoxCoords, MaskPlane, PackedRows};

/// Ground-truth instances of one image, packed to a fixed capacity.
///
/// Boxes are normalized. Masks are either full-image planes or mini-masks
/// covering only their box, as recorded by `mini_masks`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    pub class_ids: PackedRows,
    pub boxes: PackedRows,
    pub masks: PackedRows,
    pub mask_shape: (usize, usize),
    pub mini_masks: bool,
}

impl GroundTruth {
    pub fn new(capacity: usize, mask_shape: (usize, usize), mini_masks: bool) -> Self {
        Self {
            class_ids: PackedRows::new(capacity, 1),
            boxes: PackedRows::new(capacity, 4),
            masks: PackedRows::new(capacity, (mask_shape.0 * mask_shape.1).max(1)),
            mask_shape,
            mini_masks,
        }
    }

    /// Adds one instance. Returns false when full or when the mask has the
    /// wrong shape.
    pub fn push(&mut self, class_id: u32, b: BoxCoords, mask: &MaskPlane) -> bool {
        if self.boxes.is_full() || (mask.height, mask.width) != self.mask_shape {
            return false;
        }
        self.class_ids.push(&[class_id as f32]);
        self.boxes.push(&b);
        self.masks.push(&mask.data);
        true
    }

    /// Rebuild from padded batch rows, keeping the instances whose box is not
    /// a padding row.
    pub fn from_padded(
        class_ids: &[f32],
        boxes: &[f32],
        masks: &[f32],
        capacity: usize,
        mask_shape: (usize, usize),
        mini_masks: bool,
    ) -> Self {
        let mut gt = Self::new(capacity, mask_shape, mini_masks);
        let mask_len = gt.masks.row_len();
        for i in valid_row_indices(boxes, 4).into_iter().take(capacity) {
            let (Some(class), Some(mask)) = (
                class_ids.get(i),
                masks.get(i * mask_len..(i + 1) * mask_len),
            ) else {
                continue;
            };
            gt.class_ids.push(&[*class]);
            gt.boxes.push(&boxes[i * 4..i * 4 + 4]);
            gt.masks.push(mask);
        }
        gt
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.boxes.capacity()
    }

    pub fn class_id(&self, i: usize) -> u32 {
        self.class_ids.row(i).map(|r| r[0] as u32).unwrap_or(0)
    }

    pub fn mask(&self, i: usize) -> Option<MaskPlane> {
        let row = self.masks.row(i)?;
        MaskPlane::from_vec(self.mask_shape.0, self.mask_shape.1, row.to_vec())
    }
}
