use box_utils::{stack_padded, PackedRows};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

/// Run `f` once per image index in parallel. Results come back in index
/// order regardless of scheduling.
pub fn map_images<T, F>(count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    (0..count).into_par_iter().map(f).collect()
}

/// RNG for the randomized steps of one image. Seeded runs derive it from
/// `seed ^ index`, so a given image samples the same way on every run.
pub fn image_rng(seed: Option<u64>, index: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ index as u64),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// Stack per-image rows into a `[items.len(), capacity, row_len]` tensor,
/// zero-padded.
pub fn rows_to_tensor<B: Backend>(
    items: &[PackedRows],
    capacity: usize,
    row_len: usize,
    device: &B::Device,
) -> Tensor<B, 3> {
    let flat = stack_padded(items, capacity, row_len);
    Tensor::<B, 3>::from_data(
        TensorData::new(flat, [items.len(), capacity, row_len]),
        device,
    )
}

/// Split a `[batch, rows, row_len]` tensor into one flat host buffer per image.
pub fn tensor_rows<B: Backend>(tensor: Tensor<B, 3>) -> Vec<Vec<f32>> {
    let [batch, rows, row_len] = tensor.dims();
    let flat = tensor.into_data().to_vec::<f32>().unwrap_or_default();
    let stride = rows * row_len;
    (0..batch)
        .map(|b| flat.get(b * stride..(b + 1) * stride).unwrap_or_default().to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    type TestBackend = burn_ndarray::NdArray<f32>;

    #[test]
    fn map_keeps_batch_order() {
        let out = map_images(64, |i| i * 2);
        assert_eq!(out, (0..64).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn seeded_rng_is_per_image() {
        let a: u64 = image_rng(Some(9), 3).random();
        let b: u64 = image_rng(Some(9), 3).random();
        let c: u64 = image_rng(Some(9), 4).random();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn tensor_round_trip_pads_rows() {
        let device = Default::default();
        let a = PackedRows::from_boxes(&[[0.1, 0.1, 0.2, 0.2]], 3);
        let b = PackedRows::new(3, 4);
        let t = rows_to_tensor::<TestBackend>(&[a.clone(), b], 3, 4, &device);
        assert_eq!(t.dims(), [2, 3, 4]);
        let rows = tensor_rows(t);
        assert_eq!(PackedRows::from_padded(&rows[0], 3, 4), a);
        assert!(rows[1].iter().all(|v| *v == 0.0));
    }
}
