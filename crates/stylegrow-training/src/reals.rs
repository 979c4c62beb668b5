//! Just-in-time processing of real training images before they reach the networks.
//!
//! Batches are NCHW. The order of the steps matters: range remap, mirror,
//! fade between levels of detail, then upscale to the networks' fixed input size.

use crate::error::{TrainingError, TrainingResult};
use ndarray::{s, Array4, ArrayView4, Zip};
use rand::Rng;

/// Linearly remap values from `drange_in` to `drange_out`.
pub fn adjust_dynamic_range(x: &mut Array4<f32>, drange_in: [f32; 2], drange_out: [f32; 2]) {
    if drange_in == drange_out {
        return;
    }
    let scale = (drange_out[1] - drange_out[0]) / (drange_in[1] - drange_in[0]);
    let bias = drange_out[0] - drange_in[0] * scale;
    x.mapv_inplace(|v| v * scale + bias);
}

/// Flip each sample horizontally with probability 0.5, independently.
pub fn mirror_augment<R: Rng + ?Sized>(x: &mut Array4<f32>, rng: &mut R) {
    for mut sample in x.outer_iter_mut() {
        if !rng.gen_bool(0.5) {
            continue;
        }
        let flipped = sample.slice(s![.., .., ..;-1]).to_owned();
        sample.assign(&flipped);
    }
}

/// 2x2 block mean followed by nearest-neighbour upsampling back to the input size.
pub fn blur_2x(x: &Array4<f32>) -> TrainingResult<Array4<f32>> {
    let (_, _, h, w) = x.dim();
    if h % 2 != 0 || w % 2 != 0 {
        return Err(TrainingError::Dataset(format!("cannot fade odd-sized images ({h}x{w})")));
    }
    Ok(Array4::from_shape_fn(x.raw_dim(), |(n, c, i, j)| {
        let (i0, j0) = (i & !1, j & !1);
        (x[[n, c, i0, j0]] + x[[n, c, i0 + 1, j0]] + x[[n, c, i0, j0 + 1]] + x[[n, c, i0 + 1, j0 + 1]]) * 0.25
    }))
}

/// Smooth crossfade between consecutive levels of detail: `lerp(x, blur_2x(x), frac(lod))`.
pub fn fade_lod(x: Array4<f32>, lod: f64) -> TrainingResult<Array4<f32>> {
    let t = (lod - lod.floor()) as f32;
    if t == 0.0 {
        return Ok(x);
    }
    let blurred = blur_2x(&x)?;
    let mut x = x;
    Zip::from(&mut x).and(&blurred).for_each(|a, &b| *a += (b - *a) * t);
    Ok(x)
}

/// Replicate every pixel `2^floor(lod)` times along both spatial axes.
#[must_use]
pub fn upscale_lod(x: Array4<f32>, lod: f64) -> Array4<f32> {
    let factor = 1usize << (lod.max(0.0).floor() as u32);
    if factor == 1 {
        return x;
    }
    let (n, c, h, w) = x.dim();
    Array4::from_shape_fn((n, c, h * factor, w * factor), |(b, ch, i, j)| x[[b, ch, i / factor, j / factor]])
}

/// Full real-image pipeline.
pub fn process_reals<A, R>(
    batch: ArrayView4<'_, A>,
    lod: f64,
    mirror: bool,
    drange_data: [f32; 2],
    drange_net: [f32; 2],
    rng: &mut R,
) -> TrainingResult<Array4<f32>>
where
    A: Copy + Into<f32>,
    R: Rng + ?Sized,
{
    let mut x: Array4<f32> = batch.mapv(Into::into);
    adjust_dynamic_range(&mut x, drange_data, drange_net);
    if mirror {
        mirror_augment(&mut x, rng);
    }
    let x = fade_lod(x, lod)?;
    Ok(upscale_lod(x, lod))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ramp(n: usize, c: usize, h: usize, w: usize) -> Array4<u8> {
        Array4::from_shape_fn((n, c, h, w), |(b, ch, i, j)| ((b * 53 + ch * 17 + i * 7 + j * 3) % 256) as u8)
    }

    #[test]
    fn test_adjust_dynamic_range() {
        let mut x = Array4::from_shape_vec((1, 1, 1, 3), vec![0.0, 127.5, 255.0]).unwrap();
        adjust_dynamic_range(&mut x, [0.0, 255.0], [-1.0, 1.0]);
        let v = x.as_slice().unwrap();
        assert!((v[0] + 1.0).abs() < 1e-6);
        assert!(v[1].abs() < 1e-6);
        assert!((v[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_lod_zero_is_plain_range_remap() {
        let raw = ramp(2, 3, 4, 4);
        let mut rng = StdRng::seed_from_u64(7);
        let out = process_reals(raw.view(), 0.0, false, [0.0, 255.0], [-1.0, 1.0], &mut rng).unwrap();

        let mut expected = raw.mapv(f32::from);
        adjust_dynamic_range(&mut expected, [0.0, 255.0], [-1.0, 1.0]);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_lod_half_is_exact_blend_with_blur() {
        let raw = ramp(1, 2, 4, 6);
        let mut rng = StdRng::seed_from_u64(7);
        let out = process_reals(raw.view(), 0.5, false, [0.0, 255.0], [0.0, 255.0], &mut rng).unwrap();

        let x = raw.mapv(f32::from);
        let y = blur_2x(&x).unwrap();
        for ((a, b), o) in x.iter().zip(y.iter()).zip(out.iter()) {
            assert!((o - (a + (b - a) * 0.5)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_blur_replicates_block_means() {
        let x = Array4::from_shape_vec((1, 1, 2, 2), vec![0.0, 4.0, 8.0, 12.0]).unwrap();
        let y = blur_2x(&x).unwrap();
        assert!(y.iter().all(|v| (*v - 6.0).abs() < 1e-6));
        assert!(blur_2x(&Array4::zeros((1, 1, 3, 2))).is_err());
    }

    #[test]
    fn test_upscale_lod_replicates_pixels() {
        let x = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = upscale_lod(x, 2.0);
        assert_eq!(y.dim(), (1, 1, 8, 8));
        assert_eq!(y[[0, 0, 0, 0]], 1.0);
        assert_eq!(y[[0, 0, 3, 3]], 1.0);
        assert_eq!(y[[0, 0, 0, 4]], 2.0);
        assert_eq!(y[[0, 0, 7, 7]], 4.0);
    }

    #[test]
    fn test_mirror_only_flips_width() {
        let raw = ramp(16, 1, 2, 4);
        let mut rng = StdRng::seed_from_u64(3);
        let out = process_reals(raw.view(), 0.0, true, [0.0, 255.0], [0.0, 255.0], &mut rng).unwrap();
        let x = raw.mapv(f32::from);

        let mut flipped_any = false;
        for (orig, got) in x.outer_iter().zip(out.outer_iter()) {
            if orig == got {
                continue;
            }
            flipped_any = true;
            assert_eq!(orig.slice(s![.., .., ..;-1]), got);
        }
        assert!(flipped_any);
    }
}
