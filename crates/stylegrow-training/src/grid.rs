//! Image grids for `reals.png`, `fakes_init.png` and periodic `fakes*.png` snapshots.

use crate::error::{TrainingError, TrainingResult};
use image::{GrayImage, RgbImage};
use ndarray::{Array2, Array4, ArrayView4};
use std::path::Path;

/// Grid dimensions `[width, height]` in images for square images of `resolution` pixels.
#[must_use]
pub fn grid_size_for(width: usize, height: usize) -> [usize; 2] {
    let gw = (7680 / width.max(1)).clamp(7, 32);
    let gh = (4320 / height.max(1)).clamp(4, 32);
    [gw, gh]
}

pub trait ImageGridWriter: Send {
    /// Tile `images` (NCHW, values in `drange`) row-major into a `grid_size` grid and save it.
    fn save_image_grid(
        &self,
        images: ArrayView4<'_, f32>,
        path: &Path,
        drange: [f32; 2],
        grid_size: [usize; 2],
    ) -> TrainingResult<()>;
}

/// Tile a batch into one `[C, gh * H, gw * W]` canvas. Missing cells stay at `fill`.
pub fn tile_grid(images: ArrayView4<'_, f32>, grid_size: [usize; 2], fill: f32) -> TrainingResult<Array2<f32>> {
    let (n, c, h, w) = images.dim();
    let [gw, gh] = grid_size;
    if gw == 0 || gh == 0 {
        return Err(TrainingError::Artifact("grid size must be non-zero".to_string()));
    }
    // Channels are interleaved per pixel so the canvas maps directly onto image buffers.
    let mut canvas = Array2::from_elem((gh * h, gw * w * c), fill);
    for idx in 0..n.min(gw * gh) {
        let (gx, gy) = (idx % gw, idx / gw);
        for ch in 0..c {
            for y in 0..h {
                for x in 0..w {
                    canvas[[gy * h + y, (gx * w + x) * c + ch]] = images[[idx, ch, y, x]];
                }
            }
        }
    }
    Ok(canvas)
}

/// PNG output through the `image` crate. Supports 1 (grayscale) and 3 (RGB) channels.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngGridWriter;

impl ImageGridWriter for PngGridWriter {
    fn save_image_grid(
        &self,
        images: ArrayView4<'_, f32>,
        path: &Path,
        drange: [f32; 2],
        grid_size: [usize; 2],
    ) -> TrainingResult<()> {
        let (_, c, h, w) = images.dim();
        let canvas = tile_grid(images, grid_size, drange[0])?;
        let scale = 255.0 / (drange[1] - drange[0]);
        let bytes: Vec<u8> = canvas.iter().map(|&v| ((v - drange[0]) * scale).round().clamp(0.0, 255.0) as u8).collect();

        let width = (grid_size[0] * w) as u32;
        let height = (grid_size[1] * h) as u32;
        let too_small = || TrainingError::Artifact(format!("grid buffer does not match {width}x{height}"));
        match c {
            1 => GrayImage::from_raw(width, height, bytes).ok_or_else(too_small)?.save(path)?,
            3 => RgbImage::from_raw(width, height, bytes).ok_or_else(too_small)?.save(path)?,
            other => {
                return Err(TrainingError::Unsupported(format!("cannot save {other}-channel image grid")));
            }
        }
        Ok(())
    }
}

/// Convert raw dataset images to `f32` for grid output.
#[must_use]
pub fn to_float(images: &Array4<u8>) -> Array4<f32> {
    images.mapv(f32::from)
}
