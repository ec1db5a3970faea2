//! Binary morphology on [`Mask`]s.
//!
//! Dilation and erosion go through `imageproc`'s grayscale operators, which on a 0/255
//! buffer are exactly binary dilation and erosion. Neighbours outside the image are
//! ignored, so erosion never eats into the mask from the image border.

use std::collections::VecDeque;

use image::{GrayImage, Luma};
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask as StructuringElement};

use crate::mask::Mask;

/// Threshold used after any filter that produces intermediate values.
const REBINARIZE_THRESHOLD: u8 = 127;

/// Elliptical structuring element of `size`x`size`, built the way
/// `getStructuringElement(MORPH_ELLIPSE)` does it. Even sizes are rounded up to the next
/// odd size so the element stays centred.
pub fn ellipse_kernel(size: u32) -> StructuringElement {
    let size = (size.max(1) | 1).min(511);
    let radius = size / 2;
    let mut element = GrayImage::new(size, size);

    for row in 0..size {
        let dy = row as i64 - radius as i64;
        let dx = if radius == 0 {
            0
        } else {
            let r2 = (radius * radius) as f64;
            (radius as f64 * (((r2 - (dy * dy) as f64) / r2).max(0.0)).sqrt()).round() as u32
        };
        let from = radius.saturating_sub(dx);
        let to = (radius + dx).min(size - 1);
        for col in from..=to {
            element.put_pixel(col, row, Luma([255]));
        }
    }

    StructuringElement::from_image(&element, radius as u8, radius as u8)
}

pub fn dilate(mask: &Mask, kernel: &StructuringElement, iterations: u32) -> Mask {
    let mut gray = mask.as_gray().clone();
    for _ in 0..iterations {
        gray = grayscale_dilate(&gray, kernel);
    }
    Mask::from_gray_owned(gray, REBINARIZE_THRESHOLD)
}

pub fn erode(mask: &Mask, kernel: &StructuringElement, iterations: u32) -> Mask {
    let mut gray = mask.as_gray().clone();
    for _ in 0..iterations {
        gray = grayscale_erode(&gray, kernel);
    }
    Mask::from_gray_owned(gray, REBINARIZE_THRESHOLD)
}

/// Dilate `iterations` times, then erode `iterations` times.
pub fn close(mask: &Mask, kernel: &StructuringElement, iterations: u32) -> Mask {
    erode(&dilate(mask, kernel, iterations), kernel, iterations)
}

/// Erode `iterations` times, then dilate `iterations` times.
pub fn open(mask: &Mask, kernel: &StructuringElement, iterations: u32) -> Mask {
    dilate(&erode(mask, kernel, iterations), kernel, iterations)
}

/// Median filter with a `kernel_size`x`kernel_size` window, optionally followed by a
/// Gaussian blur, then re-binarized.
pub fn smooth(mask: &Mask, median_kernel: u32, gaussian_sigma: Option<f32>) -> Mask {
    let radius = median_kernel / 2;
    let mut gray = if radius > 0 {
        median_filter(mask.as_gray(), radius, radius)
    } else {
        mask.as_gray().clone()
    };

    if let Some(sigma) = gaussian_sigma.filter(|s| *s > 0.0) {
        gray = gaussian_blur_f32(&gray, sigma);
    }

    Mask::from_gray_owned(gray, REBINARIZE_THRESHOLD)
}

/// Close interior holes.
///
/// The complement is flood-filled (4-connected) from the four corners to find the
/// background connected to the outside; everything else is foreground. When no corner
/// is background, every background pixel on the image border seeds the fill.
pub fn fill_holes(mask: &Mask) -> Mask {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return mask.clone();
    }

    let corners = [
        (0, 0),
        (width - 1, 0),
        (0, height - 1),
        (width - 1, height - 1),
    ];
    let mut seeds: Vec<(u32, u32)> = corners
        .into_iter()
        .filter(|&(x, y)| !mask.get(x, y))
        .collect();

    if seeds.is_empty() {
        seeds = border_pixels(width, height)
            .filter(|&(x, y)| !mask.get(x, y))
            .collect();
    }

    let exterior = flood_background(mask, &seeds);
    Mask::from_fn(width, height, |x, y| {
        !exterior[(y as usize) * (width as usize) + x as usize]
    })
}

fn border_pixels(width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    let horizontal = (0..width).flat_map(move |x| [(x, 0), (x, height - 1)]);
    let vertical = (0..height).flat_map(move |y| [(0, y), (width - 1, y)]);
    horizontal.chain(vertical)
}

/// Background pixels reachable from `seeds` without crossing the mask.
fn flood_background(mask: &Mask, seeds: &[(u32, u32)]) -> Vec<bool> {
    let (width, height) = mask.dimensions();
    let index = |x: u32, y: u32| (y as usize) * (width as usize) + x as usize;
    let mut visited = vec![false; (width as usize) * (height as usize)];
    let mut queue = VecDeque::new();

    for &(x, y) in seeds {
        if !visited[index(x, y)] {
            visited[index(x, y)] = true;
            queue.push_back((x, y));
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        let neighbours = [
            (x.checked_sub(1), Some(y)),
            ((x + 1 < width).then_some(x + 1), Some(y)),
            (Some(x), y.checked_sub(1)),
            (Some(x), (y + 1 < height).then_some(y + 1)),
        ];
        for (nx, ny) in neighbours {
            let (Some(nx), Some(ny)) = (nx, ny) else {
                continue;
            };
            let i = index(nx, ny);
            if !visited[i] && !mask.get(nx, ny) {
                visited[i] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    visited
}
