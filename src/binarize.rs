//! Normalization of arbitrary decoded mask arrays into a canonical [`Mask`].
//!
//! Decoding first settles the array's shape into `(height, width, channels)` with a
//! [`MaskLayout`] tag, then applies exactly one conversion rule per layout before
//! thresholding. Shapes that cannot be settled are an `InvalidMaskShape` error.

use image::{DynamicImage, GrayImage};
use ndarray::{ArrayD, ArrayView3, ArrayViewD, IxDyn};
use tracing::debug;

use crate::errors::{Result, SegError};
use crate::mask::Mask;

/// Raw decoded mask data in row-major, channels-last order.
pub type RawMask = ArrayD<u8>;

/// Default foreground threshold on the 0–255 scale.
pub const DEFAULT_THRESHOLD: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskLayout {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
}

impl MaskLayout {
    const fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            1 => Some(Self::Gray),
            2 => Some(Self::GrayAlpha),
            3 => Some(Self::Rgb),
            4 => Some(Self::Rgba),
            _ => None,
        }
    }

    pub const fn channels(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::GrayAlpha => 2,
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

/// Settled interpretation of a raw array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskShape {
    pub height: usize,
    pub width: usize,
    pub layout: MaskLayout,
    /// Data is planar `CxHxW` rather than interleaved `HxWxC`.
    pub channels_first: bool,
}

/// Converts raw mask arrays to binary masks.
#[derive(Debug, Clone, Copy)]
pub struct MaskBinarizer {
    threshold: u8,
    /// `(height, width)` of the companion image, used to infer shapes of flattened or
    /// higher-rank input.
    expected: Option<(usize, usize)>,
}

impl Default for MaskBinarizer {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl MaskBinarizer {
    pub const fn new(threshold: u8) -> Self {
        Self {
            threshold,
            expected: None,
        }
    }

    pub const fn with_expected_size(mut self, width: u32, height: u32) -> Self {
        self.expected = Some((height as usize, width as usize));
        self
    }

    pub fn binarize(&self, raw: &RawMask) -> Result<Mask> {
        self.binarize_view(raw.view())
    }

    pub fn binarize_view(&self, raw: ArrayViewD<'_, u8>) -> Result<Mask> {
        let shape = classify(raw.shape(), self.expected)?;
        debug!(
            input_shape = ?raw.shape(),
            layout = ?shape.layout,
            channels_first = shape.channels_first,
            width = shape.width,
            height = shape.height,
            "classified mask input"
        );

        let data = raw.as_standard_layout();
        let flat = data
            .as_slice()
            .ok_or_else(|| SegError::internal("マスク二値化", "non-contiguous mask data"))?;

        let gray = if shape.channels_first {
            let planar = ArrayView3::from_shape(
                (shape.layout.channels(), shape.height, shape.width),
                flat,
            )?;
            let interleaved = planar.permuted_axes([1, 2, 0]);
            let interleaved = interleaved.as_standard_layout();
            let values = interleaved.as_slice().ok_or_else(|| {
                SegError::internal("マスク二値化", "non-contiguous mask data")
            })?;
            to_luma(values, &shape)?
        } else {
            to_luma(flat, &shape)?
        };

        Ok(Mask::from_gray_owned(gray, self.threshold))
    }
}

/// Settle an arbitrary array shape into `(height, width, layout)`.
pub fn classify(shape: &[usize], expected: Option<(usize, usize)>) -> Result<MaskShape> {
    match *shape {
        [height, width] => settled(shape, height, width, MaskLayout::Gray, false),
        [a, b, c] => {
            let last = MaskLayout::from_channels(c).map(|layout| (a, b, layout, false));
            let first = MaskLayout::from_channels(a).map(|layout| (b, c, layout, true));
            // a reading that matches the companion image wins, otherwise channels-last
            let reading = [last, first]
                .into_iter()
                .flatten()
                .find(|&(height, width, ..)| expected == Some((height, width)))
                .or(last)
                .or(first);
            match reading {
                Some((height, width, layout, channels_first)) => {
                    settled(shape, height, width, layout, channels_first)
                }
                None => infer(shape, expected),
            }
        }
        _ => infer(shape, expected),
    }
}

fn settled(
    shape: &[usize],
    height: usize,
    width: usize,
    layout: MaskLayout,
    channels_first: bool,
) -> Result<MaskShape> {
    if height == 0 || width == 0 {
        return Err(SegError::invalid_shape(shape, "mask has a zero-sized dimension"));
    }
    Ok(MaskShape {
        height,
        width,
        layout,
        channels_first,
    })
}

/// Shape inference for everything that is not already `HxW`, `HxWxC` or `CxHxW`.
fn infer(shape: &[usize], expected: Option<(usize, usize)>) -> Result<MaskShape> {
    // collapse batch/singleton axes; the flat order is unchanged by this
    let squeezed: Vec<usize> = shape.iter().copied().filter(|&d| d != 1).collect();
    if squeezed.len() != shape.len() && (2..=3).contains(&squeezed.len()) {
        if let Ok(found) = classify(&squeezed, expected) {
            return Ok(found);
        }
    }

    let total: usize = shape.iter().product();
    if total == 0 {
        return Err(SegError::invalid_shape(shape, "mask has no elements"));
    }

    if let Some((height, width)) = expected {
        for layout in [MaskLayout::Gray, MaskLayout::Rgb, MaskLayout::Rgba] {
            if total == height * width * layout.channels() {
                return settled(shape, height, width, layout, false);
            }
        }
    }

    if let [.., height, width] = *shape {
        if total == height * width {
            return settled(shape, height, width, MaskLayout::Gray, false);
        }
    }
    if let [.., height, width, channels] = *shape {
        if let Some(layout) = MaskLayout::from_channels(channels) {
            if total == height * width * channels {
                return settled(shape, height, width, layout, false);
            }
        }
    }

    let side = integer_sqrt(total);
    if side * side == total {
        return settled(shape, side, side, MaskLayout::Gray, false);
    }

    Err(SegError::invalid_shape(
        shape,
        match expected {
            Some((height, width)) => format!(
                "{total} elements match neither {height}x{width} nor {height}x{width}x3 \
                 and are not a square"
            ),
            None => format!("{total} elements cannot be arranged into a 2-D mask"),
        },
    ))
}

fn integer_sqrt(n: usize) -> usize {
    let mut root = (n as f64).sqrt() as usize;
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root
}

/// One conversion rule per layout. Alpha is discarded; color goes through BT.601 luma.
fn to_luma(values: &[u8], shape: &MaskShape) -> Result<GrayImage> {
    let channels = shape.layout.channels();
    let raw = match shape.layout {
        MaskLayout::Gray => values.to_vec(),
        MaskLayout::GrayAlpha => values.chunks_exact(channels).map(|px| px[0]).collect(),
        MaskLayout::Rgb | MaskLayout::Rgba => values
            .chunks_exact(channels)
            .map(|px| rgb_to_luma(px[0], px[1], px[2]))
            .collect(),
    };

    GrayImage::from_raw(shape.width as u32, shape.height as u32, raw)
        .ok_or_else(|| SegError::internal("マスク二値化", "luma buffer size mismatch"))
}

/// ITU-R BT.601 luma, rounded.
pub fn rgb_to_luma(red: u8, green: u8, blue: u8) -> u8 {
    let weighted = 299 * u32::from(red) + 587 * u32::from(green) + 114 * u32::from(blue);
    ((weighted + 500) / 1000) as u8
}

/// Turn any decoded image into a channels-last [`RawMask`].
///
/// 16-bit and float images are reduced to 8 bits first so the threshold keeps its
/// 0–255 meaning.
pub fn raw_mask_from_image(image: DynamicImage) -> Result<RawMask> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let (channels, raw) = match image {
        DynamicImage::ImageLuma8(img) => (1, img.into_raw()),
        DynamicImage::ImageLumaA8(img) => (2, img.into_raw()),
        DynamicImage::ImageRgb8(img) => (3, img.into_raw()),
        DynamicImage::ImageRgba8(img) => (4, img.into_raw()),
        other if other.color().has_alpha() => (4, other.to_rgba8().into_raw()),
        other if other.color().has_color() => (3, other.to_rgb8().into_raw()),
        other => (1, other.to_luma8().into_raw()),
    };

    let shape = if channels == 1 {
        IxDyn(&[height, width])
    } else {
        IxDyn(&[height, width, channels])
    };
    Ok(ArrayD::from_shape_vec(shape, raw)?)
}
