use image::{Rgb, RgbImage};
use ndarray::{Array2, Array3, IxDyn};

use seg_refine::mask::Mask;
use seg_refine::mocks::{MockResponse, MockSegmentationModel};
use seg_refine::traits::Candidate;
use seg_refine::{
    ErrorKind, ModelService, PipelineConfig, RawMask, RefineParams, RefineStage, Refiner,
    SegError, SegmentRequest, Segmenter,
};

fn textured_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

fn ellipse_raw(width: usize, height: usize, cx: f32, cy: f32, rx: f32, ry: f32) -> RawMask {
    Array2::from_shape_fn((height, width), |(y, x)| {
        let dx = (x as f32 - cx) / rx;
        let dy = (y as f32 - cy) / ry;
        if dx * dx + dy * dy <= 1.0 {
            255
        } else {
            0
        }
    })
    .into_dyn()
}

fn raw_to_mask(raw: &RawMask) -> Mask {
    let (height, width) = (raw.shape()[0] as u32, raw.shape()[1] as u32);
    Mask::from_fn(width, height, |x, y| raw[[y as usize, x as usize]] > 127)
}

#[test]
fn test_guided_region_stays_inside_user_mask() -> seg_refine::Result<()> {
    let image = textured_image(512, 512);
    let raw = ellipse_raw(512, 512, 256.0, 250.0, 52.0, 48.0);
    let user = raw_to_mask(&raw);
    let user_box = user.bounding_box().unwrap();

    let model = MockSegmentationModel::echo_box();
    let (set_calls, predict_calls) = model.counters();
    let segmenter = Segmenter::with_defaults(ModelService::ready(model));

    let regions = segmenter.segment(&SegmentRequest::guided(image.clone(), raw))?;
    assert_eq!(regions.len(), 1);
    let region = &regions[0];

    // refined output is a subset of the user mask, so its box sits inside the user box
    let hull = user_box.expand(7 / 2, 512, 512);
    assert!(hull.encloses(&seg_refine::BoundingBox::new(
        region.offset_x,
        region.offset_y,
        region.offset_x + region.width - 1,
        region.offset_y + region.height - 1,
    )));
    assert_eq!(region.image.dimensions(), (region.width, region.height));

    let mut opaque = 0;
    for (x, y, pixel) in region.image.enumerate_pixels() {
        let (ix, iy) = (region.offset_x + x, region.offset_y + y);
        if pixel[3] > 0 {
            opaque += 1;
            assert!(user.get(ix, iy), "opaque pixel outside mask at ({ix}, {iy})");
            assert_eq!(&pixel.0[..3], &image.get_pixel(ix, iy).0);
        }
    }
    // the cut-out covers most of the user ellipse
    assert!(opaque as f64 > 0.8 * user.count() as f64);

    assert_eq!(set_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(predict_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_empty_user_mask_never_reaches_model() {
    let loads = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = std::sync::Arc::clone(&loads);
    let service = ModelService::lazy(move || {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(MockSegmentationModel::echo_box())
    });
    let segmenter = Segmenter::with_defaults(service);

    let raw = RawMask::zeros(IxDyn(&[512, 512]));
    let err = segmenter
        .segment(&SegmentRequest::guided(textured_image(512, 512), raw))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EmptyPromptRegion);
    assert_eq!(err.status_code(), 400);
    assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(!segmenter.model().is_ready());
}

#[test]
fn test_uniform_image_automatic_is_empty() -> seg_refine::Result<()> {
    let model = MockSegmentationModel::new(MockResponse::Empty);
    let (_, predict_calls) = model.counters();
    let segmenter = Segmenter::with_defaults(ModelService::ready(model));

    let image = RgbImage::from_pixel(320, 240, Rgb([128, 128, 128]));
    let regions = segmenter.segment(&SegmentRequest::automatic(image))?;

    assert!(regions.is_empty());
    assert_eq!(predict_calls.load(std::sync::atomic::Ordering::SeqCst), 32 * 32);
    Ok(())
}

#[test]
fn test_automatic_skips_empty_masks() -> seg_refine::Result<()> {
    let object = Mask::from_fn(64, 48, |x, y| (10..20).contains(&x) && (5..15).contains(&y));
    let model = MockSegmentationModel::new(MockResponse::Empty).with_automatic(vec![
        Candidate::new(object, 0.97),
        Candidate::new(Mask::new(64, 48), 0.95),
    ]);
    let segmenter = Segmenter::with_defaults(ModelService::ready(model));

    let regions = segmenter.segment_automatic(&textured_image(64, 48))?;
    assert_eq!(regions.len(), 1);
    assert_eq!((regions[0].offset_x, regions[0].offset_y), (10, 5));
    assert_eq!((regions[0].width, regions[0].height), (10, 10));
    // automatic regions are not refined: the crop is fully opaque
    assert!(regions[0].image.pixels().all(|p| p[3] == 255));
    Ok(())
}

#[test]
fn test_automatic_rejects_mismatched_masks() {
    let model = MockSegmentationModel::new(MockResponse::Empty)
        .with_automatic(vec![Candidate::new(Mask::from_fn(10, 10, |_, _| true), 0.99)]);
    let segmenter = Segmenter::with_defaults(ModelService::ready(model));

    let err = segmenter
        .segment_automatic(&textured_image(64, 48))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalProcessingFailure);
}

#[test]
fn test_unavailable_model_maps_to_503() {
    let service: ModelService<MockSegmentationModel> = ModelService::lazy(|| {
        Err(SegError::ModelUnavailable {
            reason: "checkpoint missing".to_string(),
        })
    });
    let segmenter = Segmenter::with_defaults(service);

    let raw = ellipse_raw(128, 128, 64.0, 64.0, 20.0, 20.0);
    let response = segmenter
        .respond(&SegmentRequest::guided(textured_image(128, 128), raw))
        .unwrap_err();
    assert_eq!(response.status, 503);
}

#[test]
fn test_channel_first_rgb_mask_with_different_size() -> seg_refine::Result<()> {
    // 3xHxW mask at half the image size
    let gray = ellipse_raw(128, 96, 64.0, 48.0, 30.0, 25.0);
    let planar = Array3::from_shape_fn((3, 96, 128), |(_, y, x)| gray[[y, x]]).into_dyn();

    let segmenter =
        Segmenter::with_defaults(ModelService::ready(MockSegmentationModel::echo_box()));
    let regions = segmenter.segment(&SegmentRequest::guided(textured_image(256, 192), planar))?;

    assert_eq!(regions.len(), 1);
    let region = &regions[0];
    assert!(region.offset_x >= 60 && region.offset_x + region.width <= 196);
    Ok(())
}

#[test]
fn test_uninferable_mask_shape_is_rejected() {
    let segmenter =
        Segmenter::with_defaults(ModelService::ready(MockSegmentationModel::echo_box()));
    let raw = RawMask::zeros(IxDyn(&[2, 3, 5, 7]));

    let err = segmenter
        .segment(&SegmentRequest::guided(textured_image(10, 10), raw))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMaskShape);
    assert_eq!(err.status_code(), 400);
}

#[test]
fn test_refiner_subset_after_every_stage_with_custom_config() -> seg_refine::Result<()> {
    let mut config = PipelineConfig::default();
    config.original_refine = RefineParams {
        close_kernel: 11,
        close_iterations: 3,
        ..RefineParams::original()
    };

    let authorized = Mask::from_fn(90, 70, |x, y| {
        x > 15 && x < 70 && y > 10 && y < 60 && (x + y) % 17 != 0
    });
    let candidate = Mask::from_fn(90, 70, |x, y| (x * 7 + y * 3) % 5 != 0);

    let refiner = Refiner::new(&config.original_refine);
    refiner.refine_with(&candidate, &authorized, |stage, mask| {
        if *stage == RefineStage::Constrain {
            assert!(mask.is_subset_of(&authorized));
        }
    })?;
    Ok(())
}
