//! End-to-end runs of the public API over synthetic eye recordings.

use approx::assert_relative_eq;
use image::{GrayImage, Luma};
use pupiltrack::{
    process_stream, AnnotationSink, EyeParams, EyeTracker, FrameFeatures, FrameSource,
    StarburstConfig, StreamRange, TrackError, TrackerConfig, VecFrameSource,
};

const W: u32 = 160;
const H: u32 = 120;

fn paint_disk(img: &mut GrayImage, center: [f64; 2], radius: f64, value: u8) {
    for (x, y, p) in img.enumerate_pixels_mut() {
        let dx = x as f64 - center[0];
        let dy = y as f64 - center[1];
        if dx * dx + dy * dy < radius * radius {
            *p = Luma([value]);
        }
    }
}

/// Sclera, iris, pupil and a glint up and to the right of the pupil center.
fn eye_frame(pupil: [f64; 2]) -> GrayImage {
    let mut img = GrayImage::from_pixel(W, H, Luma([200]));
    paint_disk(&mut img, [80.0, 60.0], 45.0, 140);
    paint_disk(&mut img, pupil, 18.0, 20);
    paint_disk(&mut img, [pupil[0] + 5.0, pupil[1] - 4.0], 4.0, 250);
    img
}

fn config() -> TrackerConfig {
    TrackerConfig {
        starburst: StarburstConfig {
            threshold_factor: 2.0,
            threshold_pixels: 4,
            cr_threshold_pixels: Some(2),
            n_rays: 32,
            ray_length: 60,
            ..StarburstConfig::default()
        },
        eye: EyeParams {
            smoothing_kernel_size: 3,
            pupil_mask_radius: 15,
            cr_mask_radius: 4,
            min_pupil_value: 20,
            max_pupil_value: 60,
            ..EyeParams::default()
        },
        ..TrackerConfig::default()
    }
}

fn moving_pupil(n: usize) -> Vec<GrayImage> {
    (0..n)
        .map(|i| eye_frame([70.0 + 2.0 * i as f64, 60.0]))
        .collect()
}

#[test]
fn tracks_a_moving_pupil() {
    let mut tracker = EyeTracker::from_config(&config()).unwrap();
    let mut source = VecFrameSource::new(moving_pupil(10));
    let out = process_stream(&mut tracker, &mut source, &StreamRange::default(), None).unwrap();

    assert_eq!(out.len(), 10);
    assert_eq!(out.frame_indices, (0..10).collect::<Vec<_>>());
    assert_eq!(out.found_ratio(), (1.0, 1.0));

    let rows = out.pupil_rows();
    for (i, row) in rows.iter().enumerate() {
        assert_relative_eq!(row[0], 70.0 + 2.0 * i as f64, epsilon = 1.5);
        assert_relative_eq!(row[1], 60.0, epsilon = 1.5);
    }
    assert!(rows.windows(2).all(|w| w[1][0] > w[0][0]));

    assert_eq!(out.mean_frame.count(), 10);
    assert_eq!(out.pupil_density.total(), 10);
    assert_eq!(out.cr_density.total(), 10);
}

#[test]
fn range_selects_every_other_frame() {
    let mut tracker = EyeTracker::from_config(&config()).unwrap();
    let mut source = VecFrameSource::new(moving_pupil(10));
    let range = StreamRange::new(0, Some(10), 2);
    let out = process_stream(&mut tracker, &mut source, &range, None).unwrap();

    assert_eq!(out.len(), 5);
    assert_eq!(out.frame_indices, vec![0, 2, 4, 6, 8]);
    assert_relative_eq!(out.pupil_rows()[4][0], 86.0, epsilon = 1.5);
}

#[test]
fn frames_without_an_eye_are_recorded_as_not_found() {
    let mut frames = moving_pupil(3);
    frames[1] = GrayImage::from_pixel(W, H, Luma([128]));
    let mut tracker = EyeTracker::from_config(&config()).unwrap();
    let mut source = VecFrameSource::new(frames);
    let out = process_stream(&mut tracker, &mut source, &StreamRange::default(), None).unwrap();

    assert_eq!(out.len(), 3);
    assert!(out.pupil[0].found());
    assert!(!out.pupil[1].found());
    assert!(out.pupil_rows()[1].iter().all(|v| v.is_nan()));
    assert!(out.pupil[2].found());
    assert_eq!(out.pupil_density.total(), 2);
}

#[test]
fn mismatched_frame_size_aborts_the_stream() {
    let mut frames = moving_pupil(2);
    frames.push(GrayImage::new(W / 2, H));
    let mut tracker = EyeTracker::from_config(&config()).unwrap();
    let mut source = VecFrameSource::new(frames);
    let err = process_stream(&mut tracker, &mut source, &StreamRange::default(), None).unwrap_err();
    assert!(matches!(err, TrackError::FrameShape { index: 2, .. }));
}

#[derive(Default)]
struct CountingSink {
    seen: Vec<(usize, bool)>,
}

impl AnnotationSink for CountingSink {
    fn write_frame(
        &mut self,
        index: usize,
        _frame: &GrayImage,
        features: &FrameFeatures,
    ) -> pupiltrack::Result<()> {
        self.seen.push((index, features.pupil.found()));
        Ok(())
    }
}

#[test]
fn annotation_sink_sees_every_processed_frame() {
    let mut tracker = EyeTracker::from_config(&config()).unwrap();
    let mut source = VecFrameSource::new(moving_pupil(4));
    let mut sink = CountingSink::default();
    let range = StreamRange::new(1, None, 1);
    process_stream(&mut tracker, &mut source, &range, Some(&mut sink)).unwrap();
    assert_eq!(sink.seen, vec![(1, true), (2, true), (3, true)]);
}

/// Source whose advertised length overstates what it can deliver.
struct ShortSource {
    inner: VecFrameSource,
}

impl FrameSource for ShortSource {
    fn frame_shape(&self) -> (u32, u32) {
        self.inner.frame_shape()
    }

    fn frame_count(&self) -> usize {
        self.inner.frame_count() + 5
    }

    fn read_frame(&mut self, index: usize) -> pupiltrack::Result<Option<GrayImage>> {
        self.inner.read_frame(index)
    }
}

#[test]
fn exhausted_source_ends_the_stream_early() {
    let mut tracker = EyeTracker::from_config(&config()).unwrap();
    let mut source = ShortSource {
        inner: VecFrameSource::new(moving_pupil(3)),
    };
    let out = process_stream(&mut tracker, &mut source, &StreamRange::default(), None).unwrap();
    assert_eq!(out.len(), 3);
}

#[test]
fn config_from_json_drives_the_stream() {
    let json = r#"{
        "starburst": {"threshold_factor": 2.0, "threshold_pixels": 4,
                      "cr_threshold_pixels": 2, "n_rays": 32, "ray_length": 60},
        "eye": {"smoothing_kernel_size": 3, "pupil_mask_radius": 15, "cr_mask_radius": 4,
                "min_pupil_value": 20, "max_pupil_value": 60},
        "stream": {"start_frame": 2, "stop_frame": 5}
    }"#;
    let cfg = TrackerConfig::from_json_str(json).unwrap();
    let mut tracker = EyeTracker::from_config(&cfg).unwrap();
    let range = tracker.config().stream.clone();
    let mut source = VecFrameSource::new(moving_pupil(8));
    let out = process_stream(&mut tracker, &mut source, &range, None).unwrap();
    assert_eq!(out.frame_indices, vec![2, 3, 4]);
    assert!(out.pupil.iter().all(|f| f.found()));
}
