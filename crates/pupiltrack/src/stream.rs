//! Stream-level driver: frame range selection, the per-stream accumulator
//! (mean frame, density maps, parameter series) and the frame loop.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::tracker::{EyeTracker, FeatureFit, FrameFeatures};

/// Frame indices to process: `start_frame..stop_frame` by `frame_step`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamRange {
    pub start_frame: usize,
    /// Exclusive end; `None` runs to the end of the source.
    pub stop_frame: Option<usize>,
    pub frame_step: usize,
}

impl Default for StreamRange {
    fn default() -> Self {
        Self {
            start_frame: 0,
            stop_frame: None,
            frame_step: 1,
        }
    }
}

impl StreamRange {
    pub fn new(start_frame: usize, stop_frame: Option<usize>, frame_step: usize) -> Self {
        Self {
            start_frame,
            stop_frame,
            frame_step,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_step == 0 {
            return Err(TrackError::config("stream.frame_step must be >= 1"));
        }
        if let Some(stop) = self.stop_frame {
            if stop < self.start_frame {
                return Err(TrackError::config(format!(
                    "stream.stop_frame ({stop}) is before start_frame ({})",
                    self.start_frame
                )));
            }
        }
        Ok(())
    }

    /// Indices selected from a source of `frame_count` frames.
    pub fn indices(&self, frame_count: usize) -> impl Iterator<Item = usize> {
        let stop = self.stop_frame.map_or(frame_count, |s| s.min(frame_count));
        (self.start_frame..stop).step_by(self.frame_step.max(1))
    }
}

/// Sequential, index-addressed supply of grayscale frames.
pub trait FrameSource {
    /// `(height, width)` every frame must have.
    fn frame_shape(&self) -> (u32, u32);
    fn frame_count(&self) -> usize;
    /// Frame `index`, or `None` past the end of the stream.
    fn read_frame(&mut self, index: usize) -> Result<Option<GrayImage>>;
}

/// In-memory [`FrameSource`].
#[derive(Debug, Clone, Default)]
pub struct VecFrameSource {
    frames: Vec<GrayImage>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<GrayImage>) -> Self {
        Self { frames }
    }
}

impl FrameSource for VecFrameSource {
    fn frame_shape(&self) -> (u32, u32) {
        self.frames
            .first()
            .map_or((0, 0), |f| (f.height(), f.width()))
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn read_frame(&mut self, index: usize) -> Result<Option<GrayImage>> {
        Ok(self.frames.get(index).cloned())
    }
}

/// Optional consumer of annotated frames, called once per processed frame.
pub trait AnnotationSink {
    fn write_frame(&mut self, index: usize, frame: &GrayImage, features: &FrameFeatures)
        -> Result<()>;
}

/// Running per-pixel mean of raw frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanFrame {
    width: u32,
    height: u32,
    sum: Vec<f64>,
    count: usize,
}

impl MeanFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sum: vec![0.0; width as usize * height as usize],
            count: 0,
        }
    }

    fn add(&mut self, frame: &GrayImage) {
        for (acc, &v) in self.sum.iter_mut().zip(frame.as_raw()) {
            *acc += v as f64;
        }
        self.count += 1;
    }

    /// Number of frames averaged.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Mean value at `(x, y)`; zero before any frame was added.
    pub fn get(&self, x: u32, y: u32) -> f64 {
        if self.count == 0 || x >= self.width || y >= self.height {
            return 0.0;
        }
        self.sum[(y * self.width + x) as usize] / self.count as f64
    }

    /// Rounded to 8 bits for export.
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([self.get(x, y).round().clamp(0.0, 255.0) as u8])
        })
    }
}

/// 2-D histogram of fitted centers at pixel resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityMap {
    width: u32,
    height: u32,
    counts: Vec<u32>,
}

impl DensityMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            counts: vec![0; width as usize * height as usize],
        }
    }

    /// Count the cell nearest `[x, y]`. Centers off the map are ignored.
    pub fn add(&mut self, center: [f64; 2]) -> bool {
        let (x, y) = (center[0].round(), center[1].round());
        if !(x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64) {
            return false;
        }
        self.counts[y as usize * self.width as usize + x as usize] += 1;
        true
    }

    pub fn get(&self, x: u32, y: u32) -> u32 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.counts[(y * self.width + x) as usize]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Counts scaled linearly so the busiest cell is 255.
    pub fn to_gray(&self) -> GrayImage {
        let max = self.counts.iter().copied().max().unwrap_or(0).max(1) as f64;
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([(self.get(x, y) as f64 * 255.0 / max).round() as u8])
        })
    }
}

/// Lifecycle of a [`StreamAccumulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulatorState {
    Idle,
    Running,
    Finalized,
}

/// Everything a stream run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOutput {
    /// Source index of each processed frame, in processing order.
    pub frame_indices: Vec<usize>,
    /// Pupil fit per processed frame.
    pub pupil: Vec<FeatureFit>,
    /// Corneal reflection fit per processed frame.
    pub cr: Vec<FeatureFit>,
    pub mean_frame: MeanFrame,
    pub pupil_density: DensityMap,
    pub cr_density: DensityMap,
}

impl StreamOutput {
    pub fn len(&self) -> usize {
        self.frame_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_indices.is_empty()
    }

    /// Fraction of processed frames with a pupil and with a CR, `(pupil, cr)`.
    pub fn found_ratio(&self) -> (f64, f64) {
        let n = self.len().max(1) as f64;
        let count = |fits: &[FeatureFit]| fits.iter().filter(|f| f.found()).count() as f64;
        (count(&self.pupil) / n, count(&self.cr) / n)
    }

    /// Pupil series in the legacy row layout (see [`FeatureFit::to_row`]).
    pub fn pupil_rows(&self) -> Vec<[f64; 5]> {
        self.pupil.iter().map(FeatureFit::to_row).collect()
    }

    /// CR series in the legacy row layout.
    pub fn cr_rows(&self) -> Vec<[f64; 5]> {
        self.cr.iter().map(FeatureFit::to_row).collect()
    }
}

/// Per-stream state: parameter series, mean frame, density maps.
///
/// Each frame is merged as one unit by [`record`](Self::record), so the
/// mean frame and series never disagree about how many frames were seen.
#[derive(Debug)]
pub struct StreamAccumulator {
    state: AccumulatorState,
    width: u32,
    height: u32,
    output: StreamOutput,
}

impl StreamAccumulator {
    /// Accumulator for frames of `width` x `height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: AccumulatorState::Idle,
            width,
            height,
            output: StreamOutput {
                frame_indices: Vec::new(),
                pupil: Vec::new(),
                cr: Vec::new(),
                mean_frame: MeanFrame::new(width, height),
                pupil_density: DensityMap::new(width, height),
                cr_density: DensityMap::new(width, height),
            },
        }
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// Merge one processed frame.
    pub fn record(&mut self, index: usize, frame: &GrayImage, features: FrameFeatures) -> Result<()> {
        if self.state == AccumulatorState::Finalized {
            return Err(TrackError::Finalized);
        }
        if frame.dimensions() != (self.width, self.height) {
            return Err(TrackError::FrameShape {
                index,
                got_height: frame.height(),
                got_width: frame.width(),
                height: self.height,
                width: self.width,
            });
        }
        self.state = AccumulatorState::Running;

        let out = &mut self.output;
        out.mean_frame.add(frame);
        for (fit, density) in [
            (&features.pupil, &mut out.pupil_density),
            (&features.cr, &mut out.cr_density),
        ] {
            if let Some(e) = &fit.ellipse {
                density.add([e.center_x, e.center_y]);
            }
        }
        out.frame_indices.push(index);
        out.pupil.push(features.pupil);
        out.cr.push(features.cr);
        Ok(())
    }

    /// Close the stream and hand out the results. Later calls fail.
    pub fn finalize(&mut self) -> Result<StreamOutput> {
        if self.state == AccumulatorState::Finalized {
            return Err(TrackError::Finalized);
        }
        self.state = AccumulatorState::Finalized;
        let empty = StreamAccumulator::new(self.width, self.height).output;
        Ok(std::mem::replace(&mut self.output, empty))
    }
}

/// Run `tracker` over the frames of `source` selected by `range`.
///
/// Frames are read and processed strictly in index order. A frame where a
/// feature is not detected is recorded as not found; configuration, shape and
/// source errors abort the run. The tracker's adaptive state is reset first.
pub fn process_stream(
    tracker: &mut EyeTracker,
    source: &mut dyn FrameSource,
    range: &StreamRange,
    mut sink: Option<&mut dyn AnnotationSink>,
) -> Result<StreamOutput> {
    range.validate()?;
    let (height, width) = source.frame_shape();
    let frame_count = source.frame_count();
    tracing::info!(
        frame_count,
        width,
        height,
        start = range.start_frame,
        stop = ?range.stop_frame,
        step = range.frame_step,
        "stream started"
    );

    tracker.reset();
    let mut acc = StreamAccumulator::new(width, height);
    for index in range.indices(frame_count) {
        let Some(frame) = source.read_frame(index)? else {
            tracing::debug!(index, "frame source exhausted");
            break;
        };
        if frame.dimensions() != (width, height) {
            return Err(TrackError::FrameShape {
                index,
                got_height: frame.height(),
                got_width: frame.width(),
                height,
                width,
            });
        }

        let features = tracker.process_frame(&frame)?;
        if let Some(sink) = sink.as_deref_mut() {
            sink.write_frame(index, &frame, &features)?;
        }
        acc.record(index, &frame, features)?;
    }

    let output = acc.finalize()?;
    let (pupil_ratio, cr_ratio) = output.found_ratio();
    tracing::info!(
        frames = output.len(),
        pupil_found = pupil_ratio,
        cr_found = cr_ratio,
        "stream finished"
    );
    Ok(output)
}
