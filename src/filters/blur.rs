//! Separable Gaussian blur.
//!
//! Two directional passes share one generated weight table; the radius
//! parameter drives the sigma of the distribution, and the texel step of
//! each pass tracks the propagated input size.

use crate::geometry::{FrameSize, FrameTime, Rotation};
use crate::gpu::pool::Frame;
use crate::gpu::stream::FrameContext;
use crate::graph::{FilterNode, FrameSink, GraphError, PipelineError, SinkRef};

use super::two_pass::TwoPassFilter;
use super::DEFAULT_VERTEX_SHADER;

const GAUSSIAN_BLUR_FRAGMENT_SHADER: &str = include_str!("shaders/gaussian_blur.wgsl");

/// Largest one-sided kernel radius the shader's weight table can hold.
const MAX_KERNEL_RADIUS: usize = 31;

/// Normalized one-sided Gaussian weights for `sigma`; index 0 is the
/// center tap.
pub(crate) fn gaussian_weights(sigma: f32) -> Vec<f32> {
    if sigma < 0.1 {
        return vec![1.0];
    }
    let radius = ((sigma * 2.57).ceil() as usize).clamp(1, MAX_KERNEL_RADIUS);
    let mut weights: Vec<f32> = (0..=radius)
        .map(|i| {
            let x = i as f32;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total = weights[0] + 2.0 * weights[1..].iter().sum::<f32>();
    for weight in &mut weights {
        *weight /= total;
    }
    weights
}

/// Two-pass Gaussian blur with a pixel-radius parameter.
pub struct GaussianBlurFilter {
    passes: TwoPassFilter,
    blur_radius_in_pixels: f32,
    texel_spacing_multiplier: f32,
    input_size: FrameSize,
    input_rotation: Rotation,
}

impl GaussianBlurFilter {
    pub fn new(context: &FrameContext) -> Result<Self, PipelineError> {
        Self::with_radius(context, 2.0)
    }

    pub fn with_radius(context: &FrameContext, radius: f32) -> Result<Self, PipelineError> {
        let passes = TwoPassFilter::symmetric(
            context,
            DEFAULT_VERTEX_SHADER,
            GAUSSIAN_BLUR_FRAGMENT_SHADER,
        )?;
        let mut filter = Self {
            passes,
            blur_radius_in_pixels: radius.max(0.0),
            texel_spacing_multiplier: 1.0,
            input_size: FrameSize::default(),
            input_rotation: Rotation::None,
        };
        filter.update_weights();
        Ok(filter)
    }

    pub fn blur_radius_in_pixels(&self) -> f32 {
        self.blur_radius_in_pixels
    }

    /// Adjust the sigma of the Gaussian distribution, in pixels.
    pub fn set_blur_radius_in_pixels(&mut self, radius: f32) {
        self.blur_radius_in_pixels = radius.max(0.0);
        self.update_weights();
    }

    /// Spacing multiplier between texels, default 1.0. Larger values
    /// strengthen the blur slightly at the cost of artifacts.
    pub fn set_texel_spacing_multiplier(&mut self, multiplier: f32) {
        self.texel_spacing_multiplier = multiplier.max(0.0);
        self.update_texel_steps();
    }

    fn update_weights(&mut self) {
        let weights = gaussian_weights(self.blur_radius_in_pixels);
        self.passes.for_each_stage(|stage| {
            stage.set_integer("weight_count", weights.len() as i32);
            stage.set_float_array("weights", &weights);
        });
    }

    fn update_texel_steps(&mut self) {
        let size = self.input_size.rotated(self.input_rotation);
        if size.is_zero() {
            return;
        }
        let spacing = self.texel_spacing_multiplier;
        self.passes
            .first()
            .lock()
            .unwrap()
            .set_size("texel_step", [spacing / size.width as f32, 0.0]);
        self.passes
            .second()
            .lock()
            .unwrap()
            .set_size("texel_step", [0.0, spacing / size.height as f32]);
    }
}

impl FrameSink for GaussianBlurFilter {
    fn claim_slot(&mut self, slot: usize) -> Result<(), GraphError> {
        self.passes.claim_slot(slot)
    }

    fn next_available_slot(&mut self) -> Result<usize, GraphError> {
        self.passes.next_available_slot()
    }

    fn release_slot(&mut self, slot: usize) {
        self.passes.release_slot(slot)
    }

    fn set_input_frame(&mut self, frame: Frame, slot: usize) -> Result<(), GraphError> {
        self.passes.set_input_frame(frame, slot)
    }

    fn set_input_size(&mut self, size: FrameSize, slot: usize) -> Result<(), GraphError> {
        self.passes.set_input_size(size, slot)?;
        if size != self.input_size {
            self.input_size = size;
            self.update_texel_steps();
        }
        Ok(())
    }

    fn set_input_rotation(&mut self, rotation: Rotation, slot: usize) -> Result<(), GraphError> {
        self.passes.set_input_rotation(rotation, slot)?;
        if rotation != self.input_rotation {
            self.input_rotation = rotation;
            self.update_texel_steps();
        }
        Ok(())
    }

    fn frame_ready(
        &mut self,
        time: FrameTime,
        slot: usize,
        context: &mut FrameContext,
    ) -> Result<(), PipelineError> {
        self.passes.frame_ready(time, slot, context)
    }

    fn end_processing(&mut self, context: &mut FrameContext) {
        self.passes.end_processing(context)
    }

    fn ignores_updates(&self) -> bool {
        self.passes.ignores_updates()
    }
}

impl FilterNode for GaussianBlurFilter {
    fn add_consumer(&mut self, sink: &SinkRef) -> Result<usize, GraphError> {
        self.passes.add_consumer(sink)
    }

    fn add_consumer_at(&mut self, sink: &SinkRef, slot: usize) -> Result<(), GraphError> {
        self.passes.add_consumer_at(sink, slot)
    }

    fn remove_consumer(&mut self, sink: &SinkRef) {
        self.passes.remove_consumer(sink)
    }

    fn remove_all_consumers(&mut self) {
        self.passes.remove_all_consumers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::FrameSize;
    use crate::graph::sink::PixelSink;
    use crate::graph::source::PixelSource;
    use crate::graph::testing::test_stream;
    use crate::graph::as_sink;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_gaussian_weights_are_normalized() {
        for sigma in [0.5, 1.0, 2.0, 5.0, 40.0] {
            let weights = gaussian_weights(sigma);
            let total = weights[0] + 2.0 * weights[1..].iter().sum::<f32>();
            assert!((total - 1.0).abs() < 1e-4, "sigma {sigma}: total {total}");
            assert!(weights.len() <= MAX_KERNEL_RADIUS + 1);
            for pair in weights.windows(2) {
                assert!(pair[0] >= pair[1], "weights must decay from the center");
            }
        }
    }

    #[test]
    fn test_tiny_sigma_degenerates_to_identity() {
        assert_eq!(gaussian_weights(0.0), vec![1.0]);
    }

    /// Blur a bright vertical line and return one row of green values.
    fn blurred_row(
        context: &mut crate::gpu::stream::FrameContext,
        radius: f32,
    ) -> Vec<u8> {
        let width = 15u32;
        let height = 9u32;
        let mut pixels = vec![0u8; (width * height * 4) as usize];
        for y in 0..height {
            let index = ((y * width + width / 2) * 4) as usize;
            pixels[index + 1] = 255;
            pixels[index + 3] = 255;
        }

        let mut source =
            PixelSource::from_pixels(context, &pixels, FrameSize::new(width, height)).unwrap();
        let blur = Arc::new(Mutex::new(
            GaussianBlurFilter::with_radius(context, radius).unwrap(),
        ));
        let sink = Arc::new(Mutex::new(PixelSink::new()));
        blur.lock().unwrap().add_consumer(&as_sink(&sink)).unwrap();
        source.add_consumer(&as_sink(&blur)).unwrap();

        source
            .process_frame(FrameTime::from_seconds(0.0), context)
            .unwrap();

        let image = sink.lock().unwrap().latest_image(context).unwrap();
        let row = height / 2;
        (0..width)
            .map(|x| image.get_pixel(x, row).0[1])
            .collect()
    }

    #[tokio::test]
    async fn test_intensity_falls_off_with_distance() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            let row = blurred_row(context, 2.0);
            let center = 7usize;
            assert!(row[center] > 0, "center must stay lit");
            for d in 1..=4 {
                assert!(
                    row[center - d] <= row[center - d + 1],
                    "left side must not brighten outward: {row:?}"
                );
                assert!(
                    row[center + d] <= row[center + d - 1],
                    "right side must not brighten outward: {row:?}"
                );
            }
            assert!(row[center] > row[center + 2], "falloff too flat: {row:?}");
        });
    }

    #[tokio::test]
    async fn test_larger_radius_spreads_further() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            let narrow = blurred_row(context, 1.0);
            let wide = blurred_row(context, 3.0);
            let center = 7usize;

            assert!(
                wide[center] < narrow[center],
                "wider blur must dim the line center: {narrow:?} vs {wide:?}"
            );
            assert!(
                wide[center + 4] > narrow[center + 4],
                "wider blur must reach further out: {narrow:?} vs {wide:?}"
            );
        });
    }
}
