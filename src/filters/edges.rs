//! Sobel edge detection.
//!
//! Luminance extraction followed by a 3x3 gradient pass. The sampling
//! offsets default to one texel of the propagated input size and can be
//! overridden for stylized effects.

use crate::geometry::{FrameSize, FrameTime, Rotation};
use crate::gpu::pool::Frame;
use crate::gpu::stream::FrameContext;
use crate::graph::{FilterNode, FrameSink, GraphError, PipelineError, SinkRef};

use super::two_pass::TwoPassFilter;
use super::DEFAULT_VERTEX_SHADER;

const LUMINANCE_FRAGMENT_SHADER: &str = include_str!("shaders/luminance.wgsl");
const SOBEL_FRAGMENT_SHADER: &str = include_str!("shaders/sobel.wgsl");

pub struct SobelEdgeDetectionFilter {
    passes: TwoPassFilter,
    edge_strength: f32,
    overridden_texel_size: bool,
    input_size: FrameSize,
    input_rotation: Rotation,
}

impl SobelEdgeDetectionFilter {
    pub fn new(context: &FrameContext) -> Result<Self, PipelineError> {
        let passes = TwoPassFilter::new(
            context,
            DEFAULT_VERTEX_SHADER,
            LUMINANCE_FRAGMENT_SHADER,
            DEFAULT_VERTEX_SHADER,
            SOBEL_FRAGMENT_SHADER,
        )?;
        let mut filter = Self {
            passes,
            edge_strength: 1.0,
            overridden_texel_size: false,
            input_size: FrameSize::default(),
            input_rotation: Rotation::None,
        };
        filter.apply_edge_strength();
        Ok(filter)
    }

    /// Dynamic-range multiplier for the gradient magnitude, default 1.0.
    pub fn set_edge_strength(&mut self, strength: f32) {
        self.edge_strength = strength;
        self.apply_edge_strength();
    }

    /// Override the horizontal sampling offset; stops size tracking.
    pub fn set_texel_width(&mut self, texel_width: f32) {
        self.overridden_texel_size = true;
        self.passes
            .second()
            .lock()
            .unwrap()
            .set_float("texel_width", texel_width);
    }

    /// Override the vertical sampling offset; stops size tracking.
    pub fn set_texel_height(&mut self, texel_height: f32) {
        self.overridden_texel_size = true;
        self.passes
            .second()
            .lock()
            .unwrap()
            .set_float("texel_height", texel_height);
    }

    fn apply_edge_strength(&mut self) {
        self.passes
            .second()
            .lock()
            .unwrap()
            .set_float("edge_strength", self.edge_strength);
    }

    fn update_texel_size(&mut self) {
        if self.overridden_texel_size {
            return;
        }
        let size = self.input_size.rotated(self.input_rotation);
        if size.is_zero() {
            return;
        }
        let second = self.passes.second();
        let mut second = second.lock().unwrap();
        second.set_float("texel_width", 1.0 / size.width as f32);
        second.set_float("texel_height", 1.0 / size.height as f32);
    }
}

impl FrameSink for SobelEdgeDetectionFilter {
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
            self.update_texel_size();
        }
        Ok(())
    }

    fn set_input_rotation(&mut self, rotation: Rotation, slot: usize) -> Result<(), GraphError> {
        self.passes.set_input_rotation(rotation, slot)?;
        if rotation != self.input_rotation {
            self.input_rotation = rotation;
            self.update_texel_size();
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

impl FilterNode for SobelEdgeDetectionFilter {
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

    #[tokio::test]
    async fn test_edges_light_up_at_boundary() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            // Left half black, right half white: one vertical edge.
            let width = 16u32;
            let height = 8u32;
            let mut pixels = Vec::with_capacity((width * height * 4) as usize);
            for _y in 0..height {
                for x in 0..width {
                    let value = if x < width / 2 { 0u8 } else { 255u8 };
                    pixels.extend_from_slice(&[value, value, value, 255]);
                }
            }

            let mut source =
                PixelSource::from_pixels(context, &pixels, FrameSize::new(width, height))
                    .unwrap();
            let edges = Arc::new(Mutex::new(SobelEdgeDetectionFilter::new(context).unwrap()));
            let sink = Arc::new(Mutex::new(PixelSink::new()));
            edges.lock().unwrap().add_consumer(&as_sink(&sink)).unwrap();
            source.add_consumer(&as_sink(&edges)).unwrap();

            source
                .process_frame(FrameTime::from_seconds(0.0), context)
                .unwrap();

            let image = sink.lock().unwrap().latest_image(context).unwrap();
            let row = height / 2;
            let at_edge = image.get_pixel(width / 2, row).0[0];
            let far_left = image.get_pixel(1, row).0[0];
            let far_right = image.get_pixel(width - 2, row).0[0];

            assert!(at_edge > 128, "boundary must light up, got {at_edge}");
            assert!(far_left < 16, "flat region must stay dark, got {far_left}");
            assert!(far_right < 16, "flat region must stay dark, got {far_right}");
        });
    }
}
