//! Selective Gaussian blur.
//!
//! Fan-in group: the input feeds both a Gaussian blur branch and a
//! two-input composite that keeps a circular region sharp. The aspect
//! ratio tracks the input size so the in-focus region stays circular on
//! non-square frames, unless explicitly overridden.

use std::sync::{Arc, Mutex};

use crate::geometry::{FrameSize, FrameTime, Rotation};
use crate::gpu::pool::Frame;
use crate::gpu::stream::FrameContext;
use crate::graph::filter::Filter;
use crate::graph::group::FilterGroup;
use crate::graph::{as_node, as_sink, FilterNode, FrameSink, GraphError, PipelineError, SinkRef};

use super::blur::GaussianBlurFilter;

const SELECTIVE_FOCUS_FRAGMENT_SHADER: &str = include_str!("shaders/selective_focus.wgsl");

pub struct GaussianSelectiveBlurFilter {
    group: FilterGroup,
    blur: Arc<Mutex<GaussianBlurFilter>>,
    composite: Arc<Mutex<Filter>>,
    overridden_aspect: bool,
    input_size: FrameSize,
    input_rotation: Rotation,
}

impl GaussianSelectiveBlurFilter {
    pub fn new(context: &FrameContext) -> Result<Self, PipelineError> {
        let blur = Arc::new(Mutex::new(GaussianBlurFilter::with_radius(context, 5.0)?));

        let mut focus = Filter::with_two_inputs(context, SELECTIVE_FOCUS_FRAGMENT_SHADER)?;
        focus.set_float("exclude_circle_radius", 60.0 / 320.0);
        focus.set_point("exclude_circle_point", [0.5, 0.5]);
        focus.set_float("exclude_blur_size", 30.0 / 320.0);
        focus.set_float("aspect_ratio", 1.0);
        let composite = Arc::new(Mutex::new(focus));

        // Blurred branch lands at the composite's first input, the
        // untouched original at its second.
        blur.lock()
            .unwrap()
            .add_consumer_at(&as_sink(&composite), 0)?;

        let mut group = FilterGroup::new(as_node(&composite));
        group.add_node(as_node(&blur));
        group.add_node(as_node(&composite));
        group.add_attachment(0, &as_sink(&blur), 0)?;
        group.add_attachment(0, &as_sink(&composite), 1)?;

        Ok(Self {
            group,
            blur,
            composite,
            overridden_aspect: false,
            input_size: FrameSize::default(),
            input_rotation: Rotation::None,
        })
    }

    /// Radius of the circular in-focus region, in normalized coordinates.
    pub fn set_exclude_circle_radius(&mut self, radius: f32) {
        self.composite
            .lock()
            .unwrap()
            .set_float("exclude_circle_radius", radius);
    }

    /// Center of the in-focus region.
    pub fn set_exclude_circle_point(&mut self, point: [f32; 2]) {
        self.composite
            .lock()
            .unwrap()
            .set_point("exclude_circle_point", point);
    }

    /// Width of the transition band between sharp and blurred.
    pub fn set_exclude_blur_size(&mut self, size: f32) {
        self.composite
            .lock()
            .unwrap()
            .set_float("exclude_blur_size", size);
    }

    pub fn set_blur_radius_in_pixels(&mut self, radius: f32) {
        self.blur.lock().unwrap().set_blur_radius_in_pixels(radius);
    }

    /// Pin the aspect ratio instead of tracking the input size.
    pub fn set_aspect_ratio(&mut self, aspect_ratio: f32) {
        self.overridden_aspect = true;
        self.composite
            .lock()
            .unwrap()
            .set_float("aspect_ratio", aspect_ratio);
    }

    fn update_aspect_ratio(&mut self) {
        if self.overridden_aspect {
            return;
        }
        let size = self.input_size.rotated(self.input_rotation);
        if size.is_zero() {
            return;
        }
        self.composite
            .lock()
            .unwrap()
            .set_float("aspect_ratio", size.height as f32 / size.width as f32);
    }
}

impl FrameSink for GaussianSelectiveBlurFilter {
    fn claim_slot(&mut self, slot: usize) -> Result<(), GraphError> {
        self.group.claim_slot(slot)
    }

    fn next_available_slot(&mut self) -> Result<usize, GraphError> {
        self.group.next_available_slot()
    }

    fn release_slot(&mut self, slot: usize) {
        self.group.release_slot(slot)
    }

    fn set_input_frame(&mut self, frame: Frame, slot: usize) -> Result<(), GraphError> {
        self.group.set_input_frame(frame, slot)
    }

    fn set_input_size(&mut self, size: FrameSize, slot: usize) -> Result<(), GraphError> {
        self.group.set_input_size(size, slot)?;
        if size != self.input_size {
            self.input_size = size;
            self.update_aspect_ratio();
        }
        Ok(())
    }

    fn set_input_rotation(&mut self, rotation: Rotation, slot: usize) -> Result<(), GraphError> {
        self.group.set_input_rotation(rotation, slot)?;
        if rotation != self.input_rotation {
            self.input_rotation = rotation;
            self.update_aspect_ratio();
        }
        Ok(())
    }

    fn frame_ready(
        &mut self,
        time: FrameTime,
        slot: usize,
        context: &mut FrameContext,
    ) -> Result<(), PipelineError> {
        self.group.frame_ready(time, slot, context)
    }

    fn end_processing(&mut self, context: &mut FrameContext) {
        self.group.end_processing(context)
    }

    fn ignores_updates(&self) -> bool {
        self.group.ignores_updates()
    }
}

impl FilterNode for GaussianSelectiveBlurFilter {
    fn add_consumer(&mut self, sink: &SinkRef) -> Result<usize, GraphError> {
        self.group.add_consumer(sink)
    }

    fn add_consumer_at(&mut self, sink: &SinkRef, slot: usize) -> Result<(), GraphError> {
        self.group.add_consumer_at(sink, slot)
    }

    fn remove_consumer(&mut self, sink: &SinkRef) {
        self.group.remove_consumer(sink)
    }

    fn remove_all_consumers(&mut self) {
        self.group.remove_all_consumers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::FrameSize;
    use crate::graph::sink::PixelSink;
    use crate::graph::source::PixelSource;
    use crate::graph::testing::test_stream;

    #[tokio::test]
    async fn test_focus_center_stays_sharp_while_border_blurs() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            // Checkerboard: blurring averages it toward gray, so blurred
            // regions lose local contrast.
            let size = 32u32;
            let mut pixels = Vec::with_capacity((size * size * 4) as usize);
            for y in 0..size {
                for x in 0..size {
                    let value = if (x + y) % 2 == 0 { 255u8 } else { 0u8 };
                    pixels.extend_from_slice(&[value, value, value, 255]);
                }
            }

            let mut source =
                PixelSource::from_pixels(context, &pixels, FrameSize::new(size, size)).unwrap();
            let selective = Arc::new(Mutex::new(
                GaussianSelectiveBlurFilter::new(context).unwrap(),
            ));
            selective.lock().unwrap().set_blur_radius_in_pixels(3.0);
            let sink = Arc::new(Mutex::new(PixelSink::new()));
            selective
                .lock()
                .unwrap()
                .add_consumer(&as_sink(&sink))
                .unwrap();
            source.add_consumer(&as_sink(&selective)).unwrap();

            source
                .process_frame(FrameTime::from_seconds(0.0), context)
                .unwrap();

            let image = sink.lock().unwrap().latest_image(context).unwrap();
            let contrast = |x: u32, y: u32| {
                let a = image.get_pixel(x, y).0[0] as i32;
                let b = image.get_pixel(x + 1, y).0[0] as i32;
                (a - b).abs()
            };

            let center = contrast(size / 2, size / 2);
            let corner = contrast(1, 1);
            assert!(
                center > corner + 40,
                "center contrast {center} should exceed blurred corner contrast {corner}"
            );
        });
    }
}
