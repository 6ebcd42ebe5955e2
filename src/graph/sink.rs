//! Terminal pixel consumer.
//!
//! `PixelSink` is the reference implementation of the sink contract: it
//! retains the delivered frame by cloning the handle (the explicit
//! reference-count increment) and releases it when the next frame
//! arrives or processing ends. `latest_image` decodes the held frame on
//! demand via the blocking read-back path.

use image::RgbaImage;

use crate::geometry::{FrameSize, FrameTime, Rotation};
use crate::gpu::pool::Frame;
use crate::gpu::readback::read_frame_pixels;
use crate::gpu::stream::FrameContext;

use super::{FrameSink, GraphError, PipelineError};

/// Input-only node that keeps the most recent frame for CPU-side export.
#[derive(Default)]
pub struct PixelSink {
    claimed: bool,
    frame: Option<Frame>,
    size: FrameSize,
    rotation: Rotation,
    frames_received: u64,
    finished: bool,
}

impl PixelSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn frame_size(&self) -> FrameSize {
        self.size
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Decode the held frame. Blocks on the GPU read-back.
    pub fn latest_image(&self, context: &FrameContext) -> Option<RgbaImage> {
        let frame = self.frame.as_ref()?;
        let size = frame.size();
        let pixels = read_frame_pixels(context.device(), context.queue(), frame);
        RgbaImage::from_raw(size.width, size.height, pixels)
    }
}

impl FrameSink for PixelSink {
    fn claim_slot(&mut self, slot: usize) -> Result<(), GraphError> {
        if slot != 0 {
            return Err(GraphError::SlotOutOfRange { slot, count: 1 });
        }
        if self.claimed {
            return Err(GraphError::SlotTaken { slot });
        }
        self.claimed = true;
        Ok(())
    }

    fn next_available_slot(&mut self) -> Result<usize, GraphError> {
        if self.claimed {
            return Err(GraphError::NoFreeSlot);
        }
        self.claimed = true;
        Ok(0)
    }

    fn release_slot(&mut self, slot: usize) {
        if slot == 0 {
            self.claimed = false;
            self.frame = None;
        }
    }

    fn set_input_frame(&mut self, frame: Frame, slot: usize) -> Result<(), GraphError> {
        if slot != 0 || !self.claimed {
            return Err(GraphError::SlotUnclaimed { slot });
        }
        self.frame = Some(frame);
        Ok(())
    }

    fn set_input_size(&mut self, size: FrameSize, slot: usize) -> Result<(), GraphError> {
        if slot != 0 || !self.claimed {
            return Err(GraphError::SlotUnclaimed { slot });
        }
        self.size = size;
        Ok(())
    }

    fn set_input_rotation(&mut self, rotation: Rotation, slot: usize) -> Result<(), GraphError> {
        if slot != 0 || !self.claimed {
            return Err(GraphError::SlotUnclaimed { slot });
        }
        self.rotation = rotation;
        Ok(())
    }

    fn frame_ready(
        &mut self,
        _time: FrameTime,
        _slot: usize,
        _context: &mut FrameContext,
    ) -> Result<(), PipelineError> {
        if self.finished {
            return Ok(());
        }
        self.frames_received += 1;
        Ok(())
    }

    fn end_processing(&mut self, _context: &mut FrameContext) {
        self.finished = true;
        self.frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::filter::Filter;
    use crate::graph::source::PixelSource;
    use crate::graph::testing::test_stream;
    use crate::graph::{as_sink, FilterNode};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_passthrough_preserves_solid_color() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            let pixels: Vec<u8> = [10u8, 200, 60, 255].repeat(8 * 8);
            let mut source =
                PixelSource::from_pixels(context, &pixels, FrameSize::new(8, 8)).unwrap();

            let filter = Arc::new(Mutex::new(Filter::passthrough(context).unwrap()));
            let sink = Arc::new(Mutex::new(PixelSink::new()));
            source.add_consumer(&as_sink(&filter)).unwrap();
            filter
                .lock()
                .unwrap()
                .add_consumer(&as_sink(&sink))
                .unwrap();

            source
                .process_frame(FrameTime::from_seconds(0.0), context)
                .unwrap();

            let sink = sink.lock().unwrap();
            assert_eq!(sink.frames_received(), 1);
            assert_eq!(sink.frame_size(), FrameSize::new(8, 8));

            let image = sink.latest_image(context).unwrap();
            assert_eq!(image.dimensions(), (8, 8));
            for pixel in image.pixels() {
                // Identical size/format and pixel values within unorm
                // round-off of the input.
                assert!(pixel.0[0].abs_diff(10) <= 1);
                assert!(pixel.0[1].abs_diff(200) <= 1);
                assert!(pixel.0[2].abs_diff(60) <= 1);
                assert_eq!(pixel.0[3], 255);
            }
        });
    }

    #[tokio::test]
    async fn test_rotation_round_trip_restores_pattern() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            // 2x2 test pattern with four distinct corners, upscaled to 4x4
            // so each quadrant is unambiguous.
            let mut pixels = Vec::with_capacity(4 * 4 * 4);
            for y in 0..4u32 {
                for x in 0..4u32 {
                    let quadrant = (u8::from(y >= 2) << 1) | u8::from(x >= 2);
                    pixels.extend_from_slice(&[quadrant * 60, 255 - quadrant * 60, 0, 255]);
                }
            }
            let reference = pixels.clone();

            // Render `pixels` through one passthrough filter whose input
            // is stamped with `rotation`.
            fn render_rotated(
                context: &mut crate::gpu::stream::FrameContext,
                pixels: &[u8],
                size: FrameSize,
                rotation: crate::geometry::Rotation,
            ) -> RgbaImage {
                let mut source = PixelSource::from_pixels(context, pixels, size).unwrap();
                source.set_rotation(rotation);

                let filter = Arc::new(Mutex::new(Filter::passthrough(context).unwrap()));
                let sink = Arc::new(Mutex::new(PixelSink::new()));
                source.add_consumer(&as_sink(&filter)).unwrap();
                filter
                    .lock()
                    .unwrap()
                    .add_consumer(&as_sink(&sink))
                    .unwrap();

                source
                    .process_frame(FrameTime::from_seconds(0.0), context)
                    .unwrap();
                let image = sink.lock().unwrap().latest_image(context).unwrap();
                source.finish(context);
                image
            }

            for rotation in crate::geometry::ALL_ROTATIONS {
                let rotated =
                    render_rotated(context, &pixels, FrameSize::new(4, 4), rotation);
                let restored = render_rotated(
                    context,
                    rotated.as_raw(),
                    FrameSize::new(rotated.width(), rotated.height()),
                    rotation.inverse(),
                );
                assert_eq!(
                    restored.as_raw(),
                    &reference,
                    "rotation {rotation:?} + inverse did not restore the pattern"
                );
            }
        });
    }
}
