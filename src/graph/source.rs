//! Static-image frame producer.
//!
//! `PixelSource` uploads RGBA pixels once and re-offers the resulting
//! frame to its consumers on every [`PixelSource::process_frame`]. It is
//! the reference implementation of the producer contract: any camera or
//! decoder collaborator drives its consumers the same way, with
//! non-decreasing timestamps.

use image::RgbaImage;

use crate::geometry::{FrameSize, FrameTime, Rotation};
use crate::gpu::pool::{Frame, FrameSpec};
use crate::gpu::stream::FrameContext;
use crate::gpu::FRAME_FORMAT;

use super::{GraphError, PipelineError, SinkRef, SourceOutput};

/// Producer node backed by an uploaded pixel buffer.
pub struct PixelSource {
    output: SourceOutput,
}

impl PixelSource {
    /// Upload tightly packed RGBA pixels as this source's frame.
    pub fn from_pixels(
        context: &FrameContext,
        pixels: &[u8],
        size: FrameSize,
    ) -> Result<Self, PipelineError> {
        let expected = (size.width * size.height * 4) as usize;
        if pixels.len() != expected {
            return Err(PipelineError::SourceData {
                expected,
                actual: pixels.len(),
            });
        }

        let texture = context.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("pixel_source"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        upload_texture(context, &texture, pixels, size);

        let mut output = SourceOutput::new();
        output.set_size(size);
        output.set_frame(Some(Frame::wrap_external(
            texture,
            FrameSpec::new(size, FRAME_FORMAT),
        )));
        Ok(Self { output })
    }

    /// Upload a decoded image.
    pub fn from_image(context: &FrameContext, image: &RgbaImage) -> Result<Self, PipelineError> {
        Self::from_pixels(
            context,
            image.as_raw(),
            FrameSize::new(image.width(), image.height()),
        )
    }

    /// Replace the pixel content in place (same dimensions).
    pub fn update_pixels(
        &mut self,
        context: &FrameContext,
        pixels: &[u8],
    ) -> Result<(), PipelineError> {
        let size = self.output.size();
        let expected = (size.width * size.height * 4) as usize;
        if pixels.len() != expected {
            return Err(PipelineError::SourceData {
                expected,
                actual: pixels.len(),
            });
        }
        let Some(frame) = self.output.frame() else {
            log::warn!("pixel source already torn down, ignoring update");
            return Ok(());
        };
        upload_texture(context, frame.texture(), pixels, size);
        Ok(())
    }

    /// Stamp the orientation consumers must undo when sampling this
    /// source (e.g. a sensor mounted sideways).
    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.output.set_rotation(rotation);
    }

    pub fn size(&self) -> FrameSize {
        self.output.size()
    }

    pub fn output(&self) -> &SourceOutput {
        &self.output
    }

    pub fn add_consumer(&mut self, sink: &SinkRef) -> Result<usize, GraphError> {
        self.output.add_consumer(sink)
    }

    pub fn add_consumer_at(&mut self, sink: &SinkRef, slot: usize) -> Result<(), GraphError> {
        self.output.add_consumer_at(sink, slot)
    }

    pub fn remove_consumer(&mut self, sink: &SinkRef) {
        self.output.remove_consumer(sink);
    }

    pub fn remove_all_consumers(&mut self) {
        self.output.remove_all_consumers();
    }

    /// Push the current frame through the graph.
    pub fn process_frame(
        &mut self,
        time: FrameTime,
        context: &mut FrameContext,
    ) -> Result<(), PipelineError> {
        self.output.notify(time, context)
    }

    /// Tear down this source's subtree.
    pub fn finish(&mut self, context: &mut FrameContext) {
        self.output.propagate_end(context);
    }
}

fn upload_texture(
    context: &FrameContext,
    texture: &wgpu::Texture,
    pixels: &[u8],
    size: FrameSize,
) {
    context.queue().write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(size.width * 4),
            rows_per_image: Some(size.height),
        },
        wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
    );
}
