//! Single-pass filter node.
//!
//! A `Filter` binds one shader program, waits until every claimed input
//! slot holds a frame for the current generation, then renders a
//! full-screen quad into a pooled buffer and fans the result out to its
//! consumers. Texture coordinates are selected per input by the producer's
//! rotation, so filter output is always upright (rotation `None`).

use image::RgbaImage;

use crate::geometry::{
    quad_positions, texture_coordinates, FrameSize, FrameTime, Rotation, QUAD_VERTEX_COUNT,
};
use crate::gpu::pool::{Frame, FrameSpec};
use crate::gpu::program::FilterProgram;
use crate::gpu::readback::read_frame_pixels;
use crate::gpu::stream::FrameContext;
use crate::gpu::uniforms::UniformValue;
use crate::filters::{DEFAULT_VERTEX_SHADER, PASSTHROUGH_FRAGMENT_SHADER, TWO_INPUT_VERTEX_SHADER};

use super::{FilterNode, FrameSink, GraphError, PipelineError, SinkRef, SourceOutput};

/// Lifecycle of one input slot. `Ready` means a frame arrived for the
/// current generation; rendering resets the slot to `Claimed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Claimed,
    Ready,
}

struct InputSlot {
    state: SlotState,
    frame: Option<Frame>,
    size: FrameSize,
    rotation: Rotation,
}

impl InputSlot {
    fn new() -> Self {
        Self {
            state: SlotState::Free,
            frame: None,
            size: FrameSize::default(),
            rotation: Rotation::None,
        }
    }
}

/// Single-pass shader filter node.
pub struct Filter {
    program: FilterProgram,
    inputs: Vec<InputSlot>,
    output: SourceOutput,
    uniform_buffer: Option<wgpu::Buffer>,
    vertex_buffers: Vec<wgpu::Buffer>,
    sampler: wgpu::Sampler,
    /// Latest value per uniform slot, re-offered to the cache every render.
    uniform_values: Vec<(usize, UniformValue)>,
    forced_size: Option<FrameSize>,
    background_color: [f32; 4],
    enabled: bool,
    finished: bool,
    deaf: bool,
    capture_next: bool,
    captured: Option<RgbaImage>,
}

impl Filter {
    /// Filter with the default single-input vertex shader.
    pub fn new(context: &FrameContext, fragment_source: &str) -> Result<Self, PipelineError> {
        Self::with_shaders(context, DEFAULT_VERTEX_SHADER, fragment_source)
    }

    /// Identity filter.
    pub fn passthrough(context: &FrameContext) -> Result<Self, PipelineError> {
        Self::new(context, PASSTHROUGH_FRAGMENT_SHADER)
    }

    /// Two-input filter with the stock two-coordinate vertex shader.
    pub fn with_two_inputs(
        context: &FrameContext,
        fragment_source: &str,
    ) -> Result<Self, PipelineError> {
        Self::with_shaders(context, TWO_INPUT_VERTEX_SHADER, fragment_source)
    }

    /// Build, reflect, and link a filter from a vertex+fragment pair.
    /// Shader failures are construction-fatal.
    pub fn with_shaders(
        context: &FrameContext,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, PipelineError> {
        let mut program = FilterProgram::new(vertex_source, fragment_source)?;
        program.add_attribute("position")?;
        for index in 0..program.texture_count() {
            let name = if index == 0 {
                "input_tex_coord".to_owned()
            } else {
                format!("input_tex_coord{}", index + 1)
            };
            program.add_attribute(&name)?;
        }
        program.verify_attributes()?;
        program.link(context.device())?;

        let device = context.device();
        let uniform_buffer = (program.uniform_block_size() > 0).then(|| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("filter_uniforms"),
                size: program.uniform_block_size() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        // One quad buffer for positions plus one per input's coordinates.
        let vertex_buffers = (0..=program.texture_count())
            .map(|_| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("filter_quad"),
                    size: 4 * 8,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("filter_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });

        let inputs = (0..program.texture_count()).map(|_| InputSlot::new()).collect();

        Ok(Self {
            program,
            inputs,
            output: SourceOutput::new(),
            uniform_buffer,
            vertex_buffers,
            sampler,
            uniform_values: Vec::new(),
            forced_size: None,
            background_color: [0.0, 0.0, 0.0, 1.0],
            enabled: true,
            finished: false,
            deaf: false,
            capture_next: false,
            captured: None,
        })
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn program(&self) -> &FilterProgram {
        &self.program
    }

    pub fn output(&self) -> &SourceOutput {
        &self.output
    }

    pub fn output_frame(&self) -> Option<Frame> {
        self.output.frame().cloned()
    }

    /// Force the output buffer to a fixed size instead of tracking the
    /// first input.
    pub fn set_output_size(&mut self, size: Option<FrameSize>) {
        self.forced_size = size;
    }

    /// When disabled the filter renders its flat background color instead
    /// of the shader output.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_background_color(&mut self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.background_color = [red, green, blue, alpha];
    }

    /// Go deaf to upstream notifications during reconfiguration.
    pub fn set_ignore_updates(&mut self, ignore: bool) {
        self.deaf = ignore;
    }

    /// Arm the one-shot capture: the next rendered frame is read back
    /// synchronously and stored for [`Filter::take_captured_image`].
    pub fn use_next_frame_for_capture(&mut self) {
        self.capture_next = true;
    }

    pub fn take_captured_image(&mut self) -> Option<RgbaImage> {
        self.captured.take()
    }

    /// Synchronously decode the current output frame. Blocks on the GPU.
    pub fn image_from_current_output(&self, context: &FrameContext) -> Option<RgbaImage> {
        let frame = self.output.frame()?;
        let size = frame.size();
        let pixels = read_frame_pixels(context.device(), context.queue(), frame);
        RgbaImage::from_raw(size.width, size.height, pixels)
    }

    /// Stage a value for a named uniform. Unknown names are skipped
    /// silently: the shader variant simply does not use that parameter.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(index) = self.program.uniform_index(name) else {
            log::debug!("uniform '{name}' not used by this filter, skipping");
            return;
        };
        match self.uniform_values.iter_mut().find(|(slot, _)| *slot == index) {
            Some(entry) => entry.1 = value,
            None => self.uniform_values.push((index, value)),
        }
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.set_uniform(name, UniformValue::Float(value));
    }

    pub fn set_integer(&mut self, name: &str, value: i32) {
        self.set_uniform(name, UniformValue::Int(value));
    }

    pub fn set_point(&mut self, name: &str, value: [f32; 2]) {
        self.set_uniform(name, UniformValue::Point(value));
    }

    pub fn set_size(&mut self, name: &str, value: [f32; 2]) {
        self.set_uniform(name, UniformValue::Size(value));
    }

    pub fn set_vec3(&mut self, name: &str, value: [f32; 3]) {
        self.set_uniform(name, UniformValue::Vec3(value));
    }

    pub fn set_vec4(&mut self, name: &str, value: [f32; 4]) {
        self.set_uniform(name, UniformValue::Vec4(value));
    }

    pub fn set_matrix3(&mut self, name: &str, value: [[f32; 3]; 3]) {
        self.set_uniform(name, UniformValue::Mat3(value));
    }

    pub fn set_matrix4(&mut self, name: &str, value: [[f32; 4]; 4]) {
        self.set_uniform(name, UniformValue::Mat4(value));
    }

    pub fn set_float_array(&mut self, name: &str, values: &[f32]) {
        self.set_uniform(name, UniformValue::FloatArray(values.to_vec()));
    }

    /// All claimed slots populated for this generation, program linked,
    /// and the node still live.
    fn is_ready(&self) -> bool {
        !self.finished
            && self.program.is_initialized()
            && self
                .inputs
                .iter()
                .all(|slot| slot.state == SlotState::Ready)
    }

    fn check_slot(&self, slot: usize) -> Result<(), GraphError> {
        if slot >= self.inputs.len() {
            return Err(GraphError::SlotOutOfRange {
                slot,
                count: self.inputs.len(),
            });
        }
        if self.inputs[slot].state == SlotState::Free {
            return Err(GraphError::SlotUnclaimed { slot });
        }
        Ok(())
    }

    fn output_spec(&self) -> FrameSpec {
        let size = self.forced_size.unwrap_or_else(|| {
            self.inputs
                .first()
                .map(|first| first.size.rotated(first.rotation))
                .unwrap_or_default()
        });
        FrameSpec::rgba(size)
    }

    fn write_uniforms(&mut self, context: &mut FrameContext) {
        context.uniforms.activate_program(self.program.id());
        let Some(buffer) = &self.uniform_buffer else {
            return;
        };
        for (index, value) in &self.uniform_values {
            let Some(slot) = self.program.uniform_slot(*index) else {
                continue;
            };
            let mut bytes = value.encode();
            if bytes.len() > slot.size as usize {
                log::warn!(
                    "value for uniform '{}' exceeds its {}-byte slot, truncating",
                    slot.name,
                    slot.size
                );
                bytes.truncate(slot.size as usize);
            }
            if context.uniforms.set(self.program.id(), *index, &bytes) {
                context.queue().write_buffer(buffer, slot.offset as u64, &bytes);
            }
        }
    }

    fn clear_color(&self) -> wgpu::Color {
        wgpu::Color {
            r: self.background_color[0] as f64,
            g: self.background_color[1] as f64,
            b: self.background_color[2] as f64,
            a: self.background_color[3] as f64,
        }
    }

    /// Render one frame into a pooled buffer. Pool exhaustion drops the
    /// frame for this subtree; upstream and siblings are unaffected.
    fn render(&mut self, context: &mut FrameContext) -> Result<bool, PipelineError> {
        let spec = self.output_spec();
        if spec.size.is_zero() {
            log::warn!("filter has no usable output size yet, dropping frame");
            return Ok(false);
        }
        let target = match context.pool.acquire(spec) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("frame dropped: {err}");
                return Ok(false);
            }
        };

        let device = context.gpu.device.clone();
        let queue = context.gpu.queue.clone();

        if self.enabled {
            self.write_uniforms(context);

            queue.write_buffer(
                &self.vertex_buffers[0],
                0,
                bytemuck::cast_slice(&quad_positions()),
            );
            for (index, input) in self.inputs.iter().enumerate() {
                queue.write_buffer(
                    &self.vertex_buffers[index + 1],
                    0,
                    bytemuck::cast_slice(&texture_coordinates(input.rotation)),
                );
            }
        }

        let views: Vec<&wgpu::TextureView> = self
            .inputs
            .iter()
            .filter_map(|input| input.frame.as_ref().map(Frame::view))
            .collect();

        let bind_group = if self.enabled {
            Some(self.program.create_bind_group(
                &device,
                self.uniform_buffer.as_ref(),
                &views,
                &self.sampler,
            )?)
        } else {
            None
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("filter_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("filter_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.view(),
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color()),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            if let Some(bind_group) = &bind_group {
                pass.set_pipeline(self.program.pipeline()?);
                pass.set_bind_group(0, bind_group, &[]);
                for (index, buffer) in self.vertex_buffers.iter().enumerate() {
                    pass.set_vertex_buffer(index as u32, buffer.slice(..));
                }
                pass.draw(0..QUAD_VERTEX_COUNT, 0..1);
            }
        }
        queue.submit(std::iter::once(encoder.finish()));

        if self.capture_next {
            self.capture_next = false;
            let pixels = read_frame_pixels(&device, &queue, &target);
            self.captured = RgbaImage::from_raw(spec.size.width, spec.size.height, pixels);
        }

        self.output.set_size(spec.size);
        self.output.set_rotation(Rotation::None);
        self.output.set_frame(Some(target));
        Ok(true)
    }
}

impl FrameSink for Filter {
    fn claim_slot(&mut self, slot: usize) -> Result<(), GraphError> {
        if slot >= self.inputs.len() {
            return Err(GraphError::SlotOutOfRange {
                slot,
                count: self.inputs.len(),
            });
        }
        if self.inputs[slot].state != SlotState::Free {
            return Err(GraphError::SlotTaken { slot });
        }
        self.inputs[slot].state = SlotState::Claimed;
        Ok(())
    }

    fn next_available_slot(&mut self) -> Result<usize, GraphError> {
        let slot = self
            .inputs
            .iter()
            .position(|input| input.state == SlotState::Free)
            .ok_or(GraphError::NoFreeSlot)?;
        self.inputs[slot].state = SlotState::Claimed;
        Ok(slot)
    }

    fn release_slot(&mut self, slot: usize) {
        if let Some(input) = self.inputs.get_mut(slot) {
            input.state = SlotState::Free;
            input.frame = None;
        }
    }

    fn set_input_frame(&mut self, frame: Frame, slot: usize) -> Result<(), GraphError> {
        self.check_slot(slot)?;
        self.inputs[slot].frame = Some(frame);
        self.inputs[slot].state = SlotState::Ready;
        Ok(())
    }

    fn set_input_size(&mut self, size: FrameSize, slot: usize) -> Result<(), GraphError> {
        self.check_slot(slot)?;
        self.inputs[slot].size = size;
        Ok(())
    }

    fn set_input_rotation(&mut self, rotation: Rotation, slot: usize) -> Result<(), GraphError> {
        self.check_slot(slot)?;
        self.inputs[slot].rotation = rotation;
        Ok(())
    }

    fn frame_ready(
        &mut self,
        time: FrameTime,
        slot: usize,
        context: &mut FrameContext,
    ) -> Result<(), PipelineError> {
        if self.finished {
            return Ok(());
        }
        self.check_slot(slot)?;
        if !self.is_ready() {
            // Wait for the remaining inputs of this generation.
            return Ok(());
        }

        let rendered = if context.prevent_rendering {
            // Draws are suppressed; keep the chain advancing with the
            // previous output when one exists.
            self.output.frame().is_some()
        } else {
            self.render(context)?
        };

        // Input frames are consumed either way; holding them would pin
        // pool buffers across generations.
        for input in &mut self.inputs {
            input.frame = None;
            input.state = SlotState::Claimed;
        }

        if rendered {
            self.output.notify(time, context)?;
        }
        Ok(())
    }

    fn end_processing(&mut self, context: &mut FrameContext) {
        if self.finished {
            return;
        }
        self.finished = true;
        for input in &mut self.inputs {
            input.frame = None;
        }
        context.uniforms.forget_program(self.program.id());
        self.output.propagate_end(context);
    }

    fn ignores_updates(&self) -> bool {
        self.deaf
    }
}

impl FilterNode for Filter {
    fn add_consumer(&mut self, sink: &SinkRef) -> Result<usize, GraphError> {
        self.output.add_consumer(sink)
    }

    fn add_consumer_at(&mut self, sink: &SinkRef, slot: usize) -> Result<(), GraphError> {
        self.output.add_consumer_at(sink, slot)
    }

    fn remove_consumer(&mut self, sink: &SinkRef) {
        self.output.remove_consumer(sink);
    }

    fn remove_all_consumers(&mut self) {
        self.output.remove_all_consumers();
    }
}
