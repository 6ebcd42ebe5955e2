//! Shader program wrapper.
//!
//! Owns a vertex+fragment WGSL pair, validates both with naga at
//! construction, and reflects the fragment/vertex interface: uniform-block
//! members become named slots (name -> offset/size), texture and sampler
//! globals become the bind-group layout. Attribute declaration happens
//! before [`FilterProgram::link`], which builds the render pipeline exactly
//! once.

use std::sync::atomic::{AtomicU64, Ordering};

use naga::valid::{Capabilities, ValidationFlags, Validator};
use wgpu::Device;

use super::context::FRAME_FORMAT;
use super::uniforms::ProgramId;

/// Errors raised while building or using a shader program. Parse and
/// validation failures carry the human-readable naga log; a program that
/// failed to construct must not be rendered with.
#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("WGSL parse error in {stage} shader:\n{log}")]
    Parse { stage: &'static str, log: String },
    #[error("WGSL validation error in {stage} shader:\n{log}")]
    Validation { stage: &'static str, log: String },
    #[error("{stage} shader has no entry point")]
    MissingEntryPoint { stage: &'static str },
    #[error("shader program is already linked")]
    AlreadyLinked,
    #[error("shader program has not been linked")]
    NotLinked,
    #[error("vertex shader consumes {shader} attributes but {declared} were declared")]
    AttributeMismatch { shader: usize, declared: usize },
    #[error("program samples {expected} textures but {provided} were bound")]
    TextureCountMismatch { expected: usize, provided: usize },
    #[error("vertex and fragment shaders declare conflicting uniform blocks")]
    ConflictingUniformBlocks,
    #[error("program declares a uniform block but no buffer was bound")]
    MissingUniformBuffer,
}

/// One member of the reflected uniform block.
#[derive(Debug, Clone)]
pub struct UniformSlot {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

struct UniformBlock {
    binding: u32,
    slots: Vec<UniformSlot>,
    size: u32,
}

struct Reflection {
    uniform: Option<UniformBlock>,
    textures: Vec<u32>,
    samplers: Vec<u32>,
}

struct Linked {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// A compiled (parsed + validated) vertex/fragment pair, linkable into a
/// render pipeline.
pub struct FilterProgram {
    id: ProgramId,
    vertex_source: String,
    fragment_source: String,
    vertex_entry: String,
    fragment_entry: String,
    attributes: Vec<String>,
    reflection: Reflection,
    linked: Option<Linked>,
}

impl FilterProgram {
    /// Compile a program from WGSL source text. Fails with a retrievable
    /// log on parse or validation errors; the node under construction must
    /// treat that as fatal.
    pub fn new(vertex_source: &str, fragment_source: &str) -> Result<Self, ShaderError> {
        let vertex_module = compile("vertex", vertex_source)?;
        let fragment_module = compile("fragment", fragment_source)?;

        let vertex_entry = entry_point(&vertex_module, naga::ShaderStage::Vertex)
            .ok_or(ShaderError::MissingEntryPoint { stage: "vertex" })?;
        let fragment_entry = entry_point(&fragment_module, naga::ShaderStage::Fragment)
            .ok_or(ShaderError::MissingEntryPoint { stage: "fragment" })?;

        let reflection = reflect(&vertex_module, &fragment_module)?;

        Ok(Self {
            id: ProgramId(NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed)),
            vertex_source: vertex_source.to_owned(),
            fragment_source: fragment_source.to_owned(),
            vertex_entry,
            fragment_entry,
            attributes: Vec::new(),
            reflection,
            linked: None,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    /// Reserve the next attribute index for `name`. Must precede `link`.
    pub fn add_attribute(&mut self, name: &str) -> Result<u32, ShaderError> {
        if self.linked.is_some() {
            return Err(ShaderError::AlreadyLinked);
        }
        self.attributes.push(name.to_owned());
        Ok(self.attributes.len() as u32 - 1)
    }

    /// Index previously reserved for an attribute name.
    pub fn attribute_index(&self, name: &str) -> Option<u32> {
        self.attributes.iter().position(|a| a == name).map(|i| i as u32)
    }

    /// Slot index of a uniform-block member, or `None` when this program
    /// does not use the uniform (callers skip silently).
    pub fn uniform_index(&self, name: &str) -> Option<usize> {
        self.reflection
            .uniform
            .as_ref()?
            .slots
            .iter()
            .position(|slot| slot.name == name)
    }

    pub fn uniform_slot(&self, index: usize) -> Option<&UniformSlot> {
        self.reflection.uniform.as_ref()?.slots.get(index)
    }

    /// Byte size of the uniform block, zero when the program has none.
    pub fn uniform_block_size(&self) -> u32 {
        self.reflection.uniform.as_ref().map_or(0, |block| block.size)
    }

    /// Number of input textures the program samples.
    pub fn texture_count(&self) -> usize {
        self.reflection.textures.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.linked.is_some()
    }

    /// Compile modules and build the render pipeline. Must be called
    /// exactly once, after all attributes are declared.
    pub fn link(&mut self, device: &Device) -> Result<(), ShaderError> {
        if self.linked.is_some() {
            return Err(ShaderError::AlreadyLinked);
        }
        let vertex_inputs = self.attributes.len();

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("filter_vertex"),
            source: wgpu::ShaderSource::Wgsl(self.vertex_source.as_str().into()),
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("filter_fragment"),
            source: wgpu::ShaderSource::Wgsl(self.fragment_source.as_str().into()),
        });

        let bind_group_layout = self.create_bind_group_layout(device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("filter_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        // One tightly packed vec2 buffer per declared attribute.
        let vertex_attributes: Vec<[wgpu::VertexAttribute; 1]> = (0..vertex_inputs)
            .map(|i| {
                [wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: i as u32,
                    format: wgpu::VertexFormat::Float32x2,
                }]
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = vertex_attributes
            .iter()
            .map(|attributes| wgpu::VertexBufferLayout {
                array_stride: 8,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("filter_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some(&self.vertex_entry),
                buffers: &vertex_buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some(&self.fragment_entry),
                targets: &[Some(wgpu::ColorTargetState {
                    format: FRAME_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        self.linked = Some(Linked {
            pipeline,
            bind_group_layout,
        });
        Ok(())
    }

    fn create_bind_group_layout(&self, device: &Device) -> wgpu::BindGroupLayout {
        let mut entries = Vec::new();
        if let Some(block) = &self.reflection.uniform {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: block.binding,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        for &binding in &self.reflection.textures {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        for &binding in &self.reflection.samplers {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("filter_bind_group_layout"),
            entries: &entries,
        })
    }

    pub fn pipeline(&self) -> Result<&wgpu::RenderPipeline, ShaderError> {
        self.linked
            .as_ref()
            .map(|linked| &linked.pipeline)
            .ok_or(ShaderError::NotLinked)
    }

    /// Assemble the per-draw bind group: the uniform buffer (when the
    /// program has a block), one view per sampled texture in slot order,
    /// and the shared sampler.
    pub fn create_bind_group(
        &self,
        device: &Device,
        uniform_buffer: Option<&wgpu::Buffer>,
        textures: &[&wgpu::TextureView],
        sampler: &wgpu::Sampler,
    ) -> Result<wgpu::BindGroup, ShaderError> {
        let linked = self.linked.as_ref().ok_or(ShaderError::NotLinked)?;
        if textures.len() != self.reflection.textures.len() {
            return Err(ShaderError::TextureCountMismatch {
                expected: self.reflection.textures.len(),
                provided: textures.len(),
            });
        }

        let mut entries = Vec::new();
        if let Some(block) = &self.reflection.uniform {
            let buffer = uniform_buffer.ok_or(ShaderError::MissingUniformBuffer)?;
            entries.push(wgpu::BindGroupEntry {
                binding: block.binding,
                resource: buffer.as_entire_binding(),
            });
        }
        for (&binding, view) in self.reflection.textures.iter().zip(textures) {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        for &binding in &self.reflection.samplers {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("filter_bind_group"),
            layout: &linked.bind_group_layout,
            entries: &entries,
        }))
    }

    /// Cross-check the declared attribute list against the vertex entry
    /// point. Invoked by `link` callers that built the attribute list from
    /// user input.
    pub fn verify_attributes(&self) -> Result<(), ShaderError> {
        let module = compile("vertex", &self.vertex_source)?;
        let consumed = module
            .entry_points
            .iter()
            .find(|ep| ep.stage == naga::ShaderStage::Vertex)
            .map(|ep| {
                ep.function
                    .arguments
                    .iter()
                    .filter(|arg| {
                        matches!(arg.binding, Some(naga::Binding::Location { .. }))
                    })
                    .count()
            })
            .unwrap_or(0);
        if consumed != self.attributes.len() {
            return Err(ShaderError::AttributeMismatch {
                shader: consumed,
                declared: self.attributes.len(),
            });
        }
        Ok(())
    }
}

fn compile(stage: &'static str, source: &str) -> Result<naga::Module, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| ShaderError::Parse {
        stage,
        log: err.emit_to_string(source),
    })?;
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| ShaderError::Validation {
            stage,
            log: err.emit_to_string(source),
        })?;
    Ok(module)
}

fn entry_point(module: &naga::Module, stage: naga::ShaderStage) -> Option<String> {
    module
        .entry_points
        .iter()
        .find(|ep| ep.stage == stage)
        .map(|ep| ep.name.clone())
}

fn reflect(
    vertex: &naga::Module,
    fragment: &naga::Module,
) -> Result<Reflection, ShaderError> {
    let mut uniform = None;
    let mut textures = Vec::new();
    let mut samplers = Vec::new();

    for module in [vertex, fragment] {
        for (_, var) in module.global_variables.iter() {
            let Some(ref resource) = var.binding else {
                continue;
            };
            if resource.group != 0 {
                continue;
            }
            match (&var.space, &module.types[var.ty].inner) {
                (naga::AddressSpace::Uniform, naga::TypeInner::Struct { members, span }) => {
                    let slots: Vec<UniformSlot> = members
                        .iter()
                        .map(|member| UniformSlot {
                            name: member.name.clone().unwrap_or_default(),
                            offset: member.offset,
                            size: module.types[member.ty].inner.size(module.to_ctx()),
                        })
                        .collect();
                    match &uniform {
                        None => {
                            uniform = Some(UniformBlock {
                                binding: resource.binding,
                                slots,
                                size: *span,
                            });
                        }
                        Some(existing) if existing.binding == resource.binding => {}
                        Some(_) => return Err(ShaderError::ConflictingUniformBlocks),
                    }
                }
                (_, naga::TypeInner::Image { .. }) => {
                    if !textures.contains(&resource.binding) {
                        textures.push(resource.binding);
                    }
                }
                (_, naga::TypeInner::Sampler { .. }) => {
                    if !samplers.contains(&resource.binding) {
                        samplers.push(resource.binding);
                    }
                }
                _ => {}
            }
        }
    }

    textures.sort_unstable();
    samplers.sort_unstable();
    Ok(Reflection {
        uniform,
        textures,
        samplers,
    })
}
