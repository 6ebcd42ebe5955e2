//! Framechain Core
//!
//! GPU frame-filter graph: sources push frames through a directed graph of
//! shader passes rendering into pooled textures.
//!
//! # Features
//!
//! - Producer/consumer node graph with ordered fan-out and slot negotiation
//! - Pooled GPU frame buffers with exact-match reuse and memory-pressure shedding
//! - WGSL shader programs with naga-reflected named uniforms
//! - Redundant uniform writes skipped through a per-program state cache
//! - Rotation-aware quad geometry normalizing sensor/device orientation
//! - Single- and multi-pass filters (Gaussian blur, Sobel edges, selective
//!   blur, unsharp mask, color adjustments) built by composition
//! - One serial render stream; all graph work marshals onto it

pub mod filters;
pub mod geometry;
pub mod gpu;
pub mod graph;

// Re-export commonly used types
pub use filters::{
    GaussianBlurFilter, GaussianSelectiveBlurFilter, HueFilter, MonochromeFilter, RgbFilter,
    SobelEdgeDetectionFilter, TwoPassFilter, UnsharpMaskFilter, DEFAULT_VERTEX_SHADER,
    PASSTHROUGH_FRAGMENT_SHADER, TWO_INPUT_VERTEX_SHADER,
};
pub use geometry::{
    quad_positions, rotated_point, rotated_size, scaled_quad_positions, texture_coordinates,
    FrameSize, FrameTime, Rotation,
};
pub use gpu::{
    FilterProgram, Frame, FrameContext, FramePool, FrameSpec, GpuContext, GpuError, PoolError,
    ProgramId, RenderStream, ShaderError, UniformStateCache, UniformValue, FRAME_FORMAT,
};
pub use graph::{
    as_node, as_sink, filter::Filter, group::FilterGroup, sink::PixelSink, source::PixelSource,
    FilterNode, FrameSink, GraphError, NodeRef, PipelineError, SinkRef, SourceOutput,
};
