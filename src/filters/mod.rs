//! Stock filters built from the graph primitives.
//!
//! Concrete filters are thin configurations: a fragment shader, default
//! parameter values, and typed setters resolved through the reflected
//! uniform block. Multi-pass variants compose [`TwoPassFilter`] and
//! [`FilterGroup`](crate::graph::group::FilterGroup) rather than
//! subclassing anything.

pub mod blur;
pub mod color;
pub mod edges;
pub mod selective;
pub mod two_pass;
pub mod unsharp;

pub use blur::GaussianBlurFilter;
pub use color::{HueFilter, MonochromeFilter, RgbFilter};
pub use edges::SobelEdgeDetectionFilter;
pub use selective::GaussianSelectiveBlurFilter;
pub use two_pass::TwoPassFilter;
pub use unsharp::UnsharpMaskFilter;

/// Stock vertex shader for single-input filters.
pub const DEFAULT_VERTEX_SHADER: &str = include_str!("shaders/default_vertex.wgsl");

/// Stock vertex shader for two-input filters.
pub const TWO_INPUT_VERTEX_SHADER: &str = include_str!("shaders/two_input_vertex.wgsl");

/// Identity fragment shader.
pub const PASSTHROUGH_FRAGMENT_SHADER: &str = include_str!("shaders/passthrough.wgsl");

/// Forward both node capabilities to an inner field, so a wrapper struct
/// slots into the graph exactly like the node it configures.
macro_rules! delegate_filter_node {
    ($type:ty => $field:ident) => {
        impl $crate::graph::FrameSink for $type {
            fn claim_slot(
                &mut self,
                slot: usize,
            ) -> ::std::result::Result<(), $crate::graph::GraphError> {
                self.$field.claim_slot(slot)
            }

            fn next_available_slot(
                &mut self,
            ) -> ::std::result::Result<usize, $crate::graph::GraphError> {
                self.$field.next_available_slot()
            }

            fn release_slot(&mut self, slot: usize) {
                self.$field.release_slot(slot)
            }

            fn set_input_frame(
                &mut self,
                frame: $crate::gpu::Frame,
                slot: usize,
            ) -> ::std::result::Result<(), $crate::graph::GraphError> {
                self.$field.set_input_frame(frame, slot)
            }

            fn set_input_size(
                &mut self,
                size: $crate::geometry::FrameSize,
                slot: usize,
            ) -> ::std::result::Result<(), $crate::graph::GraphError> {
                self.$field.set_input_size(size, slot)
            }

            fn set_input_rotation(
                &mut self,
                rotation: $crate::geometry::Rotation,
                slot: usize,
            ) -> ::std::result::Result<(), $crate::graph::GraphError> {
                self.$field.set_input_rotation(rotation, slot)
            }

            fn frame_ready(
                &mut self,
                time: $crate::geometry::FrameTime,
                slot: usize,
                context: &mut $crate::gpu::FrameContext,
            ) -> ::std::result::Result<(), $crate::graph::PipelineError> {
                self.$field.frame_ready(time, slot, context)
            }

            fn end_processing(&mut self, context: &mut $crate::gpu::FrameContext) {
                self.$field.end_processing(context)
            }

            fn ignores_updates(&self) -> bool {
                self.$field.ignores_updates()
            }
        }

        impl $crate::graph::FilterNode for $type {
            fn add_consumer(
                &mut self,
                sink: &$crate::graph::SinkRef,
            ) -> ::std::result::Result<usize, $crate::graph::GraphError> {
                self.$field.add_consumer(sink)
            }

            fn add_consumer_at(
                &mut self,
                sink: &$crate::graph::SinkRef,
                slot: usize,
            ) -> ::std::result::Result<(), $crate::graph::GraphError> {
                self.$field.add_consumer_at(sink, slot)
            }

            fn remove_consumer(&mut self, sink: &$crate::graph::SinkRef) {
                self.$field.remove_consumer(sink)
            }

            fn remove_all_consumers(&mut self) {
                self.$field.remove_all_consumers()
            }
        }
    };
}
pub(crate) use delegate_filter_node;
