//! Unsharp mask.
//!
//! Fan-in group: the input feeds a Gaussian blur branch and a two-input
//! composite that extrapolates the sharp original away from the blurred
//! copy. Intensity 0.0 yields the blur, 1.0 the original, and values
//! above 1.0 sharpen.

use std::sync::{Arc, Mutex};

use crate::graph::filter::Filter;
use crate::graph::group::FilterGroup;
use crate::graph::{as_node, as_sink, FilterNode, PipelineError};
use crate::gpu::stream::FrameContext;

use super::blur::GaussianBlurFilter;
use super::delegate_filter_node;

const UNSHARP_MASK_FRAGMENT_SHADER: &str = include_str!("shaders/unsharp_mask.wgsl");

pub struct UnsharpMaskFilter {
    group: FilterGroup,
    blur: Arc<Mutex<GaussianBlurFilter>>,
    composite: Arc<Mutex<Filter>>,
}

impl UnsharpMaskFilter {
    pub fn new(context: &FrameContext) -> Result<Self, PipelineError> {
        let blur = Arc::new(Mutex::new(GaussianBlurFilter::with_radius(context, 4.0)?));

        let mut mask = Filter::with_two_inputs(context, UNSHARP_MASK_FRAGMENT_SHADER)?;
        mask.set_float("intensity", 1.0);
        let composite = Arc::new(Mutex::new(mask));

        // Sharp original at the composite's first input, blur at the
        // second.
        blur.lock()
            .unwrap()
            .add_consumer_at(&as_sink(&composite), 1)?;

        let mut group = FilterGroup::new(as_node(&composite));
        group.add_node(as_node(&blur));
        group.add_node(as_node(&composite));
        group.add_attachment(0, &as_sink(&composite), 0)?;
        group.add_attachment(0, &as_sink(&blur), 0)?;

        Ok(Self {
            group,
            blur,
            composite,
        })
    }

    /// Strength of the sharpening, from 0.0 on up, default 1.0.
    pub fn set_intensity(&mut self, intensity: f32) {
        self.composite.lock().unwrap().set_float("intensity", intensity);
    }

    pub fn set_blur_radius_in_pixels(&mut self, radius: f32) {
        self.blur.lock().unwrap().set_blur_radius_in_pixels(radius);
    }
}

delegate_filter_node!(UnsharpMaskFilter => group);
