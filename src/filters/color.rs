//! Single-pass color filters.

use crate::graph::filter::Filter;
use crate::graph::PipelineError;
use crate::gpu::stream::FrameContext;

use super::delegate_filter_node;

const HUE_FRAGMENT_SHADER: &str = include_str!("shaders/hue.wgsl");
const MONOCHROME_FRAGMENT_SHADER: &str = include_str!("shaders/monochrome.wgsl");
const RGB_FRAGMENT_SHADER: &str = include_str!("shaders/rgb_adjust.wgsl");

/// Rotates hue through YIQ space. Default adjustment is 90 degrees.
pub struct HueFilter {
    filter: Filter,
}

impl HueFilter {
    pub fn new(context: &FrameContext) -> Result<Self, PipelineError> {
        let filter = Filter::new(context, HUE_FRAGMENT_SHADER)?;
        let mut hue = Self { filter };
        hue.set_hue(90.0);
        Ok(hue)
    }

    /// Hue adjustment in degrees; wraps at full turns.
    pub fn set_hue(&mut self, degrees: f32) {
        let radians = (degrees % 360.0).to_radians();
        self.filter.set_float("hue_adjust", radians);
    }
}

delegate_filter_node!(HueFilter => filter);

/// Desaturates toward an overlay-blended tint.
pub struct MonochromeFilter {
    filter: Filter,
}

impl MonochromeFilter {
    pub fn new(context: &FrameContext) -> Result<Self, PipelineError> {
        let mut filter = Filter::new(context, MONOCHROME_FRAGMENT_SHADER)?;
        filter.set_float("intensity", 1.0);
        filter.set_vec3("filter_color", [0.6, 0.45, 0.3]);
        Ok(Self { filter })
    }

    /// Blend between the original (0.0) and fully monochrome (1.0).
    pub fn set_intensity(&mut self, intensity: f32) {
        self.filter.set_float("intensity", intensity);
    }

    pub fn set_color(&mut self, red: f32, green: f32, blue: f32) {
        self.filter.set_vec3("filter_color", [red, green, blue]);
    }
}

delegate_filter_node!(MonochromeFilter => filter);

/// Independent per-channel multipliers, 1.0 each by default.
pub struct RgbFilter {
    filter: Filter,
}

impl RgbFilter {
    pub fn new(context: &FrameContext) -> Result<Self, PipelineError> {
        let mut filter = Filter::new(context, RGB_FRAGMENT_SHADER)?;
        filter.set_float("red", 1.0);
        filter.set_float("green", 1.0);
        filter.set_float("blue", 1.0);
        Ok(Self { filter })
    }

    pub fn set_red(&mut self, red: f32) {
        self.filter.set_float("red", red);
    }

    pub fn set_green(&mut self, green: f32) {
        self.filter.set_float("green", green);
    }

    pub fn set_blue(&mut self, blue: f32) {
        self.filter.set_float("blue", blue);
    }
}

delegate_filter_node!(RgbFilter => filter);
