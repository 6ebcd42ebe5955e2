//! Two chained single-pass stages behind one node.
//!
//! Building block for the separable filters: the group's input feeds the
//! first stage, the second stage is the terminal, and wrappers configure
//! both stages through [`TwoPassFilter::for_each_stage`].

use std::sync::{Arc, Mutex};

use crate::graph::filter::Filter;
use crate::graph::group::FilterGroup;
use crate::graph::{as_node, as_sink, FilterNode, PipelineError};
use crate::gpu::stream::FrameContext;

use super::delegate_filter_node;

pub struct TwoPassFilter {
    group: FilterGroup,
    first: Arc<Mutex<Filter>>,
    second: Arc<Mutex<Filter>>,
}

impl TwoPassFilter {
    pub fn new(
        context: &FrameContext,
        first_vertex: &str,
        first_fragment: &str,
        second_vertex: &str,
        second_fragment: &str,
    ) -> Result<Self, PipelineError> {
        let first = Arc::new(Mutex::new(Filter::with_shaders(
            context,
            first_vertex,
            first_fragment,
        )?));
        let second = Arc::new(Mutex::new(Filter::with_shaders(
            context,
            second_vertex,
            second_fragment,
        )?));
        first.lock().unwrap().add_consumer(&as_sink(&second))?;

        let mut group = FilterGroup::new(as_node(&second));
        group.add_node(as_node(&first));
        group.add_node(as_node(&second));
        group.add_attachment(0, &as_sink(&first), 0)?;

        Ok(Self {
            group,
            first,
            second,
        })
    }

    /// Same shader pair for both stages (the separable-blur case).
    pub fn symmetric(
        context: &FrameContext,
        vertex: &str,
        fragment: &str,
    ) -> Result<Self, PipelineError> {
        Self::new(context, vertex, fragment, vertex, fragment)
    }

    pub fn first(&self) -> Arc<Mutex<Filter>> {
        self.first.clone()
    }

    pub fn second(&self) -> Arc<Mutex<Filter>> {
        self.second.clone()
    }

    /// Apply a configuration closure to both stages.
    pub fn for_each_stage(&self, mut configure: impl FnMut(&mut Filter)) {
        configure(&mut self.first.lock().unwrap());
        configure(&mut self.second.lock().unwrap());
    }
}

delegate_filter_node!(TwoPassFilter => group);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{DEFAULT_VERTEX_SHADER, PASSTHROUGH_FRAGMENT_SHADER};
    use crate::geometry::{FrameSize, FrameTime};
    use crate::graph::sink::PixelSink;
    use crate::graph::source::PixelSource;
    use crate::graph::testing::test_stream;

    #[tokio::test]
    async fn test_two_passthrough_stages_preserve_pixels() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            let passes = Arc::new(Mutex::new(
                TwoPassFilter::symmetric(
                    context,
                    DEFAULT_VERTEX_SHADER,
                    PASSTHROUGH_FRAGMENT_SHADER,
                )
                .unwrap(),
            ));
            let sink = Arc::new(Mutex::new(PixelSink::new()));
            passes
                .lock()
                .unwrap()
                .add_consumer(&as_sink(&sink))
                .unwrap();

            let pixels: Vec<u8> = [40u8, 80, 120, 255].repeat(4 * 4);
            let mut source =
                PixelSource::from_pixels(context, &pixels, FrameSize::new(4, 4)).unwrap();
            source.add_consumer(&as_sink(&passes)).unwrap();

            source
                .process_frame(FrameTime::from_seconds(0.0), context)
                .unwrap();

            let sink = sink.lock().unwrap();
            assert_eq!(sink.frames_received(), 1);
            let image = sink.latest_image(context).unwrap();
            for pixel in image.pixels() {
                assert!(pixel.0[0].abs_diff(40) <= 1);
                assert!(pixel.0[1].abs_diff(80) <= 1);
                assert!(pixel.0[2].abs_diff(120) <= 1);
            }
        });
    }
}
