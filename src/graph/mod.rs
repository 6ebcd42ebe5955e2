//! Pipeline node capability pair.
//!
//! The Input capability is the [`FrameSink`] trait; the Output capability
//! is the [`SourceOutput`] struct composed into every producer. Nodes are
//! shared as `Arc<Mutex<_>>` trait objects, but every lock is taken on the
//! render stream thread, so locking is plumbing rather than contention.
//! Graphs must be acyclic.

pub mod filter;
pub mod group;
pub mod sink;
pub mod source;

use std::sync::{Arc, Mutex};

use crate::geometry::{FrameSize, FrameTime, Rotation};
use crate::gpu::pool::{Frame, PoolError};
use crate::gpu::program::ShaderError;
use crate::gpu::stream::FrameContext;
use crate::gpu::GpuError;

/// Malformed-graph errors: signaled immediately, never silently ignored.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("input slot {slot} is out of range (node has {count} slots)")]
    SlotOutOfRange { slot: usize, count: usize },
    #[error("input slot {slot} is already claimed by another producer")]
    SlotTaken { slot: usize },
    #[error("input slot {slot} was never negotiated")]
    SlotUnclaimed { slot: usize },
    #[error("no free input slot available")]
    NoFreeSlot,
    #[error("consumer is already attached at slot {slot}")]
    DuplicateConsumer { slot: usize },
    #[error("filter group declares no attachment for slot {slot}")]
    NoAttachment { slot: usize },
}

/// Umbrella error for graph construction and frame processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Shader error: {0}")]
    Shader(#[from] ShaderError),
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("source pixel data has {actual} bytes, expected {expected}")]
    SourceData { expected: usize, actual: usize },
}

/// The Input capability: a node that accepts frames at negotiated slots.
///
/// All methods are invoked on the render stream.
pub trait FrameSink: Send {
    /// Claim a specific slot for an incoming producer.
    fn claim_slot(&mut self, slot: usize) -> Result<(), GraphError>;

    /// Reserve and return the next slot this node wants its input at.
    fn next_available_slot(&mut self) -> Result<usize, GraphError>;

    /// Give a slot back when its producer detaches.
    fn release_slot(&mut self, slot: usize);

    fn set_input_frame(&mut self, frame: Frame, slot: usize) -> Result<(), GraphError>;
    fn set_input_size(&mut self, size: FrameSize, slot: usize) -> Result<(), GraphError>;
    fn set_input_rotation(&mut self, rotation: Rotation, slot: usize)
        -> Result<(), GraphError>;

    /// Upstream produced a frame for `slot`. A multi-input node defers
    /// work until every claimed slot is populated for this generation.
    fn frame_ready(
        &mut self,
        time: FrameTime,
        slot: usize,
        context: &mut FrameContext,
    ) -> Result<(), PipelineError>;

    /// Cooperative teardown: release held frames, forward to consumers,
    /// and ignore any further notifications.
    fn end_processing(&mut self, context: &mut FrameContext);

    /// A node can go temporarily deaf to upstream notifications, e.g.
    /// during parameter-only reconfiguration.
    fn ignores_updates(&self) -> bool {
        false
    }
}

/// Shared handle to an Input-capable node.
pub type SinkRef = Arc<Mutex<dyn FrameSink>>;

/// A node with both capabilities, addressable for consumer management
/// behind a trait object (what a group's terminal node must expose).
pub trait FilterNode: FrameSink {
    fn add_consumer(&mut self, sink: &SinkRef) -> Result<usize, GraphError>;
    fn add_consumer_at(&mut self, sink: &SinkRef, slot: usize) -> Result<(), GraphError>;
    fn remove_consumer(&mut self, sink: &SinkRef);
    fn remove_all_consumers(&mut self);
}

/// Shared handle to a filter-like node.
pub type NodeRef = Arc<Mutex<dyn FilterNode>>;

/// Coerce a concrete node handle into a [`SinkRef`].
pub fn as_sink<T: FrameSink + 'static>(node: &Arc<Mutex<T>>) -> SinkRef {
    node.clone()
}

/// Coerce a concrete node handle into a [`NodeRef`].
pub fn as_node<T: FilterNode + 'static>(node: &Arc<Mutex<T>>) -> NodeRef {
    node.clone()
}

struct ConsumerLink {
    sink: SinkRef,
    slot: usize,
}

/// The Output capability: ordered consumer set, current output frame and
/// its metadata, notification fan-out.
#[derive(Default)]
pub struct SourceOutput {
    consumers: Vec<ConsumerLink>,
    frame: Option<Frame>,
    size: FrameSize,
    rotation: Rotation,
    last_time: Option<FrameTime>,
}

impl SourceOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a consumer, letting it pick its next free slot.
    pub fn add_consumer(&mut self, sink: &SinkRef) -> Result<usize, GraphError> {
        let slot = sink.lock().unwrap().next_available_slot()?;
        self.attach(sink, slot)?;
        Ok(slot)
    }

    /// Append a consumer at an explicit slot.
    pub fn add_consumer_at(&mut self, sink: &SinkRef, slot: usize) -> Result<(), GraphError> {
        sink.lock().unwrap().claim_slot(slot)?;
        self.attach(sink, slot)
    }

    fn attach(&mut self, sink: &SinkRef, slot: usize) -> Result<(), GraphError> {
        let duplicate = self
            .consumers
            .iter()
            .any(|link| Arc::ptr_eq(&link.sink, sink) && link.slot == slot);
        if duplicate {
            return Err(GraphError::DuplicateConsumer { slot });
        }
        // Late attach: hand over what this producer already knows.
        {
            let mut guard = sink.lock().unwrap();
            if !self.size.is_zero() {
                guard.set_input_size(self.size, slot)?;
                guard.set_input_rotation(self.rotation, slot)?;
            }
            if let Some(frame) = &self.frame {
                guard.set_input_frame(frame.clone(), slot)?;
            }
        }
        self.consumers.push(ConsumerLink {
            sink: sink.clone(),
            slot,
        });
        Ok(())
    }

    /// Detach every link to `sink`; further frames are not delivered to it.
    pub fn remove_consumer(&mut self, sink: &SinkRef) {
        let mut removed = Vec::new();
        self.consumers.retain(|link| {
            if Arc::ptr_eq(&link.sink, sink) {
                removed.push(link.slot);
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            let mut guard = sink.lock().unwrap();
            for slot in removed {
                guard.release_slot(slot);
            }
        }
    }

    pub fn remove_all_consumers(&mut self) {
        for link in self.consumers.drain(..) {
            link.sink.lock().unwrap().release_slot(link.slot);
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn set_frame(&mut self, frame: Option<Frame>) {
        self.frame = frame;
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn set_size(&mut self, size: FrameSize) {
        self.size = size;
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Deliver the current frame to every consumer in attachment order:
    /// frame, then size and rotation metadata, then the ready entry point.
    pub fn notify(
        &mut self,
        time: FrameTime,
        context: &mut FrameContext,
    ) -> Result<(), PipelineError> {
        if let Some(last) = self.last_time {
            if time < last {
                log::warn!(
                    "non-monotonic frame timestamp: {:?} after {:?}",
                    time,
                    last
                );
            }
        }
        self.last_time = Some(time);

        let Some(frame) = self.frame.clone() else {
            return Ok(());
        };
        for link in &self.consumers {
            let mut sink = link.sink.lock().unwrap();
            if sink.ignores_updates() {
                continue;
            }
            sink.set_input_frame(frame.clone(), link.slot)?;
            sink.set_input_size(self.size, link.slot)?;
            sink.set_input_rotation(self.rotation, link.slot)?;
            sink.frame_ready(time, link.slot, context)?;
        }
        Ok(())
    }

    /// Forward teardown to every consumer and drop the held frame.
    pub fn propagate_end(&mut self, context: &mut FrameContext) {
        self.frame = None;
        for link in &self.consumers {
            link.sink.lock().unwrap().end_processing(context);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::gpu::{GpuContext, RenderStream};

    /// Minimal Input-capability stub recording what it is told.
    #[derive(Default)]
    pub struct CountingSink {
        pub claimed: Vec<usize>,
        pub next_slot: usize,
        pub frames: usize,
        pub last_frame: Option<Frame>,
        pub last_size: FrameSize,
        pub last_rotation: Rotation,
        pub ended: bool,
        pub deaf: bool,
        /// Shared delivery log: (order log, this sink's id).
        pub order: Option<(Arc<Mutex<Vec<usize>>>, usize)>,
    }

    impl CountingSink {
        pub fn ordered(order: &Arc<Mutex<Vec<usize>>>, id: usize) -> Self {
            Self {
                order: Some((order.clone(), id)),
                ..Self::default()
            }
        }
    }

    impl FrameSink for CountingSink {
        fn claim_slot(&mut self, slot: usize) -> Result<(), GraphError> {
            if self.claimed.contains(&slot) {
                return Err(GraphError::SlotTaken { slot });
            }
            self.claimed.push(slot);
            self.next_slot = self.next_slot.max(slot + 1);
            Ok(())
        }

        fn next_available_slot(&mut self) -> Result<usize, GraphError> {
            let slot = self.next_slot;
            self.next_slot += 1;
            self.claimed.push(slot);
            Ok(slot)
        }

        fn release_slot(&mut self, slot: usize) {
            self.claimed.retain(|&s| s != slot);
        }

        fn set_input_frame(&mut self, frame: Frame, _slot: usize) -> Result<(), GraphError> {
            self.last_frame = Some(frame);
            Ok(())
        }

        fn set_input_size(&mut self, size: FrameSize, _slot: usize) -> Result<(), GraphError> {
            self.last_size = size;
            Ok(())
        }

        fn set_input_rotation(
            &mut self,
            rotation: Rotation,
            _slot: usize,
        ) -> Result<(), GraphError> {
            self.last_rotation = rotation;
            Ok(())
        }

        fn frame_ready(
            &mut self,
            _time: FrameTime,
            _slot: usize,
            _context: &mut FrameContext,
        ) -> Result<(), PipelineError> {
            self.frames += 1;
            if let Some((order, id)) = &self.order {
                order.lock().unwrap().push(*id);
            }
            Ok(())
        }

        fn end_processing(&mut self, _context: &mut FrameContext) {
            self.ended = true;
        }

        fn ignores_updates(&self) -> bool {
            self.deaf
        }
    }

    pub async fn test_stream() -> Option<RenderStream> {
        let gpu = GpuContext::new().await.ok()?;
        Some(RenderStream::new(Arc::new(gpu)))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{test_stream, CountingSink};
    use super::*;
    use crate::gpu::pool::FrameSpec;

    fn counting(order: &Arc<Mutex<Vec<usize>>>, id: usize) -> Arc<Mutex<CountingSink>> {
        Arc::new(Mutex::new(CountingSink::ordered(order, id)))
    }

    #[tokio::test]
    async fn test_fan_out_notifies_in_attachment_order() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            let order = Arc::new(Mutex::new(Vec::new()));
            let sinks: Vec<_> = (0..3).map(|id| counting(&order, id)).collect();

            let mut output = SourceOutput::new();
            let frame = context
                .pool
                .acquire(FrameSpec::rgba(FrameSize::new(4, 4)))
                .unwrap();
            output.set_size(frame.size());
            output.set_frame(Some(frame));

            for sink in &sinks {
                output.add_consumer(&as_sink(sink)).unwrap();
            }

            output.notify(FrameTime::from_seconds(0.0), context).unwrap();
            output.notify(FrameTime::from_seconds(0.1), context).unwrap();

            assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 0, 1, 2]);
            for sink in &sinks {
                assert_eq!(sink.lock().unwrap().frames, 2);
            }
        });
    }

    #[tokio::test]
    async fn test_removing_consumer_stops_its_deliveries() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            let order = Arc::new(Mutex::new(Vec::new()));
            let first = counting(&order, 0);
            let second = counting(&order, 1);

            let mut output = SourceOutput::new();
            let frame = context
                .pool
                .acquire(FrameSpec::rgba(FrameSize::new(4, 4)))
                .unwrap();
            output.set_size(frame.size());
            output.set_frame(Some(frame));
            output.add_consumer(&as_sink(&first)).unwrap();
            output.add_consumer(&as_sink(&second)).unwrap();

            output.notify(FrameTime::from_seconds(0.0), context).unwrap();
            output.remove_consumer(&as_sink(&first));
            output.notify(FrameTime::from_seconds(0.1), context).unwrap();

            assert_eq!(first.lock().unwrap().frames, 1);
            assert_eq!(second.lock().unwrap().frames, 2);
        });
    }

    #[tokio::test]
    async fn test_duplicate_consumer_slot_rejected() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            let _ = context;
            let sink = Arc::new(Mutex::new(CountingSink::default()));
            let mut output = SourceOutput::new();

            output.add_consumer_at(&as_sink(&sink), 1).unwrap();
            assert!(matches!(
                output.add_consumer_at(&as_sink(&sink), 1),
                Err(GraphError::SlotTaken { slot: 1 })
            ));
            // Same consumer at a different slot is a deliberate
            // multi-input wiring and stays legal.
            output.add_consumer_at(&as_sink(&sink), 0).unwrap();
            assert_eq!(output.consumer_count(), 2);
        });
    }

    #[tokio::test]
    async fn test_deaf_consumer_is_skipped() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            let sink = Arc::new(Mutex::new(CountingSink {
                deaf: true,
                ..CountingSink::default()
            }));
            let mut output = SourceOutput::new();
            let frame = context
                .pool
                .acquire(FrameSpec::rgba(FrameSize::new(4, 4)))
                .unwrap();
            output.set_size(frame.size());
            output.set_frame(Some(frame));
            output.add_consumer(&as_sink(&sink)).unwrap();

            output.notify(FrameTime::from_seconds(0.0), context).unwrap();
            assert_eq!(sink.lock().unwrap().frames, 0);
        });
    }

    #[tokio::test]
    async fn test_end_propagates_to_consumers() {
        let Some(stream) = test_stream().await else {
            return;
        };
        stream.run_sync(|context| {
            let sink = Arc::new(Mutex::new(CountingSink::default()));
            let mut output = SourceOutput::new();
            output.add_consumer(&as_sink(&sink)).unwrap();
            output.propagate_end(context);
            assert!(sink.lock().unwrap().ended);
            assert!(output.frame().is_none());
        });
    }
}
