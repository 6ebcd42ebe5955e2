//! Composite filter node.
//!
//! A `FilterGroup` hides an internal sub-graph behind the single node
//! capability pair. Its Input side forwards to an explicit attachment
//! table (group slot -> internal (node, slot) pairs, supporting fan-in);
//! its Output side delegates to the terminal node's consumer set, so
//! external consumers hear about each terminal frame exactly once.

use crate::geometry::{FrameSize, FrameTime, Rotation};
use crate::gpu::pool::Frame;
use crate::gpu::stream::FrameContext;

use super::{FilterNode, FrameSink, GraphError, NodeRef, PipelineError, SinkRef};

struct Attachment {
    sink: SinkRef,
    slot: usize,
}

/// A sub-graph of nodes exposed as one filter.
pub struct FilterGroup {
    nodes: Vec<NodeRef>,
    attachments: Vec<Vec<Attachment>>,
    claimed: Vec<bool>,
    terminal: NodeRef,
    finished: bool,
    deaf: bool,
}

impl FilterGroup {
    /// Group whose Output side is `terminal`'s. Input attachments are
    /// declared afterwards with [`FilterGroup::add_attachment`].
    pub fn new(terminal: NodeRef) -> Self {
        Self {
            nodes: Vec::new(),
            attachments: Vec::new(),
            claimed: Vec::new(),
            terminal,
            finished: false,
            deaf: false,
        }
    }

    /// Register an internal node for bookkeeping and teardown.
    pub fn add_node(&mut self, node: NodeRef) {
        self.nodes.push(node);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_at(&self, index: usize) -> Option<NodeRef> {
        self.nodes.get(index).cloned()
    }

    pub fn terminal(&self) -> NodeRef {
        self.terminal.clone()
    }

    /// Route group input slot `group_slot` to `slot` on an internal node.
    /// The internal slot is claimed here; a group slot may fan in to
    /// several internal nodes.
    pub fn add_attachment(
        &mut self,
        group_slot: usize,
        sink: &SinkRef,
        slot: usize,
    ) -> Result<(), GraphError> {
        sink.lock().unwrap().claim_slot(slot)?;
        if self.attachments.len() <= group_slot {
            self.attachments.resize_with(group_slot + 1, Vec::new);
            self.claimed.resize(group_slot + 1, false);
        }
        self.attachments[group_slot].push(Attachment {
            sink: sink.clone(),
            slot,
        });
        Ok(())
    }

    /// Go deaf to upstream notifications during reconfiguration.
    pub fn set_ignore_updates(&mut self, ignore: bool) {
        self.deaf = ignore;
    }

    fn check_slot(&self, slot: usize) -> Result<(), GraphError> {
        if slot >= self.attachments.len() {
            return Err(GraphError::SlotOutOfRange {
                slot,
                count: self.attachments.len(),
            });
        }
        if self.attachments[slot].is_empty() {
            return Err(GraphError::NoAttachment { slot });
        }
        if !self.claimed[slot] {
            return Err(GraphError::SlotUnclaimed { slot });
        }
        Ok(())
    }
}

impl FrameSink for FilterGroup {
    fn claim_slot(&mut self, slot: usize) -> Result<(), GraphError> {
        if slot >= self.attachments.len() {
            return Err(GraphError::SlotOutOfRange {
                slot,
                count: self.attachments.len(),
            });
        }
        if self.claimed[slot] {
            return Err(GraphError::SlotTaken { slot });
        }
        self.claimed[slot] = true;
        Ok(())
    }

    fn next_available_slot(&mut self) -> Result<usize, GraphError> {
        let slot = self
            .claimed
            .iter()
            .position(|claimed| !claimed)
            .ok_or(GraphError::NoFreeSlot)?;
        self.claimed[slot] = true;
        Ok(slot)
    }

    fn release_slot(&mut self, slot: usize) {
        if let Some(claimed) = self.claimed.get_mut(slot) {
            *claimed = false;
        }
    }

    fn set_input_frame(&mut self, frame: Frame, slot: usize) -> Result<(), GraphError> {
        self.check_slot(slot)?;
        for attachment in &self.attachments[slot] {
            attachment
                .sink
                .lock()
                .unwrap()
                .set_input_frame(frame.clone(), attachment.slot)?;
        }
        Ok(())
    }

    fn set_input_size(&mut self, size: FrameSize, slot: usize) -> Result<(), GraphError> {
        self.check_slot(slot)?;
        for attachment in &self.attachments[slot] {
            attachment
                .sink
                .lock()
                .unwrap()
                .set_input_size(size, attachment.slot)?;
        }
        Ok(())
    }

    fn set_input_rotation(&mut self, rotation: Rotation, slot: usize) -> Result<(), GraphError> {
        self.check_slot(slot)?;
        for attachment in &self.attachments[slot] {
            attachment
                .sink
                .lock()
                .unwrap()
                .set_input_rotation(rotation, attachment.slot)?;
        }
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
        for attachment in &self.attachments[slot] {
            attachment
                .sink
                .lock()
                .unwrap()
                .frame_ready(time, attachment.slot, context)?;
        }
        Ok(())
    }

    fn end_processing(&mut self, context: &mut FrameContext) {
        if self.finished {
            return;
        }
        self.finished = true;
        for routes in &self.attachments {
            for attachment in routes {
                attachment.sink.lock().unwrap().end_processing(context);
            }
        }
    }

    fn ignores_updates(&self) -> bool {
        self.deaf
    }
}

impl FilterNode for FilterGroup {
    fn add_consumer(&mut self, sink: &SinkRef) -> Result<usize, GraphError> {
        self.terminal.lock().unwrap().add_consumer(sink)
    }

    fn add_consumer_at(&mut self, sink: &SinkRef, slot: usize) -> Result<(), GraphError> {
        self.terminal.lock().unwrap().add_consumer_at(sink, slot)
    }

    fn remove_consumer(&mut self, sink: &SinkRef) {
        self.terminal.lock().unwrap().remove_consumer(sink);
    }

    fn remove_all_consumers(&mut self) {
        self.terminal.lock().unwrap().remove_all_consumers();
    }
}
