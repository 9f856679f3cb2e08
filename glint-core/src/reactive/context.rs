//! Reactive Context
//!
//! The reactive context tracks which computation is currently reading.
//! This enables automatic dependency tracking: when a cell or derived node
//! is read, the read is recorded in the innermost frame.
//!
//! # Implementation
//!
//! Each runtime owns an explicit stack of frames. Entering a computation
//! (a derived evaluation, an effect run, a `capture` call or an untracked
//! section) pushes a frame; the returned guard pops it.
//!
//! Frames come in three kinds:
//!
//! - `Owned`: belongs to a derived node or effect. Its reads become that
//!   node's dependencies and are not forwarded to outer frames, so an outer
//!   reader only records the inner node itself.
//! - `Capture`: a plain `Runtime::capture`. Its reads are also forwarded to
//!   the enclosing frame when it closes.
//! - `Untracked`: swallows every read.

use std::cell::RefCell;

use indexmap::IndexMap;

use crate::graph::NodeId;

/// What a frame on the context stack belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Owned(NodeId),
    Capture,
    Untracked,
}

/// An entry in the reactive context stack.
#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    /// Nodes read in this frame, with the version observed at first read.
    reads: IndexMap<NodeId, u64>,
}

/// The stack of active reading frames for one runtime.
#[derive(Debug, Default)]
pub struct ReactiveContext {
    stack: RefCell<Vec<Frame>>,
}

impl ReactiveContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new frame. Reads are recorded into it until the returned
    /// guard is finished or dropped.
    pub fn enter(&self, kind: FrameKind) -> ContextGuard<'_> {
        let mut stack = self.stack.borrow_mut();
        stack.push(Frame {
            kind,
            reads: IndexMap::new(),
        });

        ContextGuard {
            context: self,
            depth: stack.len(),
            finished: false,
        }
    }

    /// Check if reads are currently being recorded.
    pub fn is_tracking(&self) -> bool {
        self.stack
            .borrow()
            .last()
            .map(|frame| frame.kind != FrameKind::Untracked)
            .unwrap_or(false)
    }

    /// The node whose evaluation owns the innermost owned frame, if any.
    pub fn current_owner(&self) -> Option<NodeId> {
        self.stack
            .borrow()
            .iter()
            .rev()
            .find_map(|frame| match frame.kind {
                FrameKind::Owned(id) => Some(id),
                _ => None,
            })
    }

    /// Record a read of `node_id` at `version` in the innermost frame.
    pub fn record(&self, node_id: NodeId, version: u64) {
        let mut stack = self.stack.borrow_mut();
        if let Some(frame) = stack.last_mut() {
            match frame.kind {
                FrameKind::Untracked => {}
                FrameKind::Owned(owner) if owner == node_id => {}
                _ => {
                    frame.reads.entry(node_id).or_insert(version);
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    fn pop(&self, depth: usize) -> Option<Frame> {
        let mut stack = self.stack.borrow_mut();
        debug_assert_eq!(
            stack.len(),
            depth,
            "ReactiveContext mismatch: expected depth {}, got {}",
            depth,
            stack.len()
        );

        let frame = stack.pop()?;

        // Plain captures compose with whatever encloses them.
        if frame.kind == FrameKind::Capture {
            if let Some(parent) = stack.last_mut() {
                if parent.kind != FrameKind::Untracked {
                    for (id, version) in &frame.reads {
                        if parent.kind != FrameKind::Owned(*id) {
                            parent.reads.entry(*id).or_insert(*version);
                        }
                    }
                }
            }
        }

        Some(frame)
    }
}

/// Guard that pops its frame when finished or dropped.
///
/// Dropping without finishing (e.g. during a panic) still restores the
/// stack, so a failed evaluation never leaves a stale frame behind.
pub struct ContextGuard<'a> {
    context: &'a ReactiveContext,
    depth: usize,
    finished: bool,
}

impl ContextGuard<'_> {
    /// Pop the frame and return what was read in it.
    pub fn finish(mut self) -> IndexMap<NodeId, u64> {
        self.finished = true;
        self.context
            .pop(self.depth)
            .map(|frame| frame.reads)
            .unwrap_or_default()
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.context.pop(self.depth);
        }
    }
}
