use super::node::{NodeIndex, ParsedNode};
use super::profile::ProfileModel;

/// A frame leaving the stack.
#[derive(Debug, Clone, Copy)]
pub struct FrameClose<'a> {
    pub depth: u32,
    pub node: &'a ParsedNode,
    /// Timestamp the frame was opened at.
    pub start: f64,
    /// Time the frame was on the stack, children included.
    pub total: f64,
    /// `total` minus the total of every child frame.
    pub self_time: f64,
}

/// Receives the balanced open/close stream produced by
/// [`ProfileModel::for_each_frame`].
pub trait FrameVisitor {
    fn open(&mut self, depth: u32, node: &ParsedNode, timestamp: f64);
    fn close(&mut self, frame: FrameClose<'_>);
}

/// Owned form of a traversal event.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Open {
        depth: u32,
        node_id: u64,
        timestamp: f64,
    },
    Close {
        depth: u32,
        node_id: u64,
        start: f64,
        total: f64,
        self_time: f64,
    },
}

impl FrameEvent {
    pub fn node_id(&self) -> u64 {
        match self {
            FrameEvent::Open { node_id, .. } | FrameEvent::Close { node_id, .. } => *node_id,
        }
    }
}

impl FrameVisitor for Vec<FrameEvent> {
    fn open(&mut self, depth: u32, node: &ParsedNode, timestamp: f64) {
        self.push(FrameEvent::Open {
            depth,
            node_id: node.id,
            timestamp,
        });
    }

    fn close(&mut self, frame: FrameClose<'_>) {
        self.push(FrameEvent::Close {
            depth: frame.depth,
            node_id: frame.node.id,
            start: frame.start,
            total: frame.total,
            self_time: frame.self_time,
        });
    }
}

/// Per-stack-level start times and accumulated child durations.
///
/// Slot 0 sits below the first real frame so a closing frame can always
/// credit its parent slot. Reused across traversals.
#[derive(Debug, Clone, Default)]
pub(crate) struct StackScratch {
    start_times: Vec<f64>,
    children_duration: Vec<f64>,
}

impl StackScratch {
    fn reset(&mut self, len: usize) {
        self.start_times.clear();
        self.start_times.resize(len, 0.0);
        self.children_duration.clear();
        self.children_duration.resize(len, 0.0);
    }
}

struct Replay<'m, V> {
    nodes: &'m [ParsedNode],
    scratch: &'m mut StackScratch,
    visitor: &'m mut V,
    top: usize,
}

impl<V: FrameVisitor> Replay<'_, V> {
    fn depth(&self, node: NodeIndex) -> u32 {
        self.nodes[node.0].depth
    }

    fn open(&mut self, depth: u32, node: NodeIndex, timestamp: f64) {
        self.visitor.open(depth, &self.nodes[node.0], timestamp);
        self.top += 1;
        self.scratch.start_times[self.top] = timestamp;
        self.scratch.children_duration[self.top] = 0.0;
    }

    fn close(&mut self, depth: u32, node: NodeIndex, timestamp: f64) {
        let start = self.scratch.start_times[self.top];
        let total = timestamp - start;
        self.scratch.children_duration[self.top - 1] += total;
        let self_time = total - self.scratch.children_duration[self.top];
        self.top -= 1;
        self.visitor.close(FrameClose {
            depth,
            node: &self.nodes[node.0],
            start,
            total,
            self_time,
        });
    }
}

impl ProfileModel {
    /// Replay every sample as frame open/close events.
    pub fn for_each_frame<V: FrameVisitor>(&mut self, visitor: &mut V) {
        self.for_each_frame_in(visitor, f64::NEG_INFINITY, f64::INFINITY);
    }

    /// Replay the samples with timestamps in `[start, stop)`.
    ///
    /// Frames still open when the window ends are closed at
    /// `min(stop, end_time)`, deepest first. The root itself never produces
    /// events. Garbage collector samples carry no stack, so the collector
    /// frame is opened on top of whatever was running before it.
    pub fn for_each_frame_in<V: FrameVisitor>(&mut self, visitor: &mut V, start: f64, stop: f64) {
        let samples = &self.samples;
        if samples.is_empty() {
            return;
        }
        let timestamps = &self.timestamps;
        let id_to_node = &self.id_to_node;
        let gc = self.gc_node;
        let close_time = if stop.is_finite() {
            stop.min(self.end_time)
        } else {
            self.end_time
        };

        // One spare slot below the root level, one above for GC on top of
        // the deepest frame.
        let scratch = self.scratch.get_or_insert_with(StackScratch::default);
        scratch.reset(self.max_depth as usize + 3);

        let mut replay = Replay {
            nodes: &self.nodes,
            scratch,
            visitor,
            top: 0,
        };

        let mut prev = NodeIndex::ROOT;
        let mut gc_parent: Option<NodeIndex> = None;
        let mut pending = Vec::new();

        let first = timestamps[..samples.len()].partition_point(|&t| t < start);
        for (&id, &timestamp) in samples[first..].iter().zip(&timestamps[first..]) {
            if timestamp >= stop {
                break;
            }
            let Some(&node) = id_to_node.get(&id) else {
                continue;
            };
            if node == prev {
                continue;
            }

            if Some(node) == gc {
                gc_parent = Some(prev);
                replay.open(replay.depth(prev) + 1, node, timestamp);
                prev = node;
                continue;
            }

            let mut prev_node = prev;
            if Some(prev) == gc
                && let Some(parent) = gc_parent.take()
            {
                replay.close(replay.depth(parent) + 1, prev, timestamp);
                prev_node = parent;
            }

            // Collect the new path down to the old stack's depth.
            let mut cursor = Some(node);
            while let Some(current) = cursor
                && replay.depth(current) > replay.depth(prev_node)
            {
                pending.push(current);
                cursor = replay.nodes[current.0].parent;
            }

            // Unwind the old path until both meet at the common ancestor.
            while cursor != Some(prev_node) {
                replay.close(replay.depth(prev_node), prev_node, timestamp);
                if let Some(current) = cursor
                    && replay.depth(current) == replay.depth(prev_node)
                {
                    pending.push(current);
                    cursor = replay.nodes[current.0].parent;
                }
                match replay.nodes[prev_node.0].parent {
                    Some(parent) => prev_node = parent,
                    None => break,
                }
            }

            while let Some(current) = pending.pop() {
                replay.open(replay.depth(current), current, timestamp);
            }
            prev = node;
        }

        if Some(prev) == gc
            && let Some(parent) = gc_parent
        {
            replay.close(replay.depth(parent) + 1, prev, close_time);
            prev = parent;
        }
        while let Some(parent) = replay.nodes[prev.0].parent {
            replay.close(replay.depth(prev), prev, close_time);
            prev = parent;
        }
    }

    /// Collect [`for_each_frame_in`](Self::for_each_frame_in) into owned
    /// events.
    pub fn frame_events(&mut self, start: f64, stop: f64) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        self.for_each_frame_in(&mut events, start, stop);
        events
    }
}
