use stackreplay_protocol::{CallFrame, PositionTickInfo};

use crate::parsers::FlatNode;

/// URL prefix V8 gives to frames of non-JavaScript runtime code.
pub const NATIVE_URL_PREFIX: &str = "native ";

pub const GC_FUNCTION_NAME: &str = "(garbage collector)";
pub const PROGRAM_FUNCTION_NAME: &str = "(program)";
pub const IDLE_FUNCTION_NAME: &str = "(idle)";

/// Legacy backends report this for functions that were never deoptimized.
const NO_DEOPT_REASON: &str = "no reason";

pub fn is_native_url(url: &str) -> bool {
    url.starts_with(NATIVE_URL_PREFIX)
}

/// Position of a [`ParsedNode`] in the model's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub(crate) usize);

impl NodeIndex {
    pub const ROOT: NodeIndex = NodeIndex(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// A node of the reconstructed call tree.
///
/// Nodes are owned by the model's arena. `children` are the only owning
/// edges; `parent` is a lookup handle for upward walks.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNode {
    /// Source id from the trace.
    pub id: u64,
    pub call_frame: CallFrame,
    /// `hitCount * sampleDuration`, plus the self time of any native frames
    /// folded into this node.
    pub self_time: f64,
    /// Self time plus the total time of all children.
    pub total_time: f64,
    /// 0 for the root.
    pub depth: u32,
    pub deopt_reason: Option<String>,
    pub position_ticks: Vec<PositionTickInfo>,
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) children: Vec<NodeIndex>,
}

impl ParsedNode {
    pub(crate) fn new(
        source: FlatNode,
        sample_duration: f64,
        parent: Option<NodeIndex>,
        depth: u32,
    ) -> Self {
        let self_time = source.hit_count.unwrap_or(0) as f64 * sample_duration;
        Self {
            id: source.id,
            call_frame: source.call_frame,
            self_time,
            total_time: self_time,
            depth,
            deopt_reason: source
                .deopt_reason
                .filter(|reason| !reason.is_empty() && reason != NO_DEOPT_REASON),
            position_ticks: source.position_ticks,
            parent,
            children: Vec::new(),
        }
    }

    pub fn function_name(&self) -> &str {
        &self.call_frame.function_name
    }

    pub fn url(&self) -> &str {
        &self.call_frame.url
    }

    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_native(&self) -> bool {
        is_native_url(self.url())
    }

    /// Identity of the call site, shared by every node calling the same
    /// function at the same position.
    pub fn call_uid(&self) -> String {
        let frame = &self.call_frame;
        format!(
            "{}@{}:{}:{}",
            frame.function_name, frame.script_id, frame.line_number, frame.column_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(id: u64, name: &str, url: &str, hit_count: Option<u64>) -> FlatNode {
        FlatNode {
            id,
            parent: None,
            children: None,
            call_frame: CallFrame {
                function_name: name.to_string(),
                script_id: "3".to_string(),
                url: url.to_string(),
                line_number: 12,
                column_number: 4,
            },
            hit_count,
            position_ticks: Vec::new(),
            deopt_reason: None,
        }
    }

    #[test]
    fn self_time_scales_hit_count() {
        let node = ParsedNode::new(flat(1, "main", "app.js", Some(4)), 0.5, None, 0);
        assert!((node.self_time - 2.0).abs() < f64::EPSILON);
        assert!((node.total_time - 2.0).abs() < f64::EPSILON);
        assert!(node.is_root());

        let node = ParsedNode::new(flat(2, "idle", "", None), 0.5, Some(NodeIndex::ROOT), 1);
        assert_eq!(node.self_time, 0.0);
        assert!(!node.is_root());
    }

    #[test]
    fn no_reason_is_not_a_deopt() {
        let mut source = flat(1, "f", "", Some(1));
        source.deopt_reason = Some("no reason".to_string());
        assert_eq!(ParsedNode::new(source, 1.0, None, 0).deopt_reason, None);

        let mut source = flat(1, "f", "", Some(1));
        source.deopt_reason = Some("Insufficient type feedback".to_string());
        assert_eq!(
            ParsedNode::new(source, 1.0, None, 0).deopt_reason.as_deref(),
            Some("Insufficient type feedback")
        );
    }

    #[test]
    fn native_detection_and_call_uid() {
        let node = ParsedNode::new(flat(7, "push", "native array.js", Some(0)), 1.0, None, 0);
        assert!(node.is_native());
        assert_eq!(node.call_uid(), "push@3:12:4");

        let node = ParsedNode::new(flat(8, "native", "natives.js", Some(0)), 1.0, None, 0);
        assert!(!node.is_native());
        assert!(!is_native_url(""));
    }
}
