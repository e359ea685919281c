use log::debug;
use stackreplay_protocol::{
    CallFrame, PositionTickInfo, ProfileFormat, RawChildren, RawProfile, RawProfileNode,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CpuProfileParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing root node")]
    MissingRoot,
}

/// Parse a V8 CPU profile (.cpuprofile) into its raw wire representation.
///
/// Used by: Node.js `--cpu-prof`, Chrome DevTools CPU profiler, Deno.
pub fn parse_cpuprofile(data: &[u8]) -> Result<RawProfile, CpuProfileParseError> {
    Ok(serde_json::from_slice(data)?)
}

/// A node of the flat node list, independent of the wire shape it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatNode {
    pub id: u64,
    pub parent: Option<u64>,
    pub children: Option<Vec<u64>>,
    /// 0-based positions.
    pub call_frame: CallFrame,
    pub hit_count: Option<u64>,
    pub position_ticks: Vec<PositionTickInfo>,
    pub deopt_reason: Option<String>,
}

impl From<RawProfileNode> for FlatNode {
    fn from(node: RawProfileNode) -> Self {
        let call_frame = match node.call_frame {
            Some(frame) => frame,
            None => CallFrame {
                function_name: node.function_name.unwrap_or_default(),
                script_id: node.script_id.unwrap_or_default(),
                url: node.url.unwrap_or_default(),
                line_number: node.line_number.map_or(-1, |line| line - 1),
                column_number: node.column_number.map_or(-1, |column| column - 1),
            },
        };
        let children = node.children.map(|children| match children {
            RawChildren::Ids(ids) => ids,
            RawChildren::Nodes(nodes) => nodes.iter().map(|n| n.id).collect(),
        });
        Self {
            id: node.id,
            parent: node.parent,
            children,
            call_frame,
            hit_count: node.hit_count,
            position_ticks: node.position_ticks.unwrap_or_default(),
            deopt_reason: node.deopt_reason,
        }
    }
}

/// A raw profile decoded into one canonical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub format: ProfileFormat,
    /// Flat node list, root first.
    pub nodes: Vec<FlatNode>,
    /// Profile start in milliseconds.
    pub start_time: f64,
    /// Profile end in milliseconds.
    pub end_time: f64,
    /// Leaf node id per sample.
    pub samples: Option<Vec<u64>>,
    /// Absolute sample times in microseconds.
    pub timestamps: Option<Vec<f64>>,
}

impl Trace {
    /// Normalize either wire shape into a flat node list with a millisecond
    /// time base and absolute sample timestamps.
    pub fn decode(raw: RawProfile) -> Result<Self, CpuProfileParseError> {
        let format = raw.format();
        let RawProfile {
            start_time,
            end_time,
            head,
            nodes,
            samples,
            timestamps,
            time_deltas,
        } = raw;

        let (start_ms, end_ms, timestamps) = match format {
            ProfileFormat::Legacy => (start_time * 1000.0, end_time * 1000.0, timestamps),
            ProfileFormat::Current => (
                start_time / 1000.0,
                end_time / 1000.0,
                time_deltas.map(|deltas| accumulate_deltas(start_time, &deltas)),
            ),
        };

        let raw_nodes = match (nodes, head) {
            (Some(nodes), _) => nodes,
            (None, Some(head)) => flatten_head(head),
            (None, None) => return Err(CpuProfileParseError::MissingRoot),
        };
        if raw_nodes.is_empty() {
            return Err(CpuProfileParseError::MissingRoot);
        }

        debug!(
            "decoded {:?} profile: {} nodes, {} samples",
            format,
            raw_nodes.len(),
            samples.as_ref().map_or(0, Vec::len)
        );

        Ok(Self {
            format,
            nodes: raw_nodes.into_iter().map(FlatNode::from).collect(),
            start_time: start_ms,
            end_time: end_ms,
            samples,
            timestamps,
        })
    }
}

/// Absolute timestamps from deltas, the first delta being relative to
/// `start_time`. Units are left untouched.
fn accumulate_deltas(start_time: f64, deltas: &[f64]) -> Vec<f64> {
    deltas
        .iter()
        .scan(start_time, |time, &delta| {
            *time += delta;
            Some(*time)
        })
        .collect()
}

/// Flatten a nested `head` tree in preorder, rewriting nested children as id
/// lists.
fn flatten_head(head: RawProfileNode) -> Vec<RawProfileNode> {
    let mut flat = Vec::new();
    let mut pending = vec![head];
    while let Some(mut node) = pending.pop() {
        let nested = match node.children.take() {
            Some(RawChildren::Nodes(children)) => {
                node.children = Some(RawChildren::Ids(children.iter().map(|c| c.id).collect()));
                children
            }
            other => {
                node.children = other;
                Vec::new()
            }
        };
        flat.push(node);
        pending.extend(nested.into_iter().rev());
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Trace {
        Trace::decode(parse_cpuprofile(json.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn current_format_accumulates_deltas() {
        let trace = decode(
            r#"{
            "nodes": [
                {"id":1,"callFrame":{"functionName":"(root)","url":"","lineNumber":-1,"columnNumber":-1},"hitCount":0,"children":[2]},
                {"id":2,"callFrame":{"functionName":"main","url":"app.js","lineNumber":3,"columnNumber":7},"hitCount":3}
            ],
            "startTime": 1000,
            "endTime": 4000,
            "samples": [2, 2, 2],
            "timeDeltas": [0, 1000, 1000]
        }"#,
        );
        assert_eq!(trace.format, ProfileFormat::Current);
        assert!((trace.start_time - 1.0).abs() < f64::EPSILON);
        assert!((trace.end_time - 4.0).abs() < f64::EPSILON);
        assert_eq!(trace.timestamps, Some(vec![1000.0, 2000.0, 3000.0]));
        assert_eq!(trace.nodes[1].call_frame.line_number, 3);
        assert_eq!(trace.nodes[0].children, Some(vec![2]));
    }

    #[test]
    fn legacy_head_is_flattened_in_preorder() {
        let trace = decode(
            r#"{
            "startTime": 1.5,
            "endTime": 2.5,
            "head": {"id":1,"functionName":"(root)","children":[
                {"id":2,"functionName":"a","lineNumber":10,"columnNumber":4,"children":[
                    {"id":4,"functionName":"c","children":[]}
                ]},
                {"id":3,"functionName":"b","children":[]}
            ]},
            "samples": [4, 3],
            "timestamps": [1500000, 2000000]
        }"#,
        );
        assert_eq!(trace.format, ProfileFormat::Legacy);
        let ids: Vec<u64> = trace.nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 4, 3]);
        assert_eq!(trace.nodes[0].children, Some(vec![2, 3]));
        assert_eq!(trace.nodes[1].children, Some(vec![4]));
        assert!((trace.start_time - 1500.0).abs() < 1e-9);
        assert!((trace.end_time - 2500.0).abs() < 1e-9);
        assert_eq!(trace.timestamps, Some(vec![1_500_000.0, 2_000_000.0]));
    }

    #[test]
    fn legacy_positions_become_zero_based() {
        let trace = decode(
            r#"{"startTime":0,"endTime":1,"head":{"id":1,"functionName":"(root)","url":"x.js","scriptId":9,"lineNumber":1,"columnNumber":5,"children":[]}}"#,
        );
        let frame = &trace.nodes[0].call_frame;
        assert_eq!(frame.function_name, "(root)");
        assert_eq!(frame.script_id, "9");
        assert_eq!(frame.url, "x.js");
        assert_eq!(frame.line_number, 0);
        assert_eq!(frame.column_number, 4);
    }

    #[test]
    fn missing_root_errors() {
        let raw = parse_cpuprofile(br#"{"startTime":0,"endTime":0}"#).unwrap();
        assert!(matches!(
            Trace::decode(raw),
            Err(CpuProfileParseError::MissingRoot)
        ));

        let raw = parse_cpuprofile(br#"{"nodes":[],"startTime":0,"endTime":0}"#).unwrap();
        assert!(matches!(
            Trace::decode(raw),
            Err(CpuProfileParseError::MissingRoot)
        ));
    }

    #[test]
    fn invalid_json_errors() {
        assert!(matches!(
            parse_cpuprofile(b"{not json"),
            Err(CpuProfileParseError::Json(_))
        ));
    }
}
