use serde::{Deserialize, Deserializer, Serialize};

/// Call-site identity of a profile node.
///
/// Line and column numbers are 0-based, matching the `callFrame` object of
/// the current V8 profile format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub function_name: String,
    #[serde(default, deserialize_with = "script_id_from_any")]
    pub script_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "unknown_position")]
    pub line_number: i64,
    #[serde(default = "unknown_position")]
    pub column_number: i64,
}

/// Hit count attributed to a single source line of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionTickInfo {
    pub line: i64,
    pub ticks: u64,
}

/// Children of a raw node: an id list (flat `nodes` array) or nested node
/// objects (legacy `head` tree).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawChildren {
    Ids(Vec<u64>),
    Nodes(Vec<RawProfileNode>),
}

/// One call-tree node as received from the profiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProfileNode {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_frame: Option<CallFrame>,

    // Legacy nodes carry the call site inline, with 1-based positions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_script_id_from_any",
        skip_serializing_if = "Option::is_none"
    )]
    pub script_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<i64>,

    #[serde(default, alias = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<RawChildren>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_ticks: Option<Vec<PositionTickInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deopt_reason: Option<String>,
}

/// Top-level CPU profile in either wire shape.
///
/// The legacy shape has `head`, second-based `startTime`/`endTime` and
/// absolute `timestamps`. The current shape has `nodes`, microsecond
/// `startTime`/`endTime` and delta-encoded `timeDeltas`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProfile {
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<RawProfileNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<RawProfileNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_deltas: Option<Vec<f64>>,
}

/// Which wire shape a [`RawProfile`] was encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileFormat {
    /// `head`-rooted tree, times in seconds, absolute timestamps.
    Legacy,
    /// Flat `nodes`, times in microseconds, `timeDeltas`.
    Current,
}

impl RawProfile {
    pub fn format(&self) -> ProfileFormat {
        if self.head.is_some() {
            ProfileFormat::Legacy
        } else {
            ProfileFormat::Current
        }
    }
}

fn unknown_position() -> i64 {
    -1
}

/// Old profiles encode `scriptId` as a number.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnyScriptId {
    Text(String),
    Number(u64),
}

impl From<AnyScriptId> for String {
    fn from(id: AnyScriptId) -> Self {
        match id {
            AnyScriptId::Text(s) => s,
            AnyScriptId::Number(n) => n.to_string(),
        }
    }
}

fn script_id_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    AnyScriptId::deserialize(deserializer).map(String::from)
}

fn optional_script_id_from_any<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<AnyScriptId>::deserialize(deserializer)?.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_format_node() {
        let json = r#"{
            "id": 2,
            "callFrame": {"functionName":"foo","scriptId":"12","url":"app.js","lineNumber":4,"columnNumber":9},
            "hitCount": 3,
            "children": [3, 4],
            "positionTicks": [{"line": 5, "ticks": 3}]
        }"#;
        let node: RawProfileNode = serde_json::from_str(json).unwrap();
        let frame = node.call_frame.unwrap();
        assert_eq!(frame.function_name, "foo");
        assert_eq!(frame.script_id, "12");
        assert_eq!(frame.line_number, 4);
        assert_eq!(node.hit_count, Some(3));
        assert_eq!(node.children, Some(RawChildren::Ids(vec![3, 4])));
        assert_eq!(node.position_ticks.unwrap()[0].ticks, 3);
    }

    #[test]
    fn numeric_script_id_and_parent_alias() {
        let json = r#"{"id":5,"parentId":1,"functionName":"bar","scriptId":7,"lineNumber":1}"#;
        let node: RawProfileNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.parent, Some(1));
        assert_eq!(node.script_id.as_deref(), Some("7"));
        assert!(node.call_frame.is_none());
        assert!(node.children.is_none());
    }

    #[test]
    fn nested_children_and_format_detection() {
        let json = r#"{
            "startTime": 1.0,
            "endTime": 2.0,
            "head": {"id":1,"functionName":"(root)","children":[
                {"id":2,"functionName":"main","children":[]}
            ]}
        }"#;
        let profile: RawProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.format(), ProfileFormat::Legacy);
        let head = profile.head.unwrap();
        assert!(matches!(head.children, Some(RawChildren::Nodes(ref n)) if n.len() == 1));
    }

    #[test]
    fn flat_nodes_are_current_format() {
        let json = r#"{"startTime":0,"endTime":10,"nodes":[{"id":1,"callFrame":{"functionName":"(root)"}}]}"#;
        let profile: RawProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.format(), ProfileFormat::Current);
        let frame = profile.nodes.unwrap()[0].call_frame.clone().unwrap();
        assert_eq!(frame.line_number, -1);
        assert_eq!(frame.script_id, "");
    }
}
