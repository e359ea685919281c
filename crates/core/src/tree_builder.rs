use std::collections::{HashMap, VecDeque};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{NodeIndex, ParsedNode, is_native_url};
use crate::parsers::FlatNode;

#[derive(Debug, Error)]
pub enum TreeBuildError {
    #[error("profile has no nodes")]
    NoNodes,
    #[error("neither hitCount nor samples are present in profile")]
    MissingHitCounts,
    #[error("node {id} has no parent and the root has no children list")]
    OrphanNode { id: u64 },
    #[error("node {id} references unknown parent {parent}")]
    UnknownParent { id: u64, parent: u64 },
    #[error("node {id} references unknown child {child}")]
    UnknownChild { id: u64, child: u64 },
    #[error("node {0} appears more than once in the profile")]
    DuplicateNode(u64),
    #[error("sample references unknown node {0}")]
    UnknownSampleNode(u64),
}

/// Settings consulted while assembling the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildOptions {
    /// Keep frames whose url starts with `"native "`. When false their self
    /// time is folded into the nearest kept ancestor.
    pub keep_native_frames: bool,
}

/// The assembled call tree and the samples rewritten to reference it.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    /// Node arena in breadth-first order, root at [`NodeIndex::ROOT`].
    pub nodes: Vec<ParsedNode>,
    /// Source id to node. Ids of dropped native frames resolve to the
    /// ancestor that absorbed them.
    pub id_to_node: HashMap<u64, NodeIndex>,
    pub samples: Option<Vec<u64>>,
    pub total_hit_count: u64,
    pub sample_duration: f64,
    pub max_depth: u32,
}

/// Turns a flat node list into a [`ParsedNode`] tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeBuilder {
    options: BuildOptions,
}

impl TreeBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    /// Build the tree. `nodes[0]` is the root; `profile_duration` is the
    /// span the hit counts are distributed over.
    pub fn build(
        &self,
        mut nodes: Vec<FlatNode>,
        samples: Option<Vec<u64>>,
        profile_duration: f64,
    ) -> Result<BuiltTree, TreeBuildError> {
        if nodes.is_empty() {
            return Err(TreeBuildError::NoNodes);
        }

        let mut positions = HashMap::with_capacity(nodes.len());
        for (pos, node) in nodes.iter().enumerate() {
            if positions.insert(node.id, pos).is_some() {
                return Err(TreeBuildError::DuplicateNode(node.id));
            }
        }

        derive_hit_counts(&mut nodes, samples.as_deref(), &positions)?;
        derive_children(&mut nodes, &positions)?;

        let total_hit_count: u64 = nodes.iter().filter_map(|n| n.hit_count).sum();
        let sample_duration = if total_hit_count > 0 {
            profile_duration / total_hit_count as f64
        } else {
            0.0
        };

        let mut tree = self.assemble(nodes, &positions, sample_duration)?;
        tree.total_hit_count = total_hit_count;

        if let Some(samples) = samples {
            let remapped = samples
                .into_iter()
                .map(|id| {
                    tree.id_to_node
                        .get(&id)
                        .map(|&idx| tree.nodes[idx.0].id)
                        .ok_or(TreeBuildError::UnknownSampleNode(id))
                })
                .collect::<Result<Vec<_>, _>>()?;
            tree.samples = Some(remapped);
        }

        Ok(tree)
    }

    /// Breadth-first walk from the root, eliding native frames unless they
    /// are kept.
    fn assemble(
        &self,
        nodes: Vec<FlatNode>,
        positions: &HashMap<u64, usize>,
        sample_duration: f64,
    ) -> Result<BuiltTree, TreeBuildError> {
        let mut slots: Vec<Option<FlatNode>> = nodes.into_iter().map(Some).collect();
        let mut parsed = Vec::with_capacity(slots.len());
        let mut id_to_node = HashMap::with_capacity(slots.len());
        let mut max_depth = 0;
        let mut dropped = 0usize;

        let Some(mut root) = slots[0].take() else {
            return Err(TreeBuildError::NoNodes);
        };
        let root_id = root.id;
        let root_children = root.children.take().unwrap_or_default();
        parsed.push(ParsedNode::new(root, sample_duration, None, 0));
        id_to_node.insert(root_id, NodeIndex::ROOT);

        // (child id, parent it attaches under, id of the node listing it)
        let mut queue: VecDeque<(u64, NodeIndex, u64)> = root_children
            .into_iter()
            .map(|child| (child, NodeIndex::ROOT, root_id))
            .collect();

        while let Some((id, parent, referrer)) = queue.pop_front() {
            let &pos = positions.get(&id).ok_or(TreeBuildError::UnknownChild {
                id: referrer,
                child: id,
            })?;
            let mut source = slots[pos].take().ok_or(TreeBuildError::DuplicateNode(id))?;
            let children = source.children.take().unwrap_or_default();

            let attached_to = if self.options.keep_native_frames
                || !is_native_url(&source.call_frame.url)
            {
                let idx = NodeIndex(parsed.len());
                let depth = parsed[parent.0].depth + 1;
                max_depth = max_depth.max(depth);
                parsed.push(ParsedNode::new(source, sample_duration, Some(parent), depth));
                parsed[parent.0].children.push(idx);
                idx
            } else {
                parsed[parent.0].self_time += source.hit_count.unwrap_or(0) as f64 * sample_duration;
                dropped += 1;
                parent
            };

            id_to_node.insert(id, attached_to);
            queue.extend(children.into_iter().map(|child| (child, attached_to, id)));
        }

        accumulate_totals(&mut parsed);

        if dropped > 0 {
            debug!("dropped {dropped} native frames");
        }

        Ok(BuiltTree {
            nodes: parsed,
            id_to_node,
            samples: None,
            total_hit_count: 0,
            sample_duration,
            max_depth,
        })
    }
}

/// Children always follow their parent in the arena, so one reverse pass
/// sees every subtree complete before its parent.
fn accumulate_totals(nodes: &mut [ParsedNode]) {
    for node in nodes.iter_mut() {
        node.total_time = node.self_time;
    }
    for pos in (1..nodes.len()).rev() {
        if let Some(parent) = nodes[pos].parent {
            let total = nodes[pos].total_time;
            nodes[parent.0].total_time += total;
        }
    }
}

/// Count hits from the samples when no node carries a `hitCount`.
fn derive_hit_counts(
    nodes: &mut [FlatNode],
    samples: Option<&[u64]>,
    positions: &HashMap<u64, usize>,
) -> Result<(), TreeBuildError> {
    if nodes.iter().any(|n| n.hit_count.is_some()) {
        return Ok(());
    }
    let samples = samples.ok_or(TreeBuildError::MissingHitCounts)?;
    for node in nodes.iter_mut() {
        node.hit_count = Some(0);
    }
    for id in samples {
        if let Some(&pos) = positions.get(id) {
            *nodes[pos].hit_count.get_or_insert(0) += 1;
        }
    }
    debug!("derived hit counts from {} samples", samples.len());
    Ok(())
}

/// Fill children lists from `parent` back-references when the root has none.
fn derive_children(
    nodes: &mut [FlatNode],
    positions: &HashMap<u64, usize>,
) -> Result<(), TreeBuildError> {
    if nodes[0].children.is_some() {
        return Ok(());
    }
    nodes[0].children = Some(Vec::new());
    for pos in 1..nodes.len() {
        let id = nodes[pos].id;
        let parent = nodes[pos].parent.ok_or(TreeBuildError::OrphanNode { id })?;
        let &parent_pos = positions
            .get(&parent)
            .ok_or(TreeBuildError::UnknownParent { id, parent })?;
        nodes[parent_pos].children.get_or_insert_with(Vec::new).push(id);
    }
    debug!("derived children lists from parent references");
    Ok(())
}
