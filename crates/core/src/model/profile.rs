use std::collections::HashMap;

use log::debug;
use stackreplay_protocol::{ProfileFormat, RawProfile};
use thiserror::Error;

use super::node::{
    GC_FUNCTION_NAME, IDLE_FUNCTION_NAME, NodeIndex, PROGRAM_FUNCTION_NAME, ParsedNode,
};
use super::replay::StackScratch;
use crate::parsers::{CpuProfileParseError, Trace, parse_cpuprofile};
use crate::tree_builder::{BuildOptions, TreeBuildError, TreeBuilder};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("cpuprofile: {0}")]
    Parse(#[from] CpuProfileParseError),
    #[error("call tree: {0}")]
    Tree(#[from] TreeBuildError),
    #[error("{timestamps} timestamps for {samples} samples")]
    TimestampCountMismatch { samples: usize, timestamps: usize },
}

/// A CPU profile reconstructed into a call tree plus a time-ordered sample
/// stream.
///
/// Built once from a single trace. The only state touched after
/// construction is the traversal scratch space, which is why
/// [`ProfileModel::for_each_frame`] takes `&mut self`.
#[derive(Debug, Clone)]
pub struct ProfileModel {
    pub(crate) format: ProfileFormat,
    pub(crate) nodes: Vec<ParsedNode>,
    pub(crate) id_to_node: HashMap<u64, NodeIndex>,
    pub(crate) samples: Vec<u64>,
    pub(crate) timestamps: Vec<f64>,
    pub(crate) total_hit_count: u64,
    pub(crate) start_time: f64,
    pub(crate) end_time: f64,
    pub(crate) max_depth: u32,
    pub(crate) gc_node: Option<NodeIndex>,
    pub(crate) program_node: Option<NodeIndex>,
    pub(crate) idle_node: Option<NodeIndex>,
    pub(crate) scratch: Option<StackScratch>,
}

impl ProfileModel {
    /// Parse a `.cpuprofile` JSON document and build the model.
    pub fn from_json(data: &[u8], options: BuildOptions) -> Result<Self, ProfileError> {
        Self::new(parse_cpuprofile(data)?, options)
    }

    pub fn new(raw: RawProfile, options: BuildOptions) -> Result<Self, ProfileError> {
        Self::from_trace(Trace::decode(raw)?, options)
    }

    pub fn from_trace(trace: Trace, options: BuildOptions) -> Result<Self, ProfileError> {
        let Trace {
            format,
            nodes,
            start_time,
            end_time,
            samples,
            timestamps,
        } = trace;

        let tree = TreeBuilder::new(options).build(nodes, samples, end_time - start_time)?;

        let mut model = Self {
            format,
            nodes: tree.nodes,
            id_to_node: tree.id_to_node,
            samples: tree.samples.unwrap_or_default(),
            timestamps: timestamps.unwrap_or_default(),
            total_hit_count: tree.total_hit_count,
            start_time,
            end_time,
            max_depth: tree.max_depth,
            gc_node: None,
            program_node: None,
            idle_node: None,
            scratch: None,
        };
        model.extract_meta_nodes();

        if !model.samples.is_empty() {
            let (samples, timestamps) = (model.samples.len(), model.timestamps.len());
            if timestamps != 0 && timestamps < samples {
                return Err(ProfileError::TimestampCountMismatch {
                    samples,
                    timestamps,
                });
            }
            if timestamps > samples + 1 {
                model.timestamps.truncate(samples + 1);
                debug!("ignored {} timestamps past the last sample", timestamps - samples - 1);
            }
            model.sort_samples();
            model.normalize_timestamps();
            model.fix_missing_samples();
        }

        Ok(model)
    }

    fn extract_meta_nodes(&mut self) {
        for &child in &self.nodes[NodeIndex::ROOT.0].children {
            let slot = match self.nodes[child.0].function_name() {
                GC_FUNCTION_NAME => &mut self.gc_node,
                PROGRAM_FUNCTION_NAME => &mut self.program_node,
                IDLE_FUNCTION_NAME => &mut self.idle_node,
                _ => continue,
            };
            slot.get_or_insert(child);
        }
    }

    /// Stable sort of samples and timestamps together, by timestamp.
    fn sort_samples(&mut self) {
        let count = self.samples.len();
        if self.timestamps.len() < count {
            return;
        }
        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by(|&a, &b| self.timestamps[a].total_cmp(&self.timestamps[b]));
        if order.is_sorted() {
            return;
        }

        let samples = order.iter().map(|&i| self.samples[i]).collect();
        let mut timestamps: Vec<f64> = order.iter().map(|&i| self.timestamps[i]).collect();
        timestamps.extend_from_slice(&self.timestamps[count..]);
        self.samples = samples;
        self.timestamps = timestamps;
        debug!("reordered {count} samples by timestamp");
    }

    /// Bring timestamps to milliseconds and make sure there is one trailing
    /// timestamp bounding the last sample.
    fn normalize_timestamps(&mut self) {
        let count = self.samples.len();
        if self.timestamps.is_empty() {
            let interval = (self.end_time - self.start_time) / count as f64;
            self.timestamps = (0..=count)
                .map(|i| self.start_time + i as f64 * interval)
                .collect();
            debug!("synthesized {} timestamps at {interval}ms", count + 1);
            return;
        }

        for timestamp in &mut self.timestamps {
            *timestamp /= 1000.0;
        }
        if self.timestamps.len() == count {
            let first = self.timestamps[0];
            let last = self.timestamps[count - 1];
            // A lone sample has no interval to average; it runs to the
            // recorded end.
            let bound = if count > 1 {
                last + (last - first) / (count - 1) as f64
            } else {
                self.end_time.max(last)
            };
            self.timestamps.push(bound);
        }
        if let (Some(&first), Some(&last)) = (self.timestamps.first(), self.timestamps.last()) {
            self.start_time = first;
            self.end_time = last;
        }
    }

    /// The sampler sometimes fails to walk the JS stack and reports a lone
    /// `(program)` sample instead, splitting a frame in two. A single such
    /// sample between two samples sharing the same bottom node is replaced
    /// with the preceding sample.
    fn fix_missing_samples(&mut self) {
        let Some(program) = self.program_node else {
            return;
        };
        let count = self.samples.len();
        if count < 3 {
            return;
        }

        let program_id = self.nodes[program.0].id;
        let gc_id = self.gc_node.map(|n| self.nodes[n.0].id);
        let idle_id = self.idle_node.map(|n| self.nodes[n.0].id);
        let is_system =
            |id: u64| id == program_id || Some(id) == gc_id || Some(id) == idle_id;

        let mut repaired = 0usize;
        let mut prev = self.samples[0];
        let mut current = self.samples[1];
        for index in 1..count - 1 {
            let next = self.samples[index + 1];
            if current == program_id
                && !is_system(prev)
                && !is_system(next)
                && let Some(bottom) = self.bottom_node(prev)
                && self.bottom_node(next) == Some(bottom)
            {
                self.samples[index] = prev;
                repaired += 1;
            }
            prev = current;
            current = next;
        }

        if repaired > 0 {
            debug!("replaced {repaired} spurious (program) samples");
        }
    }

    /// The ancestor of `id` one level below the root. `None` for the root.
    fn bottom_node(&self, id: u64) -> Option<NodeIndex> {
        let mut current = *self.id_to_node.get(&id)?;
        if self.nodes[current.0].depth == 0 {
            return None;
        }
        while let Some(parent) = self.nodes[current.0].parent
            && self.nodes[parent.0].parent.is_some()
        {
            current = parent;
        }
        Some(current)
    }

    pub fn format(&self) -> ProfileFormat {
        self.format
    }

    pub fn root(&self) -> &ParsedNode {
        &self.nodes[NodeIndex::ROOT.0]
    }

    pub fn node(&self, index: NodeIndex) -> &ParsedNode {
        &self.nodes[index.0]
    }

    /// Look up by source id. Ids of dropped native frames resolve to the
    /// ancestor that absorbed them.
    pub fn node_by_id(&self, id: u64) -> Option<&ParsedNode> {
        self.id_to_node.get(&id).map(|&idx| &self.nodes[idx.0])
    }

    /// The leaf node of the sample at `index`.
    pub fn node_by_sample_index(&self, index: usize) -> Option<&ParsedNode> {
        self.samples
            .get(index)
            .and_then(|&id| self.node_by_id(id))
    }

    /// Every node of the tree, each once, in no particular order.
    pub fn nodes(&self) -> &[ParsedNode] {
        &self.nodes
    }

    pub fn parent(&self, node: &ParsedNode) -> Option<&ParsedNode> {
        node.parent.map(|idx| &self.nodes[idx.0])
    }

    pub fn children<'a>(&'a self, node: &'a ParsedNode) -> impl Iterator<Item = &'a ParsedNode> {
        node.children.iter().map(|idx| &self.nodes[idx.0])
    }

    pub fn gc_node(&self) -> Option<&ParsedNode> {
        self.gc_node.map(|idx| &self.nodes[idx.0])
    }

    pub fn program_node(&self) -> Option<&ParsedNode> {
        self.program_node.map(|idx| &self.nodes[idx.0])
    }

    pub fn idle_node(&self) -> Option<&ParsedNode> {
        self.idle_node.map(|idx| &self.nodes[idx.0])
    }

    pub fn total_hit_count(&self) -> u64 {
        self.total_hit_count
    }

    /// Profile start in milliseconds.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Profile end in milliseconds.
    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Leaf node id per sample, in time order.
    pub fn samples(&self) -> &[u64] {
        &self.samples
    }

    /// Sample times in milliseconds. Holds one more entry than
    /// [`samples`](Self::samples), bounding the last sample.
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }
}
