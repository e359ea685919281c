//! Reconstructs call trees and frame timelines from V8 CPU profiles.

pub mod model;
pub mod parsers;
pub mod tree_builder;

pub use model::{
    FrameClose, FrameEvent, FrameVisitor, NodeIndex, ParsedNode, ProfileError, ProfileModel,
};
pub use tree_builder::{BuildOptions, TreeBuildError, TreeBuilder};
