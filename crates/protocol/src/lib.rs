pub mod profile;

pub use profile::{
    CallFrame, PositionTickInfo, ProfileFormat, RawChildren, RawProfile, RawProfileNode,
};
