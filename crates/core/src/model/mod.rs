pub mod node;
pub mod profile;
pub mod replay;

pub use node::{
    GC_FUNCTION_NAME, IDLE_FUNCTION_NAME, NATIVE_URL_PREFIX, NodeIndex, PROGRAM_FUNCTION_NAME,
    ParsedNode, is_native_url,
};
pub use profile::{ProfileError, ProfileModel};
pub use replay::{FrameClose, FrameEvent, FrameVisitor};
