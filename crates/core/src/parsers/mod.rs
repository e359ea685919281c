pub mod cpuprofile;

pub use cpuprofile::{CpuProfileParseError, FlatNode, Trace, parse_cpuprofile};
