pub mod engine;
pub mod enrich;

pub use engine::*;
pub use enrich::*;
