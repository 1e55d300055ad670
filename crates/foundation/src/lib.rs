pub mod bounds;
pub mod math;
pub mod pack;
pub mod time;

// Foundation crate: small, well-tested primitives only.
pub use bounds::*;
pub use pack::*;
pub use time::*;
