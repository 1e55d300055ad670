pub mod frame;
pub mod metrics;
pub mod ticker;

pub use frame::*;
pub use metrics::*;
pub use ticker::*;
