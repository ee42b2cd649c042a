pub mod config;
pub mod errors;
pub mod runtime;
pub mod session;
pub mod system;
pub mod trial;

pub use config::*;
pub use errors::*;
pub use runtime::{format_metric, print_metric, RuntimeConfig, METRIC_MARKER};
pub use session::*;
pub use system::*;
pub use trial::*;
