pub mod export;
pub mod recorder;
pub mod session;

pub use export::*;
pub use recorder::*;
pub use session::*;
