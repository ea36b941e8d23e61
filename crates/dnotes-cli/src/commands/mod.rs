//! Command implementations for dnotes-cli

pub mod endpoint;
pub mod replay;
pub mod tail;

pub use endpoint::endpoint;
pub use replay::replay;
pub use tail::tail;
