//! Shared types for the shellport workspace: host records, server
//! configuration, the host registry seam and the workspace error type.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{Result, ShellportError};
pub use registry::HostRegistry;
pub use types::*;
