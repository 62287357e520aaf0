//! The sandboxed CommonJS module loader (the "VM" in the design notes):
//! resolution, execution, and per-plugin export caching.

mod loader;
mod resolver;
mod sandbox;

pub use loader::Loader;
pub use resolver::{ResolutionContext, Resolved};
pub use sandbox::Sandbox;
