//! Tool plumbing for trellis.
//!
//! Two registries with different jobs: [`FunctionRegistry`] maps tool names
//! to local executable handlers; [`ToolRegistry`] accumulates the catalog a
//! conversation sees along its root → node path and gates execution by
//! tool status.

pub mod functions;
pub mod registry;

pub use functions::FunctionRegistry;
pub use registry::ToolRegistry;
