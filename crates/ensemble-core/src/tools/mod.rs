//! Tool dispatch: uniform `invoke(name, args)` over native, MCP, sandbox
//! and spawn tools.

pub mod implementations;
pub mod registry;

pub use registry::{CancellationFlag, Tool, ToolContext, ToolRegistry, ToolResult};
