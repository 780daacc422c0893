//! MCP protocol and server

pub mod protocol;
pub mod server;

pub use protocol::*;
pub use server::{GraphMcpServer, ServerSettings, ToolSpec, TOOLS};
