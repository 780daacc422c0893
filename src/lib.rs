//! Defender Graph MCP Library
//!
//! Model Context Protocol server for Microsoft Defender Advanced Hunting
//! and Entra ID user lookups, backed by Microsoft Graph.

pub mod auth;
pub mod config;
pub mod format;
pub mod graph;
pub mod hunting;
pub mod mcp;
pub mod users;

pub use auth::{AccessToken, AuthError, AzureAdAuth};
pub use config::{Config, ConfigError, RuntimeConfig};
pub use graph::{GraphClient, GraphError, GraphRequest, RetryPolicy};
pub use hunting::{HuntingExecutor, HuntingResult, PollConfig};
pub use mcp::{GraphMcpServer, ServerSettings};
