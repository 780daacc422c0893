//! MCP Server implementation for Microsoft Graph security tools
//!
//! Exposes Defender Advanced Hunting and Entra ID user lookups as MCP tools.
//! Tools are declared once in the static [`TOOLS`] table; `tools/list` and
//! `tools/call` are both driven from it.

use crate::config::RuntimeConfig;
use crate::format::{format_error, format_records, format_user, ResultSet, DEFAULT_MAX_ROWS, ERROR_MARKER};
use crate::graph::{collect, GraphClient, GraphError};
use crate::hunting::{HuntingExecutor, PollConfig, DEFAULT_MAX_LOOKBACK_DAYS};
use crate::mcp::protocol::*;
use crate::users::{get_user_request, split_select, UserQuery};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type ToolArgs = HashMap<String, Value>;
pub type ToolFuture<'a> = BoxFuture<'a, Result<String, GraphError>>;
pub type ToolHandler = for<'a> fn(&'a GraphMcpServer, &'a ToolArgs) -> ToolFuture<'a>;

/// Static registration of one tool
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub handler: ToolHandler,
}

impl ToolSpec {
    pub fn definition(&self) -> Tool {
        Tool {
            name: self.name.to_string(),
            description: self.description.to_string(),
            input_schema: create_tool_schema(self.params),
        }
    }
}

pub static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "hunt",
        description: "Run a KQL query against Microsoft Defender Advanced Hunting. Returns matching rows as JSON lines.",
        params: &[
            ParamSpec {
                name: "query",
                kind: ParamType::String,
                description: "KQL query to execute, e.g. \"DeviceProcessEvents | limit 10\"",
                required: true,
            },
            ParamSpec {
                name: "days",
                kind: ParamType::Integer,
                description: "Number of days to look back (1-30, defaults to the configured maximum)",
                required: false,
            },
        ],
        handler: hunt_handler,
    },
    ToolSpec {
        name: "get_user",
        description: "Get user information from Microsoft Entra ID by object ID or user principal name.",
        params: &[
            ParamSpec {
                name: "user_id",
                kind: ParamType::String,
                description: "User object ID (GUID) or UPN, e.g. 'user@contoso.com'",
                required: true,
            },
            ParamSpec {
                name: "select",
                kind: ParamType::StringList,
                description: "Properties to return, e.g. 'displayName,mail' or [\"id\", \"signInActivity\"]. Defaults to a standard profile.",
                required: false,
            },
        ],
        handler: get_user_handler,
    },
    ToolSpec {
        name: "list_users",
        description: "List and search users in Microsoft Entra ID with OData query support.",
        params: &[
            ParamSpec {
                name: "filter",
                kind: ParamType::String,
                description: "OData filter, e.g. \"department eq 'Sales'\" or \"startswith(displayName, 'John')\"",
                required: false,
            },
            ParamSpec {
                name: "select",
                kind: ParamType::StringList,
                description: "Properties to return. Default: id, displayName, userPrincipalName, mail, jobTitle, department, accountEnabled",
                required: false,
            },
            ParamSpec {
                name: "orderby",
                kind: ParamType::String,
                description: "Sort order, e.g. 'displayName' or 'createdDateTime desc'",
                required: false,
            },
            ParamSpec {
                name: "top",
                kind: ParamType::Integer,
                description: "Maximum number of users to return (max 999). Without it, pages are followed up to the server limit.",
                required: false,
            },
            ParamSpec {
                name: "search",
                kind: ParamType::String,
                description: "Search expression in quotes, e.g. '\"displayName:John\"'",
                required: false,
            },
            ParamSpec {
                name: "count",
                kind: ParamType::Boolean,
                description: "Include the total count of matching users",
                required: false,
            },
        ],
        handler: list_users_handler,
    },
];

fn hunt_handler<'a>(server: &'a GraphMcpServer, args: &'a ToolArgs) -> ToolFuture<'a> {
    Box::pin(server.hunt(args))
}

fn get_user_handler<'a>(server: &'a GraphMcpServer, args: &'a ToolArgs) -> ToolFuture<'a> {
    Box::pin(server.get_user(args))
}

fn list_users_handler<'a>(server: &'a GraphMcpServer, args: &'a ToolArgs) -> ToolFuture<'a> {
    Box::pin(server.list_users(args))
}

/// Tunables the handlers need from configuration
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub max_pages: usize,
    pub max_lookback_days: u32,
    pub poll: PollConfig,
    pub max_display_rows: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_pages: 10,
            max_lookback_days: DEFAULT_MAX_LOOKBACK_DAYS,
            poll: PollConfig::default(),
            max_display_rows: DEFAULT_MAX_ROWS,
        }
    }
}

impl From<&RuntimeConfig> for ServerSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            max_lookback_days: config.max_lookback_days,
            poll: PollConfig {
                interval: config.poll_interval,
                timeout: config.poll_timeout,
            },
            max_display_rows: config.max_display_rows,
        }
    }
}

/// MCP Server for Microsoft Graph
pub struct GraphMcpServer {
    client: Arc<GraphClient>,
    settings: ServerSettings,
}

impl GraphMcpServer {
    /// Create a new MCP server instance
    pub fn new(client: Arc<GraphClient>, settings: ServerSettings) -> Self {
        Self { client, settings }
    }

    /// Get list of available tools
    pub fn get_tools(&self) -> Vec<Tool> {
        TOOLS.iter().map(ToolSpec::definition).collect()
    }

    /// Handle a tool call. Failures come back as error results, never panics.
    pub async fn call_tool(&self, name: &str, args: &ToolArgs) -> CallToolResult {
        let Some(spec) = TOOLS.iter().find(|t| t.name == name) else {
            return CallToolResult::error(format!("{} Unknown tool: {}", ERROR_MARKER, name));
        };

        match (spec.handler)(self, args).await {
            Ok(text) => CallToolResult::text(text),
            Err(e) => {
                tracing::warn!("Tool {} failed: {}", name, e);
                CallToolResult::error(format_error(&e))
            }
        }
    }

    /// Dispatch one JSON-RPC message. Notifications get no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!("Notification: {}", request.method);
            return None;
        }

        let id = request.id.clone();

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(id, INVALID_REQUEST, "jsonrpc must be 2.0"));
        }

        let response = match request.method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability {
                            list_changed: Some(false),
                        }),
                    },
                    server_info: ServerInfo {
                        name: env!("CARGO_PKG_NAME").to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                };
                to_response(id, &result)
            }

            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),

            "tools/list" => {
                let result = ListToolsResult {
                    tools: self.get_tools(),
                };
                to_response(id, &result)
            }

            "tools/call" => {
                let params: CallToolParams = match request.params {
                    Some(p) => match serde_json::from_value(p) {
                        Ok(params) => params,
                        Err(e) => {
                            return Some(JsonRpcResponse::error(
                                id,
                                INVALID_PARAMS,
                                &format!("Invalid params: {}", e),
                            ));
                        }
                    },
                    None => {
                        return Some(JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params"));
                    }
                };

                let args = params.arguments.unwrap_or_default();
                let result = self.call_tool(&params.name, &args).await;
                to_response(id, &result)
            }

            _ => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {}", request.method),
            ),
        };

        Some(response)
    }

    async fn hunt(&self, args: &ToolArgs) -> Result<String, GraphError> {
        let query = required_str(args, "query")?;
        let window = self.settings.max_lookback_days.min(DEFAULT_MAX_LOOKBACK_DAYS);
        let days = int_arg(args, "days")?.unwrap_or(i64::from(window));

        let result = HuntingExecutor::new(&self.client)
            .with_max_lookback_days(self.settings.max_lookback_days)
            .with_poll_config(self.settings.poll.clone())
            .hunt(query, days)
            .await?;

        Ok(format_records(
            &ResultSet::new(&result.results).max_rows(self.settings.max_display_rows),
        ))
    }

    async fn get_user(&self, args: &ToolArgs) -> Result<String, GraphError> {
        let user_id = required_str(args, "user_id")?;
        let select = list_arg(args, "select")?;
        let request = get_user_request(user_id, select.as_deref())?;

        match self.client.request(&request).await {
            Ok(response) => Ok(format_user(&response.json()?)),
            Err(GraphError::Request { status: 404, .. }) => {
                Ok(format!("User not found: {}", user_id.trim()))
            }
            Err(e) => Err(e),
        }
    }

    async fn list_users(&self, args: &ToolArgs) -> Result<String, GraphError> {
        let top = match int_arg(args, "top")? {
            Some(n) if n < 1 => {
                return Err(GraphError::validation(format!(
                    "top must be a positive integer, got {}",
                    n
                )))
            }
            Some(n) => Some(u32::try_from(n).unwrap_or(u32::MAX)),
            None => None,
        };

        let query = UserQuery {
            filter: str_arg(args, "filter").map(String::from),
            select: list_arg(args, "select")?,
            orderby: str_arg(args, "orderby").map(String::from),
            top,
            search: str_arg(args, "search").map(String::from),
            count: bool_arg(args, "count")?.unwrap_or(false),
        };

        // An explicit top is a result size: take exactly one page
        let max_pages = if query.top.is_some() {
            1
        } else {
            self.settings.max_pages
        };

        let collected = collect(&self.client, query.to_request(), Some(max_pages)).await?;

        let mut set = ResultSet::new(&collected.items)
            .noun("users")
            .total_count(collected.total_count)
            .max_rows(self.settings.max_display_rows);
        if !collected.complete {
            set = set.incomplete_after(collected.pages);
        }
        Ok(format_records(&set))
    }
}

fn to_response<T: serde::Serialize>(id: Option<Value>, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, &format!("Serialization failed: {}", e)),
    }
}

/// Non-blank string argument
fn str_arg<'a>(args: &'a ToolArgs, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn required_str<'a>(args: &'a ToolArgs, key: &str) -> Result<&'a str, GraphError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(GraphError::validation(format!(
            "Parameter {} must be a string, got {}",
            key, other
        ))),
        None => Err(GraphError::validation(format!(
            "Missing required parameter: {}",
            key
        ))),
    }
}

/// Parse an integer argument (handles both string and number types)
fn int_arg(args: &ToolArgs, key: &str) -> Result<Option<i64>, GraphError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            .map(Some)
            .ok_or_else(|| {
                GraphError::validation(format!("Parameter {} must be an integer, got {}", key, v))
            }),
    }
}

/// Parse a boolean argument (handles both "true"/"false" strings and booleans)
fn bool_arg(args: &ToolArgs, key: &str) -> Result<Option<bool>, GraphError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(Some(true)),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(Some(false)),
        Some(v) => Err(GraphError::validation(format!(
            "Parameter {} must be a boolean, got {}",
            key, v
        ))),
    }
}

/// Parse a property list given as "a,b,c" or ["a", "b", "c"]
fn list_arg(args: &ToolArgs, key: &str) -> Result<Option<Vec<String>>, GraphError> {
    let fields = match args.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => split_select(s),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                    GraphError::validation(format!("Parameter {} must contain only strings", key))
                })
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect(),
        Some(v) => {
            return Err(GraphError::validation(format!(
                "Parameter {} must be a string or array of strings, got {}",
                key, v
            )))
        }
    };
    Ok(if fields.is_empty() { None } else { Some(fields) })
}
