//! Entra ID user queries
//!
//! Shapes `get_user` and `list_users` parameters into Graph requests.
//! OData expressions are passed through exactly as the caller wrote them.

use crate::graph::client::GraphRequest;
use crate::graph::error::GraphError;

/// Properties returned by `get_user` when no `$select` is given
pub const DEFAULT_USER_SELECT: &[&str] = &[
    "id",
    "displayName",
    "userPrincipalName",
    "mail",
    "jobTitle",
    "department",
    "officeLocation",
    "mobilePhone",
    "businessPhones",
    "accountEnabled",
    "createdDateTime",
    "lastSignInDateTime",
];

/// Properties returned by `list_users` when no `$select` is given
pub const DEFAULT_LIST_SELECT: &[&str] = &[
    "id",
    "displayName",
    "userPrincipalName",
    "mail",
    "jobTitle",
    "department",
    "accountEnabled",
];

pub const DEFAULT_TOP: u32 = 100;

/// Graph's page size ceiling for /users
pub const MAX_TOP: u32 = 999;

/// Parameters of `list_users`
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    pub filter: Option<String>,
    pub select: Option<Vec<String>>,
    pub orderby: Option<String>,
    pub top: Option<u32>,
    pub search: Option<String>,
    pub count: bool,
}

impl UserQuery {
    /// `$search` and `$count` are advanced queries and need eventual consistency
    pub fn needs_eventual_consistency(&self) -> bool {
        self.search.is_some() || self.count
    }

    /// Build the first-page request
    pub fn to_request(&self) -> GraphRequest {
        let select = match self.select {
            Some(ref fields) if !fields.is_empty() => fields.join(","),
            _ => DEFAULT_LIST_SELECT.join(","),
        };
        let top = self.top.unwrap_or(DEFAULT_TOP).clamp(1, MAX_TOP);

        let mut request = GraphRequest::get("/users")
            .with_query("$select", select)
            .with_query("$top", top.to_string());

        if let Some(ref filter) = self.filter {
            request = request.with_query("$filter", filter.as_str());
        }
        if let Some(ref orderby) = self.orderby {
            request = request.with_query("$orderby", orderby.as_str());
        }
        if let Some(ref search) = self.search {
            request = request.with_query("$search", search.as_str());
        }
        if self.count {
            request = request.with_query("$count", "true");
        }
        if self.needs_eventual_consistency() {
            request = request.with_header("ConsistencyLevel", "eventual");
        }
        request
    }
}

/// Build the request for a single user by object ID or UPN
pub fn get_user_request(user_id: &str, select: Option<&[String]>) -> Result<GraphRequest, GraphError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(GraphError::validation("user_id must not be empty"));
    }

    let select = match select {
        Some(fields) if !fields.is_empty() => fields.join(","),
        _ => DEFAULT_USER_SELECT.join(","),
    };

    let path = format!("/users/{}", user_path_segment(user_id));
    Ok(GraphRequest::get(path).with_query("$select", select))
}

/// Percent-encode an object ID or UPN for use as one path segment
///
/// Guest UPNs carry `#EXT#`, which must not turn into a URL fragment.
/// Graph addresses UPNs with a literal `@`, so that one is kept.
fn user_path_segment(user_id: &str) -> String {
    urlencoding::encode(user_id).replace("%40", "@")
}

/// Split a comma-separated property list
pub fn split_select(select: &str) -> Vec<String> {
    select
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
