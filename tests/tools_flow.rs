//! End-to-end tests for the MCP tool surface.
//!
//! Requests go through `GraphMcpServer` exactly as the stdio loop would
//! send them; Graph is replaced by a wiremock server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use defender_graph_mcp::auth::{AccessToken, AzureAdAuth};
use defender_graph_mcp::format::NO_RESULTS;
use defender_graph_mcp::graph::{GraphClient, RetryPolicy};
use defender_graph_mcp::hunting::PollConfig;
use defender_graph_mcp::mcp::{GraphMcpServer, JsonRpcRequest, ServerSettings};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn server_for(mock: &MockServer) -> GraphMcpServer {
    server_with(mock, |_| {}).await
}

async fn server_with(mock: &MockServer, tweak: impl FnOnce(&mut ServerSettings)) -> GraphMcpServer {
    let auth = AzureAdAuth::new(
        "tenant-1".to_string(),
        "client-1".to_string(),
        "secret-1".to_string(),
        &mock.uri(),
        &mock.uri(),
    );
    auth.set_token(AccessToken::new(
        "mock-token",
        Instant::now() + Duration::from_secs(3600),
    ));
    let retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
    };
    let client = GraphClient::new(Arc::new(auth), &mock.uri(), retry, Duration::from_secs(5));
    let mut settings = ServerSettings {
        max_pages: 3,
        poll: PollConfig {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
        },
        ..Default::default()
    };
    tweak(&mut settings);
    GraphMcpServer::new(Arc::new(client), settings)
}

fn args(value: Value) -> HashMap<String, Value> {
    serde_json::from_value(value).unwrap()
}

fn rpc(value: Value) -> JsonRpcRequest {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn list_users_passes_filter_verbatim() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("$filter", "department eq 'Sales'"))
        .and(query_param("$top", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"id": "1", "displayName": "Adele Vance", "department": "Sales"},
                {"id": "2", "displayName": "Alex Wilber", "department": "Sales"}
            ]
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    let result = server
        .call_tool("list_users", &args(json!({"filter": "department eq 'Sales'"})))
        .await;

    assert!(!result.is_error, "{}", result.text_content());
    let text = result.text_content();
    assert!(text.starts_with("Found 2 users:"));
    let adele = text.find("Adele Vance").unwrap();
    let alex = text.find("Alex Wilber").unwrap();
    assert!(adele < alex);
}

#[tokio::test]
async fn list_users_count_uses_eventual_consistency() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("$count", "true"))
        .and(query_param("$search", "\"displayName:Adele\""))
        .and(header("ConsistencyLevel", "eventual"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "@odata.count": 1,
            "value": [{"id": "1", "displayName": "Adele Vance"}]
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    let result = server
        .call_tool(
            "list_users",
            &args(json!({"search": "\"displayName:Adele\"", "count": true})),
        )
        .await;

    assert!(!result.is_error, "{}", result.text_content());
    assert!(result.text_content().contains("Total count: 1"));
}

#[tokio::test]
async fn list_users_without_top_marks_truncated_walk() {
    let mock = MockServer::start().await;
    let uri = mock.uri();

    // Every page points at another one; max_pages = 3 stops the walk.
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "@odata.nextLink": format!("{uri}/users/next"),
            "value": [{"id": "first"}]
        })))
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "@odata.nextLink": format!("{uri}/users/next"),
            "value": [{"id": "more"}]
        })))
        .expect(2)
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    let result = server.call_tool("list_users", &args(json!({}))).await;

    let text = result.text_content();
    assert!(text.starts_with("Found 3 users:"));
    assert!(text.contains("incomplete: stopped after 3 pages"));
}

#[tokio::test]
async fn list_users_empty_is_no_results() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    let result = server
        .call_tool("list_users", &args(json!({"top": 5})))
        .await;

    assert!(!result.is_error);
    assert_eq!(result.text_content(), NO_RESULTS);
}

#[tokio::test]
async fn get_user_renders_profile() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/adele@contoso.com"))
        .and(query_param("$select", "displayName,mail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "@odata.context": "https://graph.microsoft.com/v1.0/$metadata#users(displayName,mail)/$entity",
            "displayName": "Adele Vance",
            "mail": "adele@contoso.com"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    let result = server
        .call_tool(
            "get_user",
            &args(json!({"user_id": "adele@contoso.com", "select": ["displayName", "mail"]})),
        )
        .await;

    assert!(!result.is_error);
    let text = result.text_content();
    assert!(text.starts_with("User Profile:"));
    assert!(text.contains("displayName: Adele Vance"));
    assert!(!text.contains("@odata.context"));
}

#[tokio::test]
async fn get_user_looks_up_guest_upn() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/john_contoso.com%23EXT%23@fabrikam.onmicrosoft.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "displayName": "John (Contoso)",
            "userPrincipalName": "john_contoso.com#EXT#@fabrikam.onmicrosoft.com"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    let result = server
        .call_tool(
            "get_user",
            &args(json!({"user_id": "john_contoso.com#EXT#@fabrikam.onmicrosoft.com"})),
        )
        .await;

    assert!(!result.is_error, "{}", result.text_content());
    assert!(result.text_content().contains("displayName: John (Contoso)"));
}

#[tokio::test]
async fn get_user_not_found_is_friendly() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/ghost@contoso.com"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "Request_ResourceNotFound"}
        })))
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    let result = server
        .call_tool("get_user", &args(json!({"user_id": "ghost@contoso.com"})))
        .await;

    assert_eq!(result.text_content(), "User not found: ghost@contoso.com");
}

#[tokio::test]
async fn hunt_with_empty_query_is_validation_error() {
    let mock = MockServer::start().await;
    let server = server_for(&mock).await;

    let result = server
        .call_tool("hunt", &args(json!({"query": "", "days": 7})))
        .await;

    assert!(result.is_error);
    assert!(result.text_content().starts_with("Error: ValidationError"));
    assert!(mock.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn hunt_defaults_to_thirty_days() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/security/runHuntingQuery"))
        .and(wiremock::matchers::body_json(json!({
            "Query": "AlertInfo | limit 1",
            "Timespan": "P30D"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schema": [],
            "results": []
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    let result = server
        .call_tool("hunt", &args(json!({"query": "AlertInfo | limit 1"})))
        .await;

    assert!(!result.is_error);
    assert_eq!(result.text_content(), NO_RESULTS);
}

#[tokio::test]
async fn hunt_defaults_to_configured_window() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/security/runHuntingQuery"))
        .and(wiremock::matchers::body_json(json!({
            "Query": "T | limit 1",
            "Timespan": "P7D"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schema": [],
            "results": [{"DeviceName": "ws-01"}]
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let server = server_with(&mock, |settings| settings.max_lookback_days = 7).await;
    let result = server
        .call_tool("hunt", &args(json!({"query": "T | limit 1"})))
        .await;

    assert!(!result.is_error, "{}", result.text_content());
    assert!(result.text_content().contains("ws-01"));
}

#[tokio::test]
async fn hunt_service_error_is_rendered() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/security/runHuntingQuery"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Failed to resolve column 'Nope'"))
        .mount(&mock)
        .await;

    let server = server_for(&mock).await;
    let result = server
        .call_tool("hunt", &args(json!({"query": "DeviceEvents | project Nope", "days": "2"})))
        .await;

    assert!(result.is_error);
    let text = result.text_content();
    assert!(text.starts_with("Error: RequestError"));
    assert!(text.contains("Failed to resolve column 'Nope'"));
}

#[tokio::test]
async fn unknown_tool_is_error_result() {
    let mock = MockServer::start().await;
    let server = server_for(&mock).await;

    let result = server.call_tool("delete_everything", &HashMap::new()).await;
    assert!(result.is_error);
    assert!(result.text_content().contains("Unknown tool: delete_everything"));
}

#[tokio::test]
async fn jsonrpc_initialize_and_list_tools() {
    let mock = MockServer::start().await;
    let server = server_for(&mock).await;

    let init = server
        .handle_request(rpc(json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": {"protocolVersion": "2024-11-05", "capabilities": {}}
        })))
        .await
        .unwrap();
    let init = serde_json::to_value(init).unwrap();
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(init["result"]["serverInfo"]["name"], "defender-graph-mcp");

    let list = server
        .handle_request(rpc(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})))
        .await
        .unwrap();
    let list = serde_json::to_value(list).unwrap();
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["hunt", "get_user", "list_users"]);
}

#[tokio::test]
async fn jsonrpc_notifications_and_unknown_methods() {
    let mock = MockServer::start().await;
    let server = server_for(&mock).await;

    let none = server
        .handle_request(rpc(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})))
        .await;
    assert!(none.is_none());

    let null_id = server
        .handle_request(rpc(json!({"jsonrpc": "2.0", "id": null, "method": "tools/list"})))
        .await
        .unwrap();
    assert_eq!(null_id.id, Value::Null);
    assert!(null_id.result.is_some());

    let unknown = server
        .handle_request(rpc(json!({"jsonrpc": "2.0", "id": 9, "method": "resources/list"})))
        .await
        .unwrap();
    assert_eq!(unknown.error.unwrap().code, -32601);

    let missing = server
        .handle_request(rpc(json!({"jsonrpc": "2.0", "id": 10, "method": "tools/call"})))
        .await
        .unwrap();
    assert_eq!(missing.error.unwrap().code, -32602);
}

#[tokio::test]
async fn jsonrpc_tools_call_wraps_result() {
    let mock = MockServer::start().await;
    let server = server_for(&mock).await;

    let response = server
        .handle_request(rpc(json!({
            "jsonrpc": "2.0", "id": "abc", "method": "tools/call",
            "params": {"name": "hunt", "arguments": {"query": "T", "days": 0}}
        })))
        .await
        .unwrap();

    let value = serde_json::to_value(response).unwrap();
    assert_eq!(value["id"], "abc");
    assert_eq!(value["result"]["isError"], true);
    assert!(value["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .starts_with("Error: ValidationError"));
}
