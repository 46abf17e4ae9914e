mod common;

use common::{AdapterOptions, error_kind, mcp_record, rest_record, serve_router, serve_spec, spawn_adapter};
use serde_json::{Value, json};
use std::collections::HashSet;

#[tokio::test]
async fn discovery_returns_enabled_allowlisted_tools_and_is_idempotent() {
    let spec_url = serve_spec().await;

    let mut disabled = rest_record("archived", &spec_url, &["listPets"], false);
    disabled.id = 2;
    let mut hidden = mcp_record("hidden", "https://hidden.example.com", &["search"]);
    hidden.id = 3;

    let allow: HashSet<String> = ["pets".to_string()].into_iter().collect();
    let adapter = spawn_adapter(
        vec![
            rest_record("pets", &spec_url, &["listPets", "createPet"], true),
            disabled,
            hidden,
        ],
        AdapterOptions {
            allowlist: Some(allow),
            ..AdapterOptions::default()
        },
    )
    .await;

    let tools = adapter.list_tools().await;
    let names: Vec<&str> = tools
        .as_array()
        .expect("tools array")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();

    // Disabled and non-allowlisted tools never appear; output is sorted.
    assert_eq!(names, vec!["mcp_pets_createpet", "mcp_pets_listpets"]);

    // Repeated discovery with no registry changes is byte-identical.
    let again = adapter.list_tools().await;
    assert_eq!(
        serde_json::to_string(&tools).expect("serialize"),
        serde_json::to_string(&again).expect("serialize")
    );

    // Each tool advertises a JSON object input schema.
    assert_eq!(tools[0]["inputSchema"]["type"], "object");
}

#[tokio::test]
async fn petstore_list_pets_passes_through_unchanged() {
    let spec_url = serve_spec().await;
    let upstream = serve_router(axum::Router::new().route(
        "/pets",
        axum::routing::get(|| async {
            (
                [("content-type", "application/json")],
                r#"[{"id":1,"name":"fido"}]"#,
            )
        }),
    ))
    .await;

    let mut record = rest_record("pets", &spec_url, &["listPets"], true);
    record.base_url = Some(upstream);

    let adapter = spawn_adapter(vec![record], AdapterOptions::default()).await;
    let result = adapter.call_tool("mcp_pets_listpets", json!({})).await;

    assert_eq!(result["isError"], false);
    assert_eq!(
        result["structuredContent"],
        json!([{ "id": 1, "name": "fido" }])
    );
}

#[tokio::test]
async fn disabled_tool_fails_with_tool_disabled_not_not_found() {
    let spec_url = serve_spec().await;
    let adapter = spawn_adapter(
        vec![rest_record("pets", &spec_url, &["listPets"], false)],
        AdapterOptions::default(),
    )
    .await;

    // Invoked directly, bypassing discovery (which never lists it).
    let result = adapter.call_tool("mcp_pets_listpets", json!({})).await;
    assert_eq!(error_kind(&result), "tool_disabled");

    let missing = adapter.call_tool("mcp_pets_never_registered", json!({})).await;
    assert_eq!(error_kind(&missing), "tool_not_found");
}

#[tokio::test]
async fn operation_outside_allowed_set_yields_operation_not_allowed() {
    let spec_url = serve_spec().await;
    // The spec also contains dropEverything; the tool allows only {A, B}.
    let adapter = spawn_adapter(
        vec![rest_record("pets", &spec_url, &["listPets", "createPet"], true)],
        AdapterOptions::default(),
    )
    .await;

    let result = adapter.call_tool("mcp_pets_dropeverything", json!({})).await;
    assert_eq!(error_kind(&result), "operation_not_allowed");
}

#[tokio::test]
async fn invalid_arguments_are_rejected_before_dispatch() {
    let spec_url = serve_router(axum::Router::new().route(
        "/openapi.json",
        axum::routing::get(|| async {
            r#"{
                "openapi": "3.0.0",
                "info": { "title": "t", "version": "1" },
                "servers": [{ "url": "https://api.example.com" }],
                "paths": {
                    "/pets/{petId}": {
                        "get": {
                            "operationId": "getPet",
                            "parameters": [{
                                "name": "petId",
                                "in": "path",
                                "required": true,
                                "schema": { "type": "integer" }
                            }],
                            "responses": { "200": { "description": "ok" } }
                        }
                    }
                }
            }"#
        }),
    ))
    .await;

    let adapter = spawn_adapter(
        vec![rest_record("pets", &format!("{spec_url}/openapi.json"), &["getPet"], true)],
        AdapterOptions::default(),
    )
    .await;

    let response = adapter
        .rpc(json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "tools/call",
            "params": { "name": "mcp_pets_getpet", "arguments": {} },
        }))
        .await;

    let error = &response["error"];
    assert_eq!(error["code"], -32602);
    let violations = error["data"]["violations"].as_array().expect("violations");
    assert!(violations.iter().any(|v| v["parameter"] == "petId"));
}

#[tokio::test]
async fn bearer_token_guards_mcp_but_not_health() {
    let spec_url = serve_spec().await;
    let adapter = spawn_adapter(
        vec![rest_record("pets", &spec_url, &["listPets"], true)],
        AdapterOptions {
            auth_token: Some("shared-token".into()),
            ..AdapterOptions::default()
        },
    )
    .await;

    let health = adapter
        .client
        .get(format!("{}/health", adapter.base))
        .send()
        .await
        .expect("health");
    assert!(health.status().is_success());

    let unauthorized = adapter
        .client
        .post(format!("{}/mcp", adapter.base))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
        .send()
        .await
        .expect("send");
    assert_eq!(unauthorized.status(), 401);

    let authorized: Value = adapter
        .client
        .post(format!("{}/mcp", adapter.base))
        .bearer_auth("shared-token")
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    assert!(authorized["result"]["tools"].is_array());
}

#[tokio::test]
async fn initialize_and_ping_answer_and_notifications_are_accepted() {
    let spec_url = serve_spec().await;
    let adapter = spawn_adapter(
        vec![rest_record("pets", &spec_url, &["listPets"], true)],
        AdapterOptions::default(),
    )
    .await;

    let init = adapter
        .rpc(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2025-03-26", "capabilities": {} },
        }))
        .await;
    assert_eq!(init["result"]["protocolVersion"], "2025-03-26");
    assert!(init["result"]["capabilities"]["tools"].is_object());

    let ping = adapter
        .rpc(json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }))
        .await;
    assert!(ping["result"].is_object());

    let notification = adapter
        .client
        .post(format!("{}/mcp", adapter.base))
        .json(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .send()
        .await
        .expect("send");
    assert_eq!(notification.status(), 202);
}

#[tokio::test]
async fn admin_crud_round_trips_through_the_store() {
    let spec_url = serve_spec().await;
    let adapter = spawn_adapter(
        vec![rest_record("pets", &spec_url, &["listPets"], true)],
        AdapterOptions {
            auth_token: Some("admin-token".into()),
            ..AdapterOptions::default()
        },
    )
    .await;
    let base = format!("{}/admin/v1/tools", adapter.base);

    // Unauthorized writes are rejected.
    let denied = adapter
        .client
        .post(&base)
        .json(&json!({ "name": "x" }))
        .send()
        .await
        .expect("send");
    assert_eq!(denied.status(), 401);

    let created: Value = adapter
        .client
        .post(&base)
        .bearer_auth("admin-token")
        .json(&json!({
            "name": "notes",
            "provider": "notes",
            "category": "misc",
            "adapter_type": "mcp",
            "mcp_server_url": "https://notes.example.com/mcp"
        }))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    let id = created["id"].as_i64().expect("id");

    let updated: Value = adapter
        .client
        .put(format!("{base}/{id}"))
        .bearer_auth("admin-token")
        .json(&json!({ "enabled": false }))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    assert_eq!(updated["enabled"], false);

    // The edit is inert for the running registry: discovery still reflects
    // the startup snapshot, and the new tool is absent until a restart.
    let tools = adapter.list_tools().await;
    assert!(
        tools
            .as_array()
            .expect("tools")
            .iter()
            .all(|t| t["name"] != "mcp_notes_call")
    );

    let deleted = adapter
        .client
        .delete(format!("{base}/{id}"))
        .bearer_auth("admin-token")
        .send()
        .await
        .expect("send");
    assert_eq!(deleted.status(), 204);

    let listed: Value = adapter
        .client
        .get(&base)
        .bearer_auth("admin-token")
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    assert_eq!(listed.as_array().expect("array").len(), 1);
}
