//! Bibliothèque, install/start/stop/uninstall et jetons de fraîcheur

use axum::http::StatusCode;
use passerelle_devkit::TestHarness;
use passerelle_kernel::lcm::lifecycle::{requested_state_command, uninstall_command};
use passerelle_kernel::lcm::RequestedState;
use serde_json::json;

const NGINX: (&str, &str, &str) = ("du-1", "nginx", "docker://nginx:latest");

fn harness_with_nginx() -> TestHarness {
    let harness = TestHarness::new().unwrap();
    harness.script_modules(&[NGINX], &[("du-1", "Active")]);
    harness
}

#[tokio::test]
async fn modules_view_merges_units_and_catalog() {
    let harness = harness_with_nginx();
    let (status, _) = harness
        .post("/api/lcm/add", json!({ "url": "docker://redis:7", "name": "redis", "version": "7" }))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);

    let (status, body) = harness.get("/api/lcm").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalContainers"], 1);
    assert_eq!(body["activeContainers"], 1);
    assert_eq!(body["modules"][0]["name"], "nginx");
    assert_eq!(body["modules"][0]["executionStatus"], "Active");
    assert_eq!(body["modules"][0]["deploymentStatus"], "Installed");
    assert_eq!(body["modules"][0]["unitIndex"], 1);
    assert_eq!(body["modules"][0]["deploymentIndex"], 1);
    assert_eq!(body["deploymentUnits"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["libraryCatalog"][0]["name"], "redis");
    assert_eq!(body["libraryCatalog"][0]["version"], "7");
    assert!(body["freshness"].is_string());
    assert!(body.get("installedIdentifiers").is_none());
}

#[tokio::test]
async fn catalog_add_and_delete_never_touch_the_device() {
    let harness = TestHarness::new().unwrap();

    let (status, body) = harness.post("/api/lcm/add", json!({ "url": "docker://redis:7", "name": "redis" })).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(!body["container"]["uuid"].as_str().unwrap().is_empty());

    let (status, _) = harness.post("/api/lcm/add", json!({ "name": "no-url" })).await.unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = harness.post("/api/lcm/delete", json!({ "name": "redis" })).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);
    assert!(harness.gateway.commands().is_empty());
}

#[tokio::test]
async fn install_of_already_present_url_is_rejected() {
    let harness = harness_with_nginx();

    let (status, body) = harness
        .post("/api/lcm/install", json!({ "url": "docker://nginx:latest", "name": "nginx" }))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already installed"));
    assert!(harness.gateway.sent_containing("InstallDU").is_empty());
    assert!(!harness.gateway.commands().contains(&"reboot".to_string()));
}

#[tokio::test]
async fn install_sends_command_consumes_catalog_and_restarts() {
    let harness = harness_with_nginx();
    harness.post("/api/lcm/add", json!({ "url": "docker://redis:7", "name": "redis" })).await.unwrap();
    let before = harness.freshness().await.unwrap();

    let (status, body) = harness
        .post("/api/lcm/install", json!({ "url": "docker://redis:7", "name": "redis" }))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uuid"], "00000000-0000-5000-b000-000000000001");
    assert_ne!(body["freshness"], before.as_str());

    let installs = harness.gateway.sent_containing("InstallDU");
    assert_eq!(installs.len(), 1);
    assert!(installs[0].contains("URL=\"docker://redis:7\""));
    assert!(installs[0].contains("UUID=\"00000000-0000-5000-b000-000000000001\""));
    assert_eq!(harness.gateway.commands().last().map(String::as_str), Some("reboot"));

    let (_, view) = harness.get("/api/lcm").await.unwrap();
    assert_eq!(view["libraryCatalog"], json!([]));
}

#[tokio::test]
async fn install_skips_identifier_already_on_device() {
    let harness = TestHarness::new().unwrap();
    harness.script_modules(&[("00000000-0000-5000-b000-000000000001", "old", "docker://old:1")], &[]);

    let (status, body) = harness
        .post(
            "/api/lcm/install",
            json!({ "url": "docker://new:1", "name": "new", "uuid": "00000000-0000-5000-b000-000000000001" }),
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uuid"], "00000000-0000-5000-b000-000000000002");
}

#[tokio::test]
async fn start_and_stop_address_execution_unit() {
    let harness = harness_with_nginx();
    let token = harness.freshness().await.unwrap();
    harness.gateway.clear_sent();

    let (status, _) = harness.post("/api/lcm/stop", json!({ "unitIndex": 1, "freshness": token })).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let (status, _) = harness.post("/api/lcm/start", json!({ "unitIndex": 1, "freshness": token })).await.unwrap();
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        harness.gateway.commands(),
        vec![
            requested_state_command(1, RequestedState::Idle),
            requested_state_command(1, RequestedState::Active),
        ]
    );
}

#[tokio::test]
async fn start_validates_before_sending() {
    let harness = harness_with_nginx();
    let token = harness.freshness().await.unwrap();
    harness.gateway.clear_sent();

    let (status, body) = harness.post("/api/lcm/start", json!({ "freshness": token })).await.unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing unitIndex");

    let (status, _) = harness.post("/api/lcm/start", json!({ "unitIndex": 0, "freshness": token })).await.unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = harness.post("/api/lcm/start", json!({ "unitIndex": 1 })).await.unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(harness.gateway.commands().is_empty());
}

#[tokio::test]
async fn uninstall_stops_removes_restarts_and_invalidates_indices() {
    let harness = harness_with_nginx();
    let token = harness.freshness().await.unwrap();
    harness.gateway.clear_sent();

    let (status, body) = harness
        .post("/api/lcm/uninstall", json!({ "unitIndex": 1, "deploymentIndex": 1, "freshness": token }))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        harness.gateway.commands(),
        vec![
            requested_state_command(1, RequestedState::Idle),
            uninstall_command(1),
            "reboot".to_string(),
        ]
    );
    let fresh = body["freshness"].as_str().unwrap().to_string();
    assert_ne!(fresh, token);

    harness.gateway.clear_sent();
    let (status, body) = harness.post("/api/lcm/start", json!({ "unitIndex": 1, "freshness": token })).await.unwrap();
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("stale"));
    let (status, _) = harness
        .post("/api/lcm/uninstall", json!({ "unitIndex": 1, "deploymentIndex": 1, "freshness": token }))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(harness.gateway.commands().is_empty());
}

#[tokio::test]
async fn failed_restart_does_not_fail_uninstall() {
    let harness = harness_with_nginx();
    let token = harness.freshness().await.unwrap();
    harness.gateway.on_failing("reboot", "connection closed by remote host", 255);

    let (status, body) = harness
        .post("/api/lcm/uninstall", json!({ "unitIndex": 1, "deploymentIndex": 1, "freshness": token }))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn host_change_redirects_sessions_and_invalidates_indices() {
    let harness = harness_with_nginx();
    let token = harness.freshness().await.unwrap();

    let (status, body) = harness.post("/api/update-ssh-host", json!({ "host": "10.0.0.2" })).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["freshness"], token.as_str());
    assert_eq!(harness.state.profile.lock().host, "10.0.0.2");

    harness.gateway.clear_sent();
    let (status, _) = harness.post("/api/lcm/stop", json!({ "unitIndex": 1, "freshness": token })).await.unwrap();
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(harness.gateway.commands().is_empty());

    harness.get("/api/lcm").await.unwrap();
    assert!(harness.gateway.sent().iter().all(|s| s.host == "10.0.0.2"));
}

#[tokio::test]
async fn test_connection_leaves_active_host_alone() {
    let harness = TestHarness::new().unwrap();
    harness.gateway.unreachable_host("10.9.9.9");

    let (status, body) = harness.post("/api/test-connection", json!({ "host": "10.9.9.9" })).await.unwrap();
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().starts_with("SSH error"));

    let (status, body) = harness.post("/api/test-connection", json!({ "host": "10.0.0.7" })).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(harness.gateway.sent().last().map(|s| s.host.as_str()), Some("10.0.0.7"));

    assert_eq!(harness.state.profile.lock().host, "192.168.246.160");

    let (status, _) = harness.post("/api/test-connection", json!({})).await.unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_entry_counts_do_not_take_down_the_server() {
    let harness = TestHarness::new().unwrap();
    harness.gateway.on_ubus(
        "SoftwareModules.?",
        "SoftwareModules.DeploymentUnitNumberOfEntries=4294967295\nSoftwareModules.ExecutionUnitNumberOfEntries=7\n",
    );

    let (status, body) = harness.get("/api/lcm").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deploymentUnits"].as_array().map(Vec::len), Some(256));
    assert_eq!(body["totalContainers"], 7);
    assert_eq!(harness.gateway.sent_containing("DeploymentUnit.").len(), 256);
}

#[tokio::test]
async fn install_rejects_identifier_that_is_not_a_uuid() {
    let harness = harness_with_nginx();

    let (status, body) = harness
        .post("/api/lcm/install", json!({ "url": "docker://x:1", "name": "x", "uuid": "a\", Privileged=true, Z=\"b" }))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid uuid"));
    assert!(harness.gateway.commands().is_empty());
}

#[tokio::test]
async fn install_continues_after_non_zero_exit() {
    let harness = harness_with_nginx();
    harness.post("/api/lcm/add", json!({ "url": "docker://redis:7", "name": "redis" })).await.unwrap();
    harness.gateway.on_failing("InstallDU", "warning: image pull slow", 1);

    let (status, body) = harness
        .post("/api/lcm/install", json!({ "url": "docker://redis:7", "name": "redis" }))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "warning: image pull slow");
    assert_eq!(harness.gateway.commands().last().map(String::as_str), Some("reboot"));

    let (_, view) = harness.get("/api/lcm").await.unwrap();
    assert_eq!(view["libraryCatalog"], json!([]));
}

#[tokio::test]
async fn deployed_but_never_started_module_can_be_uninstalled() {
    let harness = TestHarness::new().unwrap();
    harness.script_modules(&[NGINX], &[]);

    let (_, view) = harness.get("/api/lcm").await.unwrap();
    assert_eq!(view["modules"][0]["unitIndex"], serde_json::Value::Null);
    assert_eq!(view["modules"][0]["deploymentIndex"], 1);
    let token = view["freshness"].as_str().unwrap().to_string();
    harness.gateway.clear_sent();

    let (status, _) = harness
        .post("/api/lcm/uninstall", json!({ "deploymentIndex": 1, "freshness": token }))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.gateway.commands(), vec![uninstall_command(1), "reboot".to_string()]);
}

#[tokio::test]
async fn execution_only_records_do_not_block_install() {
    let harness = TestHarness::new().unwrap();
    harness.script_modules(&[], &[("eu-7", "Active")]);

    let (_, view) = harness.get("/api/lcm").await.unwrap();
    assert_eq!(view["modules"][0]["url"], "N/A");

    let (status, _) = harness.post("/api/lcm/install", json!({ "url": "N/A", "name": "odd" })).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.gateway.sent_containing("InstallDU").len(), 1);
}

#[tokio::test]
async fn host_change_and_index_view_stay_consistent() {
    let harness = harness_with_nginx();
    let (_, before) = harness.state.indexed_session();

    let (previous, after) = harness.state.set_host("10.0.0.3");
    assert_eq!(previous, "192.168.246.160");
    assert_ne!(before, after);

    let (session, token) = harness.state.indexed_session();
    assert_eq!(session.profile().host, "10.0.0.3");
    assert_eq!(token, after);
    assert!(harness.state.lcm.freshness().check(&before.to_string()).is_err());
}
