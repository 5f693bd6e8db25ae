//! Integration tests for the Labdesk Server
//!
//! Every test runs against its own in-process server seeded with the demo
//! labs: lab 1 is running, lab 2 is still being provisioned.

use std::time::Duration;

use chrono::TimeDelta;
use integration_tests::*;
use labdesk_server::Config;
use reqwest::StatusCode;

async fn server() -> TestServer {
    TestServer::start().await.expect("Failed to start server")
}

async fn expect_error(response: reqwest::Response, status: StatusCode, code: u32) {
    assert_eq!(response.status(), status);
    let error: ErrorResponse = response.json().await.expect("Failed to parse error");
    assert_eq!(error.code, code, "unexpected error: {}", error.message);
}

// ============================================================================
// Health Tests
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let server = server().await;

    let response = server
        .client
        .get(server.api_url("/health"))
        .send()
        .await
        .expect("Failed to send health request");
    assert!(response.status().is_success());

    let health: HealthResponse = response.json().await.expect("Failed to parse health response");
    assert_eq!(health.status, "ok");
    assert_eq!(health.backend, "simulated");
    assert_eq!(health.labs, 2);
    assert!(!health.version.is_empty());
}

// ============================================================================
// Listing Tests
// ============================================================================

#[tokio::test]
async fn test_list_labs() {
    let server = server().await;

    let list: ListLabsResponse = server
        .client
        .get(server.api_url("/labs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(list.total, 2);
    let web = &list.labs[0];
    assert_eq!(web.id, 1);
    assert_eq!(web.name, "Web Application Security Lab");
    assert_eq!(web.status, "running");
    assert!(!web.expired);
    assert!(!web.access.as_ref().unwrap().vpn_config.is_empty());

    let network = &list.labs[1];
    assert_eq!(network.status, "creating");
    assert!(network.access.is_none());
}

#[tokio::test]
async fn test_list_is_idempotent() {
    let server = server().await;

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let list: ListLabsResponse = server
            .client
            .get(server.api_url("/labs"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        snapshots.push(
            list.labs
                .iter()
                .map(|lab| (lab.id, lab.status.clone(), lab.expires_at))
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(snapshots[0], snapshots[1]);
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let server = server().await;

    let list: ListLabsResponse = server
        .client
        .get(server.api_url("/labs?status=CREATING&refresh=false"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.labs[0].id, 2);

    let response = server
        .client
        .get(server.api_url("/labs?status=paused"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::BAD_REQUEST, 1001).await;
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_extend_running_lab() {
    let server = server().await;
    let before = server.get_lab(1).await.unwrap();

    let response = server
        .client
        .post(server.api_url("/labs/1/extend"))
        .json(&serde_json::json!({ "hours": 3 }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let extended: LabResponse = response.json().await.unwrap();
    assert_eq!(extended.status, "running");
    assert_eq!(extended.expires_at, before.expires_at + TimeDelta::hours(3));
    assert_eq!(server.get_lab(1).await.unwrap().expires_at, extended.expires_at);
}

#[tokio::test]
async fn test_extend_rejects_non_positive_hours() {
    let server = server().await;
    let before = server.get_lab(1).await.unwrap();

    for hours in [-1, 0] {
        let response = server
            .client
            .post(server.api_url("/labs/1/extend"))
            .json(&serde_json::json!({ "hours": hours }))
            .send()
            .await
            .unwrap();
        expect_error(response, StatusCode::BAD_REQUEST, 1001).await;
    }

    assert_eq!(server.get_lab(1).await.unwrap().expires_at, before.expires_at);
}

#[tokio::test]
async fn test_stop_lab() {
    let server = server().await;
    let before = server.get_lab(1).await.unwrap();

    let response = server
        .client
        .post(server.api_url("/labs/1/stop"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let stopped: LabResponse = response.json().await.unwrap();
    assert_eq!(stopped.status, "stopped");
    assert!(stopped.access.is_none());
    assert_eq!(stopped.expires_at, before.expires_at);

    // Stopping again is rejected and changes nothing
    let response = server
        .client
        .post(server.api_url("/labs/1/stop"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::CONFLICT, 2002).await;

    let response = server
        .client
        .post(server.api_url("/labs/1/extend"))
        .json(&serde_json::json!({ "hours": 1 }))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::CONFLICT, 2002).await;

    let after = server.get_lab(1).await.unwrap();
    assert_eq!(after.status, "stopped");
    assert_eq!(after.expires_at, before.expires_at);
}

#[tokio::test]
async fn test_creating_lab_rejects_actions() {
    let server = server().await;

    let response = server
        .client
        .post(server.api_url("/labs/2/stop"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::CONFLICT, 2002).await;

    assert_eq!(server.get_lab(2).await.unwrap().status, "creating");
}

#[tokio::test]
async fn test_delete_lab() {
    let server = server().await;

    // Running and creating labs must be stopped or failed first
    for id in [1, 2] {
        let response = server
            .client
            .delete(server.api_url(&format!("/labs/{}", id)))
            .send()
            .await
            .unwrap();
        expect_error(response, StatusCode::CONFLICT, 2002).await;
    }

    server
        .client
        .post(server.api_url("/labs/1/stop"))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let response = server
        .client
        .delete(server.api_url("/labs/1"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let removed: LabResponse = response.json().await.unwrap();
    assert_eq!(removed.id, 1);
    assert_eq!(removed.status, "stopped");

    let response = server
        .client
        .get(server.api_url("/labs/1"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::NOT_FOUND, 2001).await;

    let response = server
        .client
        .delete(server.api_url("/labs/1"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::NOT_FOUND, 2001).await;

    // The backend forgot it too, so a refresh does not bring it back
    let list: ListLabsResponse = server
        .client
        .get(server.api_url("/labs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.labs[0].id, 2);
}

#[tokio::test]
async fn test_unknown_lab() {
    let server = server().await;

    let response = server
        .client
        .get(server.api_url("/labs/42"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::NOT_FOUND, 2001).await;

    let response = server
        .client
        .post(server.api_url("/labs/42/stop"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::NOT_FOUND, 2001).await;

    let response = server
        .client
        .post(server.api_url("/labs/42/extend"))
        .json(&serde_json::json!({ "hours": 2 }))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::NOT_FOUND, 2001).await;

    let list: ListLabsResponse = server
        .client
        .get(server.api_url("/labs?refresh=false"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.total, 2);
}

// ============================================================================
// Provisioning Tests
// ============================================================================

#[tokio::test]
async fn test_created_lab_becomes_running() {
    let server = server().await;

    let response = server
        .client
        .post(server.api_url("/labs"))
        .json(&CreateLabRequest::sample("Red Team Lab"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let created: LabResponse = response.json().await.unwrap();
    assert_eq!(created.status, "creating");
    assert!(created.access.is_none());
    assert_eq!(created.vms.len(), 2);

    server
        .backend
        .complete_provisioning(created.id)
        .await
        .expect("Failed to provision lab");

    let running = server.wait_for_status(created.id, "running").await.unwrap();
    let access = running.access.expect("running lab should carry access");
    assert!(!access.vpn_config.is_empty());
    assert_eq!(access.ssh_commands.len(), 2);
    assert_eq!(access.rdp_commands.len(), 1);
    assert!(!running.vms.is_empty());
}

#[tokio::test]
async fn test_pushed_failure_event() {
    let server = server().await;

    let response = server
        .client
        .post(server.api_url("/provisioning/events"))
        .json(&serde_json::json!({
            "type": "failed",
            "lab_id": 2,
            "reason": "hypervisor out of capacity"
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let failed = server.get_lab(2).await.unwrap();
    assert_eq!(failed.status, "failed");
    assert_eq!(
        failed.failure_reason.as_deref(),
        Some("hypervisor out of capacity")
    );

    // A late success for a failed lab is a state error
    let response = server
        .client
        .post(server.api_url("/provisioning/events"))
        .json(&serde_json::json!({
            "type": "ready",
            "lab_id": 2,
            "access": { "vpn_config": "client\n" }
        }))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::CONFLICT, 2002).await;
}

#[tokio::test]
async fn test_create_lab_validation() {
    let server = server().await;

    let mut request = CreateLabRequest::sample("");
    let response = server
        .client
        .post(server.api_url("/labs"))
        .json(&request)
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::BAD_REQUEST, 1001).await;

    request.name = "Too Big".to_string();
    request.vms = (0..6)
        .map(|i| VmRequest {
            name: format!("vm-{}", i),
            os: "Ubuntu 22.04".to_string(),
            terminal_enabled: true,
            rdp_enabled: false,
        })
        .collect();
    let response = server
        .client
        .post(server.api_url("/labs"))
        .json(&request)
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::BAD_REQUEST, 1001).await;
}

#[tokio::test]
async fn test_active_lab_limit() {
    let server = server().await;

    // Two demo labs are active, the limit is three
    let response = server
        .client
        .post(server.api_url("/labs"))
        .json(&CreateLabRequest::sample("Third Lab"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let response = server
        .client
        .post(server.api_url("/labs"))
        .json(&CreateLabRequest::sample("Fourth Lab"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::TOO_MANY_REQUESTS, 2003).await;
}

// ============================================================================
// Access Tests
// ============================================================================

#[tokio::test]
async fn test_access_view() {
    let server = server().await;

    let view: AccessViewResponse = server
        .client
        .get(server.api_url("/labs/1/access"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(view.lab_id, 1);
    let vpn = view.vpn.expect("running lab should have a VPN profile");
    assert_eq!(vpn.filename, "lab_1.ovpn");
    assert!(vpn.config.contains("vpn.labs.local"));
    assert_eq!(view.ssh.len(), 3);
    assert!(view
        .rdp
        .iter()
        .any(|c| c.vm == "Windows Target" && c.command == "10.0.0.20:3389"));

    // No access details yet: nothing to render
    let body: serde_json::Value = server
        .client
        .get(server.api_url("/labs/2/access"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body.is_null());
}

#[tokio::test]
async fn test_vpn_config_download() {
    let server = server().await;

    let response = server
        .client
        .get(server.api_url("/labs/1/vpn-config"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let disposition = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert_eq!(disposition, "attachment; filename=\"lab_1.ovpn\"");
    assert!(response.text().await.unwrap().starts_with("client"));

    let response = server
        .client
        .get(server.api_url("/labs/2/vpn-config"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::CONFLICT, 2002).await;
}

#[tokio::test]
async fn test_vm_launch_actions() {
    let server = server().await;

    let view: VmAccessResponse = server
        .client
        .get(server.api_url("/labs/1/vms"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view.lab_id, 1);
    assert_eq!(view.terminal.len(), 3);
    assert_eq!(view.rdp.len(), 2);
    assert!(view.terminal.iter().all(|target| target.url.is_some()));

    let response = server
        .client
        .get(server.api_url("/labs/1/vms/Windows%20Target/rdp"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(reqwest::header::LOCATION).unwrap(),
        "/rdp/1/Windows%20Target"
    );

    // Capability disabled
    let response = server
        .client
        .get(server.api_url("/labs/1/vms/Vulnerable%20Web%20Server/rdp"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::CONFLICT, 3002).await;

    let response = server
        .client
        .get(server.api_url("/labs/1/vms/Mail%20Server/terminal"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::NOT_FOUND, 3001).await;

    // Not running yet
    let response = server
        .client
        .get(server.api_url("/labs/2/vms/Kali%20Linux%20Attack%20Box/terminal"))
        .send()
        .await
        .unwrap();
    expect_error(response, StatusCode::CONFLICT, 2002).await;
}

#[tokio::test]
async fn test_launch_base_url() {
    let config = Config {
        launch_base_url: "https://labs.example.com".to_string(),
        ..Config::default()
    };
    let server = TestServer::start_with(config).await.unwrap();

    let response = server
        .client
        .get(server.api_url("/labs/1/vms/Kali%20Linux%20Attack%20Box/terminal"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(reqwest::header::LOCATION).unwrap(),
        "https://labs.example.com/terminal/1/Kali%20Linux%20Attack%20Box"
    );
}

// ============================================================================
// Change Feed Tests
// ============================================================================

#[tokio::test]
async fn test_event_stream_reports_stop() {
    let server = server().await;

    let mut events = server
        .client
        .get(server.api_url("/events"))
        .send()
        .await
        .unwrap();
    assert!(events.status().is_success());

    server
        .client
        .post(server.api_url("/labs/1/stop"))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        let mut buffer = String::new();
        while let Some(chunk) = events.chunk().await.unwrap() {
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            if buffer.contains("\"kind\":\"stopped\"") {
                return buffer;
            }
        }
        buffer
    })
    .await
    .expect("stop should be announced");

    assert!(received.contains("event: lab"));
    assert!(received.contains("\"status\":\"stopped\""));
}
