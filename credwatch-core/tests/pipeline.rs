//! End-to-end runs against mocked directory, token and ingestion endpoints.

#![cfg(feature = "oauth")]

use chrono::{Duration, Utc};
use credwatch_core::{
    CredwatchError, Pipeline, RunState, Settings, SinkOutcome, read_snapshot, render,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

const KEY: &str = "Y3JlZHdhdGNoLXRlc3Qtc2hhcmVkLWtleS0wMTIzNDU2Nzg5";

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "directory-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

async fn mount_directory(server: &MockServer, credential_days: i64) {
    let end = Utc::now() + Duration::days(credential_days) + Duration::hours(1);
    Mock::given(method("GET"))
        .and(path("/v1.0/applications"))
        .and(header("Authorization", "Bearer directory-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {
                    "displayName": "billing-api",
                    "appId": "billing-id",
                    "createdDateTime": "2023-01-15T10:00:00Z",
                    "passwordCredentials": [
                        { "keyId": "k1", "endDateTime": end.to_rfc3339() }
                    ]
                }
            ]
        })))
        .mount(server)
        .await;
}

fn settings_toml(server: &MockServer, snapshot_dir: &std::path::Path) -> String {
    format!(
        r#"
threshold_days = 30
timeout_secs = 10

[identity]
tenant_id = "tenant-1"
client_id = "client-1"
client_secret = "client-secret"
authority_host = "{uri}"

[directory]
base_url = "{uri}/v1.0"

[ingestion_sink]
endpoint_id = "ws-123"
shared_key = "{key}"
base_url = "{uri}"

[notification_sink]
enabled = false

[snapshot]
dir = "{dir}"
"#,
        uri = server.uri(),
        key = KEY,
        dir = snapshot_dir.display().to_string().replace('\\', "/"),
    )
}

#[tokio::test]
async fn test_expiring_secret_is_uploaded() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    mount_token(&server).await;
    mount_directory(&server, 5).await;

    Mock::given(method("POST"))
        .and(path("/api/logs"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let settings = Settings::from_toml_str(&settings_toml(&server, temp.path())).unwrap();
    let pipeline = Pipeline::from_settings(&settings).unwrap();

    let now = Utc::now();
    let outcome = pipeline.run(now).await;

    assert_eq!(outcome.final_state, RunState::Done);
    assert_eq!(outcome.records_seen, 1);
    assert_eq!(outcome.selected.len(), 1);
    assert_eq!(outcome.selected[0].days(), Some(5));

    assert_eq!(outcome.sink_results.len(), 2);
    assert_eq!(outcome.sink_results[0].name, "log-ingestion");
    assert!(outcome.sink_results[0].delivered());
    assert_eq!(outcome.sink_results[1].name, "email");
    assert!(matches!(
        outcome.sink_results[1].result,
        Ok(SinkOutcome::Skipped { .. })
    ));
    assert!(outcome.fallback_report.is_none());

    // The snapshot re-renders to the same report the run produced.
    let snapshot = outcome.snapshot_path.unwrap();
    let saved = read_snapshot(&snapshot).unwrap();
    assert_eq!(saved, outcome.selected);
    assert_eq!(render(&saved, now), render(&outcome.selected, now));
}

#[tokio::test]
async fn test_rejected_upload_falls_back() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    mount_token(&server).await;
    mount_directory(&server, -10).await;

    Mock::given(method("POST"))
        .and(path("/api/logs"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let settings = Settings::from_toml_str(&settings_toml(&server, temp.path())).unwrap();
    let outcome = Pipeline::from_settings(&settings)
        .unwrap()
        .run(Utc::now())
        .await;

    assert_eq!(outcome.final_state, RunState::Done);
    assert_eq!(outcome.selected[0].days(), Some(-10));
    assert!(outcome.sink_results[0].failed());

    let fallback = outcome.fallback_report.unwrap();
    assert!(fallback.contains("billing-api"));
    assert!(fallback.contains("-10 days"));
}

#[tokio::test]
async fn test_token_failure_aborts() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client"
        })))
        .mount(&server)
        .await;

    let settings = Settings::from_toml_str(&settings_toml(&server, temp.path())).unwrap();
    let outcome = Pipeline::from_settings(&settings)
        .unwrap()
        .run(Utc::now())
        .await;

    assert_eq!(outcome.final_state, RunState::Aborted);
    assert!(matches!(outcome.error, Some(CredwatchError::Fetch(_))));
    assert!(outcome.snapshot_path.is_none());
}

#[test]
fn test_missing_identity_is_credential_error() {
    let settings = Settings::from_toml_str(
        r#"
[identity]
tenant_id = "tenant-1"
"#,
    )
    .unwrap();

    let error = Pipeline::from_settings(&settings).err().unwrap();
    match &error {
        CredwatchError::Credential { missing } => {
            assert_eq!(
                missing,
                &vec!["identity.client_id", "identity.client_secret"]
            );
        }
        other => panic!("expected credential error, got {}", other),
    }
    assert_eq!(error.stage(), RunState::Init);
}
