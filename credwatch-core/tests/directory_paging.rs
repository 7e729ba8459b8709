//! Integration tests for directory enumeration over HTTP.
//!
//! These tests verify that the directory client:
//! - Requests the first page with `$select` and `$top`
//! - Follows `@odata.nextLink` until it is absent
//! - Sends the bearer token on every page
//! - Fails the whole enumeration when any page fails

use std::collections::HashSet;

use chrono::{Duration, Utc};
use credwatch_core::{DirectoryClient, FetchError, StaticTokenSource, fetch_all_records};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

/// Two applications per page: one with two secrets, one with one.
fn page_body(page: usize, next_link: Option<String>) -> Value {
    let soon = (Utc::now() + Duration::days(5) + Duration::hours(1)).to_rfc3339();
    let later = (Utc::now() + Duration::days(90)).to_rfc3339();

    let mut body = json!({
        "value": [
            {
                "displayName": format!("app-{}a", page),
                "appId": format!("app-{}a-id", page),
                "createdDateTime": "2023-01-15T10:00:00Z",
                "passwordCredentials": [
                    { "keyId": format!("key-{}a-1", page), "endDateTime": soon },
                    { "keyId": format!("key-{}a-2", page), "endDateTime": later }
                ]
            },
            {
                "displayName": format!("app-{}b", page),
                "appId": format!("app-{}b-id", page),
                "createdDateTime": "2023-02-15T10:00:00Z",
                "passwordCredentials": [
                    { "keyId": format!("key-{}b-1", page), "endDateTime": later }
                ]
            }
        ]
    });

    if let Some(link) = next_link {
        body["@odata.nextLink"] = json!(link);
    }
    body
}

async fn mount_pages(server: &MockServer, fail_second: bool) {
    let next = |token: &str| format!("{}/v1.0/applications?$skiptoken={}", server.uri(), token);

    Mock::given(method("GET"))
        .and(path("/v1.0/applications"))
        .and(query_param("$top", "2"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(1, Some(next("p2")))))
        .expect(1)
        .mount(server)
        .await;

    let second = if fail_second {
        ResponseTemplate::new(500).set_body_string("backend unavailable")
    } else {
        ResponseTemplate::new(200).set_body_json(page_body(2, Some(next("p3"))))
    };
    Mock::given(method("GET"))
        .and(path("/v1.0/applications"))
        .and(query_param("$skiptoken", "p2"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(second)
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/applications"))
        .and(query_param("$skiptoken", "p3"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(3, None)))
        .expect(if fail_second { 0 } else { 1 })
        .mount(server)
        .await;
}

fn client(server: &MockServer) -> DirectoryClient<StaticTokenSource> {
    DirectoryClient::new(
        format!("{}/v1.0", server.uri()),
        StaticTokenSource::new("test-token"),
    )
    .with_page_size(2)
}

#[tokio::test]
async fn test_three_pages_of_two_applications() {
    let server = MockServer::start().await;
    mount_pages(&server, false).await;

    let records = fetch_all_records(&client(&server), Utc::now()).await.unwrap();

    // 3 pages x (2 + 1) secrets
    assert_eq!(records.len(), 9);

    let apps: HashSet<_> = records.iter().map(|r| r.app_id.as_str()).collect();
    assert_eq!(apps.len(), 6);

    let expiring: Vec<_> = records.iter().filter(|r| r.days() == Some(5)).collect();
    assert_eq!(expiring.len(), 3);
    assert!(records.iter().all(|r| r.has_secret));
}

#[tokio::test]
async fn test_page_error_yields_no_partial_result() {
    let server = MockServer::start().await;
    mount_pages(&server, true).await;

    let result = fetch_all_records(&client(&server), Utc::now()).await;

    match result {
        Err(FetchError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "backend unavailable");
        }
        other => panic!("expected a status error, got {:?}", other.map(|r| r.len())),
    }
}

#[tokio::test]
async fn test_undecodable_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/applications"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let result = fetch_all_records(&client(&server), Utc::now()).await;
    assert!(matches!(result, Err(FetchError::Decode { .. })));
}

#[tokio::test]
async fn test_application_without_secrets() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/applications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [ { "displayName": "lonely", "appId": "lonely-id", "passwordCredentials": [] } ]
        })))
        .mount(&server)
        .await;

    let records = fetch_all_records(&client(&server), Utc::now()).await.unwrap();

    assert_eq!(records.len(), 1);
    assert!(!records[0].has_secret);
    assert_eq!(records[0].days(), None);
    assert_eq!(records[0].created_time, None);
}
