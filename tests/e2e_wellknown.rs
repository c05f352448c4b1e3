//! E2E tests for .well-known endpoints (WebFinger, NodeInfo, host-meta)

mod common;

use common::TestServer;
use serde_json::Value;

#[tokio::test]
async fn test_webfinger_resolves_seed_actor() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/.well-known/webfinger?resource=acct:testuser@test.example.com"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "application/jrd+json"
    );

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["subject"], "acct:testuser@test.example.com");
    assert_eq!(json["aliases"][0], "https://test.example.com/actors/testuser");

    let links = json["links"].as_array().unwrap();
    let self_link = links.iter().find(|link| link["rel"] == "self").unwrap();
    assert_eq!(self_link["type"], "application/activity+json");
    assert_eq!(self_link["href"], "https://test.example.com/actors/testuser");
}

#[tokio::test]
async fn test_webfinger_not_found_cases() {
    let server = TestServer::new().await;

    for query in [
        "",
        "?resource=acct:nobody@test.example.com",
        "?resource=acct:testuser@elsewhere.example",
        "?resource=testuser@test.example.com",
        "?resource=acct:testuser",
    ] {
        let response = server
            .client
            .get(&server.url(&format!("/.well-known/webfinger{}", query)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404, "query {:?}", query);
    }
}

#[tokio::test]
async fn test_nodeinfo_discovery() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/.well-known/nodeinfo"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let json: Value = response.json().await.unwrap();
    assert_eq!(
        json["links"][0]["rel"],
        "http://nodeinfo.diaspora.software/ns/schema/2.1"
    );
    assert_eq!(
        json["links"][0]["href"],
        "https://test.example.com/nodeinfo/2.1"
    );
}

#[tokio::test]
async fn test_nodeinfo_document() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/nodeinfo/2.1"))
        .header("Accept", "application/json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["version"], "2.1");
    assert_eq!(json["software"]["name"], "fedigate");
    assert_eq!(json["protocols"][0], "activitypub");
    assert_eq!(json["usage"]["users"]["total"], 1);
    assert_eq!(json["usage"]["localPosts"], 0);
    assert_eq!(json["metadata"]["nodeName"], "Test Instance");
}

#[tokio::test]
async fn test_host_meta_endpoint() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/.well-known/host-meta"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/xrd+xml");
    let body = response.text().await.unwrap();
    assert!(body.contains(
        "template=\"https://test.example.com/.well-known/webfinger?resource={uri}\""
    ));
}
