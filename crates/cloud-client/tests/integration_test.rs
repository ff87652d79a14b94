//! Integration tests for the cloud agent client
//!
//! These tests require a running cloud agent.
//! Set CLOUD_AGENT_URL and CLOUD_AGENT_TOKEN environment variables to run.

use cloud_client::{CloudClient, CloudClientTrait, GroupSpec, StaticTokenAuthorizer};

async fn client() -> CloudClient {
    let url = std::env::var("CLOUD_AGENT_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let token = std::env::var("CLOUD_AGENT_TOKEN").expect("CLOUD_AGENT_TOKEN environment variable must be set");
    CloudClient::connect(url, &StaticTokenAuthorizer::new(token))
        .await
        .expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires running cloud agent
async fn test_validate_connection() {
    let client = client().await;
    client.validate_connection().await.expect("Agent not reachable");
}

#[tokio::test]
#[ignore]
async fn test_group_lifecycle() {
    let client = client().await;
    let spec = GroupSpec { name: "it-group".to_string(), location: "westus".to_string() };

    client.reconcile_group(&spec).await.expect("Failed to reconcile group");
    // Reconcile twice; the second call must be a no-op
    client.reconcile_group(&spec).await.expect("Second reconcile failed");
    assert_eq!(client.get_group("it-group").await.expect("get").name, "it-group");

    client.delete_group("it-group").await.expect("Failed to delete group");
    let err = client.get_group("it-group").await.unwrap_err();
    assert!(err.is_not_found());
}
