use std::time::Duration;

use medroute::mcp_client::{CallOutcome, McpClient, McpError, ServerSpec, StubLauncher, StubServer};
use medroute::region::RegionComposer;

fn specs(names: &[&str]) -> Vec<ServerSpec> {
    names
        .iter()
        .map(|name| ServerSpec::new(name, Default::default()))
        .collect()
}

#[tokio::test]
async fn routes_each_operation_to_its_owner() {
    let guides = StubServer::new("guides", &["search_guidelines"])
        .with_reply("search_guidelines", serde_json::json!("NG12 results"));
    let records = StubServer::new("records", &["fetch_record"]).with_handler("fetch_record", |args| {
        Ok(CallOutcome::Content(serde_json::json!({"id": args["id"], "age": 54})))
    });
    let launcher = StubLauncher::new(vec![guides.clone(), records.clone()]);

    let mut client = McpClient::new();
    client.connect(&launcher, &specs(&["guides", "records"])).await.unwrap();

    let found = client
        .call("search_guidelines", serde_json::json!({"query": "asthma"}), None)
        .await
        .unwrap();
    assert_eq!(found, CallOutcome::Content(serde_json::json!("NG12 results")));

    let record = client
        .call("fetch_record", serde_json::json!({"id": "p-1"}), None)
        .await
        .unwrap();
    assert_eq!(record, CallOutcome::Content(serde_json::json!({"id": "p-1", "age": 54})));

    assert_eq!(guides.call_count(), 1);
    assert_eq!(records.call_count(), 1);

    let miss = client
        .call("search_guideline", serde_json::json!({}), None)
        .await
        .unwrap_err();
    match miss {
        McpError::UnknownOperation { suggestions, .. } => {
            assert!(suggestions.iter().any(|s| s == "search_guidelines"));
        }
        other => panic!("expected unknown operation, got {other:?}"),
    }

    client.cleanup().await;
}

#[tokio::test]
async fn cleanup_twice_is_a_no_op() {
    let guides = StubServer::new("guides", &["search_guidelines"]);
    let mut client = McpClient::new();
    client
        .connect(&StubLauncher::new(vec![guides.clone()]), &specs(&["guides"]))
        .await
        .unwrap();

    client.cleanup().await;
    client.cleanup().await;

    assert_eq!(guides.close_count(), 1);
    assert_eq!(client.server_count(), 0);
    assert!(client.list_operations(None).unwrap().is_empty());
}

#[tokio::test]
async fn failed_startup_releases_started_servers() {
    let guides = StubServer::new("guides", &["search_guidelines"]);
    let launcher = StubLauncher::new(vec![guides.clone()]);

    let mut client = McpClient::new();
    let err = client
        .connect(&launcher, &specs(&["guides", "missing"]))
        .await
        .unwrap_err();

    assert!(matches!(err, McpError::SpawnFailed { .. }));
    assert_eq!(guides.close_count(), 1);
    assert_eq!(client.server_count(), 0);
}

#[tokio::test]
async fn startup_failure_does_not_wait_for_slow_servers() {
    let guides = StubServer::new("guides", &["search_guidelines"]);
    let launcher = StubLauncher::new(vec![guides.clone()])
        .with_launch_delay("guides", Duration::from_secs(30));

    let mut client = McpClient::new();
    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        client.connect(&launcher, &specs(&["guides", "missing"])),
    )
    .await;

    match outcome {
        Ok(Err(McpError::SpawnFailed { name, .. })) => assert_eq!(name, "missing"),
        other => panic!("expected a prompt spawn failure, got {other:?}"),
    }
    assert_eq!(client.server_count(), 0);
}

#[tokio::test]
async fn slow_operation_times_out() {
    let slow = StubServer::new("slow", &["search_guidelines"]).with_delay(Duration::from_millis(200));
    let mut client = McpClient::new().with_call_timeout(20);
    client
        .connect(&StubLauncher::new(vec![slow]), &specs(&["slow"]))
        .await
        .unwrap();

    let err = client
        .call("search_guidelines", serde_json::json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Timeout { timeout_ms: 20, .. }));
    client.cleanup().await;
}

#[test]
fn region_identifiers_are_normalized() {
    let composer = RegionComposer::builtin();

    let padded = composer.compose(" gb ");
    let canonical = composer.compose("GB");
    assert_eq!(padded, canonical);
    assert_eq!(
        canonical.server_names(),
        vec!["nice_guidelines", "bnf_drugs", "patient_context"]
    );

    assert!(composer.is_supported("united kingdom"));
    assert!(!composer.is_supported("Narnia"));

    let fallback = composer.compose("Narnia");
    assert!(fallback.is_fallback);
    assert_eq!(fallback.code, "INTL");
    assert_eq!(fallback.server_names().last(), Some(&"patient_context"));
}
