use std::sync::Arc;
use std::time::Duration;

use api_types::PodStatusRecord;
use gateway::routes;
use gateway::GatewayState;
use poem::http::StatusCode;
use poem::test::TestClient;
use poem::Endpoint;
use relay_comm::ClientConfig;
use relay_comm::RelayClient;
use similar_asserts::assert_eq;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::body_string_contains;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

struct TestHarness<E: Endpoint> {
    state: Arc<GatewayState>,
    client: TestClient<E>,
}

fn harness(plugin_url: &str, export: bool, require_auth: bool) -> TestHarness<impl Endpoint> {
    let config = ClientConfig::new(plugin_url).with_request_timeout(Duration::from_secs(2));
    let plugin = RelayClient::new(config).expect("client");
    let state = Arc::new(GatewayState::new(plugin, export, CancellationToken::new()));
    TestHarness {
        state: state.clone(),
        client: TestClient::new(routes(state, require_auth)),
    }
}

fn dead_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

fn pod_json(name: &str, uid: &str) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "name": name, "namespace": "default", "uid": uid },
        "spec": { "containers": [{ "name": "c1", "image": "busybox" }] }
    })
}

fn record_json(name: &str, uid: &str) -> serde_json::Value {
    serde_json::json!({
        "podName": name,
        "podNamespace": "default",
        "podUid": uid,
        "containers": [{
            "name": "c1",
            "image": "busybox",
            "imageID": "",
            "ready": true,
            "restartCount": 0,
            "state": { "running": {} }
        }]
    })
}

#[test_log::test(tokio::test)]
async fn create_forwards_envelope_and_passes_status_through() {
    let plugin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/create"))
        .respond_with(ResponseTemplate::new(500).set_body_string("sbatch failed"))
        .expect(1)
        .mount(&plugin)
        .await;

    let h = harness(&plugin.uri(), false, false);
    let resp = h
        .client
        .post("/create")
        .body_json(&serde_json::json!([{ "pod": pod_json("p1", "u1") }]))
        .send()
        .await;

    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    resp.assert_text("sbatch failed").await;

    let received = plugin.received_requests().await.expect("recording enabled");
    let sent: serde_json::Value = serde_json::from_slice(&received[0].body).expect("json");
    assert_eq!(sent[0]["pod"]["metadata"]["uid"], serde_json::json!("u1"));
    assert_eq!(sent[0]["configMaps"], serde_json::json!([]));
    assert_eq!(sent[0]["containers"], serde_json::json!([]));
}

#[test_log::test(tokio::test)]
async fn create_with_export_attaches_container_view() {
    let plugin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/create"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&plugin)
        .await;

    let h = harness(&plugin.uri(), true, false);
    let resp = h
        .client
        .post("/create")
        .body_json(&serde_json::json!([{ "pod": pod_json("p1", "u1") }]))
        .send()
        .await;
    resp.assert_status_is_ok();

    let received = plugin.received_requests().await.expect("recording enabled");
    let sent: serde_json::Value = serde_json::from_slice(&received[0].body).expect("json");
    assert_eq!(sent[0]["containers"][0]["name"], serde_json::json!("c1"));
}

#[test_log::test(tokio::test)]
async fn malformed_create_is_rejected_locally() {
    let plugin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/create"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&plugin)
        .await;

    let h = harness(&plugin.uri(), false, false);
    let resp = h.client.post("/create").body("[{\"pod\": 12").send().await;
    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    // Still serving afterwards.
    let resp = h.client.post("/updateCache").body("u1").send().await;
    resp.assert_status_is_ok();
}

#[test_log::test(tokio::test)]
async fn unreachable_plugin_yields_500() {
    let h = harness(&dead_endpoint(), false, false);
    let resp = h
        .client
        .post("/create")
        .body_json(&serde_json::json!([{ "pod": pod_json("p1", "u1") }]))
        .send()
        .await;
    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}

#[test_log::test(tokio::test)]
async fn status_skips_pods_reported_deleted() {
    let plugin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([record_json("p1", "u1"), record_json("p2", "u2")])),
        )
        .mount(&plugin)
        .await;

    let h = harness(&plugin.uri(), false, false);
    let query = serde_json::json!([pod_json("p1", "u1"), pod_json("p2", "u2")]);

    let resp = h.client.get("/status").body_json(&query).send().await;
    resp.assert_status_is_ok();
    let records: Vec<PodStatusRecord> = resp.json().await.value().deserialize();
    assert_eq!(records.len(), 2);

    h.client
        .post("/updateCache")
        .body("u2")
        .send()
        .await
        .assert_status_is_ok();
    assert!(h.state.cache.is_deleted("u2").await);
    assert!(h.state.cache.deleted_status("u2").await.is_some());

    let resp = h.client.get("/status").body_json(&query).send().await;
    resp.assert_status_is_ok();
    let records: Vec<PodStatusRecord> = resp.json().await.value().deserialize();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pod_uid, "u1".to_string());

    // The second query only forwarded the live pod.
    let received = plugin.received_requests().await.expect("recording enabled");
    let forwarded: Vec<serde_json::Value> =
        serde_json::from_slice(&received[1].body).expect("json");
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0]["metadata"]["uid"], serde_json::json!("u1"));
}

#[test_log::test(tokio::test)]
async fn delete_drops_cached_status_only_on_success() {
    let plugin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([record_json("p1", "u1"), record_json("p2", "u2")])),
        )
        .mount(&plugin)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/delete"))
        .and(body_string_contains("\"u2\""))
        .respond_with(ResponseTemplate::new(500))
        .mount(&plugin)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/delete"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&plugin)
        .await;

    let h = harness(&plugin.uri(), false, false);
    let query = serde_json::json!([pod_json("p1", "u1"), pod_json("p2", "u2")]);
    h.client
        .get("/status")
        .body_json(&query)
        .send()
        .await
        .assert_status_is_ok();
    assert!(h.state.cache.latest("u1").await.is_some());

    h.client
        .delete("/delete")
        .body_json(&pod_json("p1", "u1"))
        .send()
        .await
        .assert_status_is_ok();
    assert_eq!(h.state.cache.latest("u1").await, None);

    h.client
        .delete("/delete")
        .body_json(&pod_json("p2", "u2"))
        .send()
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.state.cache.latest("u2").await.is_some());
}

#[test_log::test(tokio::test)]
async fn malformed_plugin_status_is_500() {
    let plugin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&plugin)
        .await;

    let h = harness(&plugin.uri(), false, false);
    let resp = h
        .client
        .get("/status")
        .body_json(&serde_json::json!([]))
        .send()
        .await;
    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}

#[test_log::test(tokio::test)]
async fn empty_uid_update_is_rejected() {
    let h = harness(&dead_endpoint(), false, false);
    let resp = h.client.post("/updateCache").body("  ").send().await;
    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}

#[test_log::test(tokio::test)]
async fn pinglink_reports_plugin_reachability() {
    let plugin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&plugin)
        .await;

    let up = harness(&plugin.uri(), false, false);
    let resp = up.client.post("/pinglink").send().await;
    resp.assert_status_is_ok();
    resp.assert_text("0").await;

    let down = harness(&dead_endpoint(), false, false);
    let resp = down.client.post("/pinglink").send().await;
    resp.assert_status_is_ok();
    resp.assert_text("1").await;
}

#[test_log::test(tokio::test)]
async fn logs_are_streamed_from_plugin() {
    let plugin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/getLogs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("line one\nline two\n"))
        .mount(&plugin)
        .await;

    let h = harness(&plugin.uri(), false, false);
    let resp = h
        .client
        .get("/getLogs")
        .body_json(&serde_json::json!({
            "namespace": "default",
            "podUid": "u1",
            "podName": "p1",
            "containerName": "c1",
            "opts": { "tail": 2 }
        }))
        .send()
        .await;

    resp.assert_status_is_ok();
    resp.assert_text("line one\nline two\n").await;
}

#[test_log::test(tokio::test)]
async fn auth_requires_bearer_token() {
    let h = harness(&dead_endpoint(), false, true);

    let resp = h.client.post("/updateCache").body("u1").send().await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = h
        .client
        .post("/updateCache")
        .header("authorization", "Bearer token")
        .body("u1")
        .send()
        .await;
    resp.assert_status_is_ok();
}
