use std::sync::Arc;
use std::time::Duration;

use kanban_core::{BackendId, ConfigError, ErrorKind, GatewayConfig, GatewayError, Registry};
use kanban_gateway::{catalog, Gateway, GatewayBuilder, RetryPolicy};
use kanban_pool::PoolConfig;
use kanban_test::{FakeConnector, StubAdapter, TestGateway};
use serde_json::json;

use BackendId::{Erp, General, Secondary};

/// Stub adapters and fake backends behind a gateway under test.
struct Stubs {
    erp: Arc<StubAdapter>,
    secondary: Arc<StubAdapter>,
    general: Arc<StubAdapter>,
    erp_backend: FakeConnector,
    secondary_backend: FakeConnector,
    general_backend: FakeConnector,
}

impl Stubs {
    fn backend(&self, backend: BackendId) -> &FakeConnector {
        match backend {
            Erp => &self.erp_backend,
            Secondary => &self.secondary_backend,
            General => &self.general_backend,
        }
    }
}

/// A builder serving the named catalog operations with stubs.
fn stubbed(ops: &[&'static str]) -> (GatewayBuilder, Stubs) {
    let descriptors: Vec<_> = catalog::descriptors()
        .into_iter()
        .filter(|d| ops.contains(&d.name))
        .collect();
    let served_by = |backend: BackendId| -> Vec<&'static str> {
        descriptors
            .iter()
            .filter(|d| d.backends.contains(&backend))
            .map(|d| d.name)
            .collect()
    };
    let stubs = Stubs {
        erp: Arc::new(StubAdapter::new(Erp, &served_by(Erp))),
        secondary: Arc::new(StubAdapter::new(Secondary, &served_by(Secondary))),
        general: Arc::new(StubAdapter::new(General, &served_by(General))),
        erp_backend: FakeConnector::new(),
        secondary_backend: FakeConnector::new(),
        general_backend: FakeConnector::new(),
    };

    let builder = Gateway::builder(GatewayConfig::empty())
        .with_registry(Registry::new(descriptors).unwrap())
        .with_retry(RetryPolicy::immediate(3))
        .with_adapter(stubs.erp.clone())
        .with_adapter(stubs.secondary.clone())
        .with_adapter(stubs.general.clone())
        .with_connector(Erp, stubs.erp_backend.shared())
        .with_connector(Secondary, stubs.secondary_backend.shared())
        .with_connector(General, stubs.general_backend.shared());
    (builder, stubs)
}

fn harness(ops: &[&'static str]) -> (TestGateway, Stubs) {
    let (builder, stubs) = stubbed(ops);
    (TestGateway::from_builder(builder), stubs)
}

fn new_tag(tag_id: &str) -> serde_json::Value {
    json!({"tag_id": tag_id, "art_no": "A-1"})
}

#[tokio::test]
async fn validation_error_never_leases_a_connection() {
    let (app, stubs) = harness(&["reserve_stock"]);

    app.invoke("reserve_stock")
        .params(json!({"qty": 0, "colour": "red"}))
        .send()
        .await
        .assert_kind(ErrorKind::ValidationError)
        .assert_attempts(0)
        .assert_json_path("error.details.len()", 3)
        .assert_json_path_fn("error.details", |details| {
            details
                .as_array()
                .unwrap()
                .iter()
                .any(|e| e["field"] == "qty" && e["code"] == "range")
        });

    assert_eq!(app.pool_stats(General).acquired, 0);
    assert_eq!(stubs.general_backend.connects(), 0);
    assert_eq!(stubs.general.total_calls(), 0);
}

#[tokio::test]
async fn unknown_operation_is_a_validation_error() {
    let (app, stubs) = harness(&["reserve_stock"]);

    app.invoke("drop_everything")
        .send()
        .await
        .assert_kind(ErrorKind::ValidationError)
        .assert_json_path("error.details[0].field", "operation")
        .assert_json_path("error.details[0].code", "unknown_operation");

    assert_eq!(app.pool_stats(General).acquired, 0);
    assert_eq!(stubs.general.total_calls(), 0);
}

#[tokio::test]
async fn reserve_stock_misses_then_hits() {
    let (app, stubs) = harness(&["reserve_stock"]);
    stubs.general.respond("reserve_stock", json!({"reserved": true}));
    let params = json!({"sku": "X1", "qty": 5});

    app.invoke("reserve_stock")
        .params(&params)
        .send()
        .await
        .assert_success()
        .assert_cache_hit(false)
        .assert_attempts(1)
        .assert_source(General)
        .assert_json_path("data.reserved", true);
    assert_eq!(app.pool_stats(General).acquired, 1);
    assert_eq!(stubs.general.calls("reserve_stock"), 1);

    app.invoke("reserve_stock")
        .params(&params)
        .send()
        .await
        .assert_success()
        .assert_cache_hit(true)
        .assert_attempts(0)
        .assert_source(General)
        .assert_json_path("data.reserved", true);
    assert_eq!(app.pool_stats(General).acquired, 1);
    assert_eq!(stubs.general.calls("reserve_stock"), 1);
}

#[tokio::test]
async fn equivalent_params_share_a_cache_entry() {
    let (app, stubs) = harness(&["reserve_stock"]);

    app.invoke("reserve_stock")
        .params(json!({"sku": "X1", "qty": 5}))
        .send()
        .await
        .assert_cache_hit(false);
    app.invoke("reserve_stock")
        .params(json!({"qty": 5, "sku": "  X1 "}))
        .send()
        .await
        .assert_cache_hit(true);
    app.invoke("reserve_stock")
        .params(json!({"sku": "X1", "qty": 6}))
        .send()
        .await
        .assert_cache_hit(false);

    assert_eq!(stubs.general.calls("reserve_stock"), 2);
    assert_eq!(stubs.general.last_params("reserve_stock"), Some(json!({"sku": "X1", "qty": 6})));
}

#[tokio::test]
async fn successful_write_invalidates_dependent_reads() {
    let (app, stubs) = harness(&["list_tags", "create_tag"]);

    app.invoke("list_tags").send().await.assert_cache_hit(false);
    app.invoke("list_tags").send().await.assert_cache_hit(true);

    app.invoke("create_tag").params(new_tag("E200001")).send().await.assert_success();

    app.invoke("list_tags").send().await.assert_cache_hit(false);
    assert_eq!(stubs.general.calls("list_tags"), 2);
    assert_eq!(
        stubs.general.last_params("create_tag"),
        Some(json!({"tag_id": "E200001", "art_no": "A-1", "status": 0}))
    );
}

#[tokio::test]
async fn failed_write_leaves_cache_intact() {
    let (app, stubs) = harness(&["list_tags", "create_tag"]);

    app.invoke("list_tags").send().await.assert_cache_hit(false);
    stubs
        .general
        .fail_next("create_tag", GatewayError::rejected(General, "conflict", "Tag already exists"));
    app.invoke("create_tag")
        .params(new_tag("E200001"))
        .send()
        .await
        .assert_kind(ErrorKind::BackendRejected)
        .assert_json_path("error.details.code", "conflict");

    app.invoke("list_tags").send().await.assert_cache_hit(true);
    assert_eq!(stubs.general.calls("list_tags"), 1);
}

#[tokio::test]
async fn idempotent_operation_retries_transient_failure() {
    let (app, stubs) = harness(&["get_article"]);
    let article = json!({"art_no": "A-1", "art_supplier": "OKB"});
    stubs.general.respond("get_article", article.clone());

    let clean = app
        .invoke("get_article")
        .params(json!({"art_no": "A-1"}))
        .send()
        .await
        .assert_success()
        .assert_attempts(1);

    stubs
        .general
        .fail_next("get_article", GatewayError::unreachable(General, "connection reset"));
    let retried = app
        .invoke("get_article")
        .params(json!({"art_no": "A-2"}))
        .send()
        .await
        .assert_success()
        .assert_attempts(2);

    assert_eq!(clean.envelope.data, retried.envelope.data);
    assert_eq!(retried.envelope.data, Some(article));
    assert_eq!(stubs.general.calls("get_article"), 3);

    let stats = app.pool_stats(General);
    assert_eq!(stats.evicted, 1);
    app.assert_leases_returned(General);
}

#[tokio::test]
async fn non_idempotent_operation_runs_once() {
    let (app, stubs) = harness(&["create_tag"]);
    stubs
        .general
        .fail_next("create_tag", GatewayError::unreachable(General, "connection reset"));

    app.invoke("create_tag")
        .params(new_tag("E200001"))
        .send()
        .await
        .assert_kind(ErrorKind::BackendUnreachable)
        .assert_attempts(1)
        .assert_json_path("meta.steps[0].status", "failed")
        .assert_json_path("meta.steps[0].errorKind", "BackendUnreachable");

    assert_eq!(stubs.general.calls("create_tag"), 1);
    app.assert_leases_returned(General);
}

#[tokio::test]
async fn rejection_is_not_retried() {
    let (app, stubs) = harness(&["get_article"]);
    stubs
        .general
        .fail_next("get_article", GatewayError::rejected(General, "not_found", "Article not found"));

    app.invoke("get_article")
        .params(json!({"art_no": "A-9"}))
        .send()
        .await
        .assert_kind(ErrorKind::BackendRejected)
        .assert_attempts(1)
        .assert_json_path("error.details.code", "not_found");

    assert_eq!(stubs.general.calls("get_article"), 1);
    assert_eq!(app.pool_stats(General).evicted, 0);
}

#[tokio::test]
async fn internal_fault_from_adapter_is_not_retried() {
    let (app, stubs) = harness(&["get_article"]);
    stubs.general.fail_next("get_article", GatewayError::internal("row decoder broke"));

    app.invoke("get_article")
        .params(json!({"art_no": "A-1"}))
        .send()
        .await
        .assert_kind(ErrorKind::InternalFault)
        .assert_attempts(1);

    assert_eq!(stubs.general.calls("get_article"), 1);
    app.assert_leases_returned(General);
}

#[tokio::test]
async fn connect_failures_are_retried_then_reported() {
    let (app, stubs) = harness(&["get_article"]);
    stubs.general_backend.refuse_connections(true);

    app.invoke("get_article")
        .params(json!({"art_no": "A-1"}))
        .send()
        .await
        .assert_kind(ErrorKind::BackendUnreachable)
        .assert_attempts(3);

    assert_eq!(stubs.general_backend.connects(), 3);
    assert_eq!(stubs.general.total_calls(), 0);
    let stats = app.pool_stats(General);
    assert_eq!((stats.acquired, stats.released, stats.in_use), (0, 0, 0));

    stubs.general_backend.refuse_connections(false);
    app.invoke("get_article")
        .params(json!({"art_no": "A-1"}))
        .send()
        .await
        .assert_success();
}

#[tokio::test]
async fn later_step_failure_is_partial_and_releases_both_leases() {
    let (app, stubs) = harness(&["reorder_article", "list_orders"]);

    app.invoke("list_orders").send().await.assert_cache_hit(false);
    stubs.secondary.fail_next(
        "reorder_article",
        GatewayError::rejected(Secondary, "conflict", "An open order already exists"),
    );

    app.invoke("reorder_article")
        .params(json!({"art_no": "A-1"}))
        .send()
        .await
        .assert_kind(ErrorKind::PartialMultiBackendFailure)
        .assert_attempts(1)
        .assert_json_path("meta.steps.len()", 2)
        .assert_json_path("meta.steps[0].backend", "general")
        .assert_json_path("meta.steps[0].status", "succeeded")
        .assert_json_path("meta.steps[1].backend", "secondary")
        .assert_json_path("meta.steps[1].errorKind", "BackendRejected")
        .assert_json_path("error.details.failedBackend", "secondary")
        .assert_json_path("error.details.completed[0].backend", "general")
        .assert_json_path("error.details.cause.kind", "BackendRejected");

    app.assert_leases_returned(General).assert_leases_returned(Secondary);
    assert_eq!(stubs.general.calls("reorder_article"), 1);
    assert_eq!(stubs.secondary.calls("reorder_article"), 1);

    // The general step may have committed: dependent reads are invalidated.
    app.invoke("list_orders").send().await.assert_cache_hit(false);
}

#[tokio::test]
async fn first_step_failure_is_not_partial() {
    let (app, stubs) = harness(&["reorder_article"]);
    stubs
        .general
        .fail_next("reorder_article", GatewayError::rejected(General, "not_found", "Article not found"));

    app.invoke("reorder_article")
        .params(json!({"art_no": "A-1"}))
        .send()
        .await
        .assert_kind(ErrorKind::BackendRejected)
        .assert_json_path("meta.steps.len()", 1)
        .assert_json_path("meta.steps[0].backend", "general");

    assert_eq!(stubs.secondary.total_calls(), 0);
    app.assert_leases_returned(General).assert_leases_returned(Secondary);
}

#[tokio::test]
async fn steps_run_in_order_with_handoff() {
    let (app, stubs) = harness(&["sync_articles"]);
    let items = json!({"items": [{"art_no": "A-1", "description": "Bolt"}]});
    stubs
        .erp
        .respond_with_handoff("sync_articles", json!({"fetched": 1}), items.clone());
    stubs
        .general
        .respond("sync_articles", json!({"fetched": 1, "created": 1, "updated": 0}));

    app.invoke("sync_articles")
        .send()
        .await
        .assert_success()
        .assert_source(General)
        .assert_json_path("data", json!({"fetched": 1, "created": 1, "updated": 0}))
        .assert_json_path("meta.steps[0].backend", "erp")
        .assert_json_path("meta.steps[1].backend", "general");

    assert_eq!(stubs.erp.last_handoff("sync_articles"), None);
    assert_eq!(stubs.general.last_handoff("sync_articles"), Some(items));
}

#[tokio::test]
async fn retry_resumes_at_the_failed_step() {
    let (app, stubs) = harness(&["sync_articles"]);
    let items = json!({"items": []});
    stubs
        .erp
        .respond_with_handoff("sync_articles", json!({"fetched": 0}), items.clone());
    stubs
        .general
        .fail_next("sync_articles", GatewayError::unreachable(General, "connection reset"));

    app.invoke("sync_articles")
        .send()
        .await
        .assert_success()
        .assert_attempts(2)
        .assert_json_path("meta.steps.len()", 2);

    assert_eq!(stubs.erp.calls("sync_articles"), 1);
    assert_eq!(stubs.general.calls("sync_articles"), 2);
    assert_eq!(stubs.general.last_handoff("sync_articles"), Some(items));
    assert_eq!(app.pool_stats(Erp).acquired, 1);
    assert_eq!(app.pool_stats(General).acquired, 2);
    app.assert_leases_returned(Erp).assert_leases_returned(General);
}

#[tokio::test]
async fn execution_timeout_evicts_the_connection() {
    let (builder, stubs) = stubbed(&["create_tag"]);
    let app = TestGateway::from_builder(builder.with_execution_timeout(Duration::from_millis(50)));
    stubs.general.delay_next("create_tag", Duration::from_millis(500));

    app.invoke("create_tag")
        .params(new_tag("E200001"))
        .send()
        .await
        .assert_kind(ErrorKind::BackendUnreachable)
        .assert_json_path_fn("error.message", |m| m.as_str().unwrap().contains("timed out"));

    let stats = app.pool_stats(General);
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.idle, 0);
    app.assert_leases_returned(General);
}

#[tokio::test]
async fn single_connection_pool_waits_for_release() {
    let (builder, stubs) = stubbed(&["create_tag"]);
    let app = TestGateway::from_builder(builder.with_pool_config(
        General,
        PoolConfig::default().max_size(1).acquire_timeout(Duration::from_secs(2)),
    ));
    stubs.general.delay_next("create_tag", Duration::from_millis(100));

    let (first, second) = tokio::join!(
        app.invoke("create_tag").params(new_tag("T1")).send(),
        app.invoke("create_tag").params(new_tag("T2")).send(),
    );
    first.assert_success();
    second.assert_success();

    let stats = app.pool_stats(General);
    assert_eq!(stats.acquired, 2);
    assert_eq!(stats.created, 1);
    app.assert_leases_returned(General);
}

#[tokio::test]
async fn single_connection_pool_times_out() {
    let (builder, stubs) = stubbed(&["create_tag"]);
    let app = TestGateway::from_builder(builder.with_pool_config(
        General,
        PoolConfig::default().max_size(1).acquire_timeout(Duration::from_millis(50)),
    ));
    stubs.general.delay_next("create_tag", Duration::from_millis(300));

    let (first, second) = tokio::join!(
        app.invoke("create_tag").params(new_tag("T1")).send(),
        app.invoke("create_tag").params(new_tag("T2")).send(),
    );
    first.assert_success();
    second
        .assert_kind(ErrorKind::PoolTimeout)
        .assert_json_path("meta.steps[0].errorKind", "PoolTimeout");

    assert_eq!(stubs.general.calls("create_tag"), 1);
    app.assert_leases_returned(General);
}

#[tokio::test]
async fn fail_fast_pool_reports_exhaustion() {
    let (builder, stubs) = stubbed(&["create_tag"]);
    let app = TestGateway::from_builder(
        builder.with_pool_config(General, PoolConfig::default().max_size(1).fail_fast()),
    );
    stubs.general.delay_next("create_tag", Duration::from_millis(100));

    let (first, second) = tokio::join!(
        app.invoke("create_tag").params(new_tag("T1")).send(),
        app.invoke("create_tag").params(new_tag("T2")).send(),
    );
    first.assert_success();
    second.assert_kind(ErrorKind::PoolExhausted);
}

#[tokio::test]
async fn dropped_invocation_returns_its_lease() {
    let (app, stubs) = harness(&["create_tag"]);
    stubs.general.delay_next("create_tag", Duration::from_secs(5));

    let invocation = app.invoke("create_tag").params(new_tag("T1")).send();
    assert!(tokio::time::timeout(Duration::from_millis(50), invocation).await.is_err());

    app.assert_leases_returned(General);
    assert_eq!(app.pool_stats(General).acquired, 1);
}

#[tokio::test]
async fn build_rejects_unserved_backends() {
    let descriptors = catalog::descriptors()
        .into_iter()
        .filter(|d| d.name == "list_orders" || d.name == "get_article")
        .collect();
    let result = Gateway::builder(GatewayConfig::empty())
        .with_registry(Registry::new(descriptors).unwrap())
        .with_connector(General, FakeConnector::new().shared())
        .with_adapter(Arc::new(StubAdapter::new(General, &["list_tags"])))
        .build();

    let Err(ConfigError::Registry(problems)) = result else {
        panic!("expected a registry error");
    };
    assert!(problems.iter().any(|p| p.contains("'secondary', which has no connector")));
    assert!(problems.iter().any(|p| p.contains("'secondary', which has no adapter")));
    assert!(problems
        .iter()
        .any(|p| p.contains("does not support operation 'get_article'")));
}

#[tokio::test]
async fn health_reflects_backend_pings() {
    let (app, stubs) = harness(&["get_article", "list_orders", "lookup_erp_item"]);

    let health = app.gateway().health().await;
    assert!(health.is_up());
    assert_eq!(health.checks.len(), 3);

    stubs.backend(Secondary).fail_ping(true);
    assert!(!app.gateway().readiness().await.is_up());
    assert!(app.gateway().liveness().is_up());
    assert_eq!(app.pool_stats(Secondary).evicted, 1);

    stubs.backend(Secondary).fail_ping(false);
    assert!(app.gateway().readiness().await.is_up());
    assert!(stubs.backend(Erp).pings() >= 2);
}

#[tokio::test]
async fn metrics_expose_invocations_pools_and_backend_availability() {
    let (app, stubs) = harness(&["get_article", "list_orders", "lookup_erp_item"]);
    stubs.general.respond("get_article", json!({"art_no": "A-1"}));
    for _ in 0..2 {
        app.invoke("get_article")
            .params(json!({"art_no": "A-1"}))
            .send()
            .await
            .assert_success();
    }
    app.invoke("drop_everything")
        .send()
        .await
        .assert_kind(ErrorKind::ValidationError);
    stubs.backend(Secondary).fail_ping(true);

    let text = app.gateway().metrics().await.unwrap();
    let lines: Vec<&str> = text.lines().collect();
    for expected in [
        "kanban_up 1",
        r#"kanban_invocations_total{operation="get_article",outcome="success"} 2"#,
        r#"kanban_invocations_total{operation="unknown",outcome="ValidationError"} 1"#,
        r#"kanban_invocation_duration_seconds_count{operation="get_article"} 2"#,
        r#"kanban_cache_hits_total{operation="get_article"} 1"#,
        r#"kanban_backend_available{backend="erp"} 1"#,
        r#"kanban_backend_available{backend="general"} 1"#,
        r#"kanban_backend_available{backend="secondary"} 0"#,
        r#"kanban_pool_connections{backend="general",state="in_use"} 0"#,
        r#"kanban_pool_connections{backend="general",state="idle"} 1"#,
    ] {
        assert!(lines.contains(&expected), "missing `{expected}` in:\n{text}");
    }
    assert!(text.contains("# TYPE kanban_invocation_duration_seconds histogram"));
    assert!(!text.contains("drop_everything"));

    stubs.backend(Secondary).fail_ping(false);
    let text = app.gateway().metrics().await.unwrap();
    assert!(text.contains(r#"kanban_backend_available{backend="secondary"} 1"#));
    assert!(text.contains("kanban_metrics_generation_duration_seconds"));
}

#[tokio::test]
async fn shutdown_closes_pools() {
    let (app, stubs) = harness(&["create_tag"]);
    app.invoke("create_tag").params(new_tag("T1")).send().await.assert_success();

    app.gateway().shutdown().await;
    assert_eq!(stubs.general_backend.closed(), 1);

    app.invoke("create_tag")
        .params(new_tag("T2"))
        .send()
        .await
        .assert_kind(ErrorKind::BackendUnreachable);
}
