//! End-to-end tests through the proxy listener.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use axum::http::StatusCode;
use serde_json::Value;
use traffic_gateway::config::schema::{
    BalanceStrategy, CircuitBreakerConfig, RateLimitPolicy, RateLimitScope, Target,
};
use traffic_gateway::resilience::CircuitState;

mod common;

#[tokio::test]
async fn test_proxies_to_instance() {
    let backend = common::start_programmable_backend(|path| async move { (200, format!("echo {}", path)) }).await;
    let config = common::test_config(vec![common::endpoint(
        "GET",
        "/users/:id",
        Target::Raw(format!("http://{}", backend)),
    )]);
    let gw = common::start_gateway(config).await;

    let res = common::client().get(gw.url("/v1/users/42?full=1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    // Version prefix is stripped before forwarding
    assert_eq!(res.text().await.unwrap(), "echo /users/42?full=1");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let backend = common::start_mock_backend("ok").await;
    let config = common::test_config(vec![common::endpoint(
        "GET",
        "/users",
        Target::Raw(format!("http://{}", backend)),
    )]);
    let gw = common::start_gateway(config).await;
    let client = common::client();

    let res = client.get(gw.url("/orders")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    // Method is part of the route
    let res = client.post(gw.url("/users")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_version_header_selects_endpoint() {
    let v1 = common::start_mock_backend("v1").await;
    let v2 = common::start_mock_backend("v2").await;
    let mut e2 = common::endpoint("GET", "/items", Target::Raw(format!("http://{}", v2)));
    e2.version = "v2".into();
    let config = common::test_config(vec![
        common::endpoint("GET", "/items", Target::Raw(format!("http://{}", v1))),
        e2,
    ]);
    let gw = common::start_gateway(config).await;
    let client = common::client();

    let body = client.get(gw.url("/items")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "v1");
    let body = client
        .get(gw.url("/items"))
        .header("x-api-version", "v2")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "v2");
    let body = client.get(gw.url("/v2/items")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "v2");
}

#[tokio::test]
async fn test_rate_limit_headers_and_429() {
    let backend = common::start_mock_backend("ok").await;
    let mut e = common::endpoint("GET", "/limited", Target::Raw(format!("http://{}", backend)));
    e.rate_limit = Some(RateLimitPolicy {
        window_ms: 60_000,
        max_requests: 2,
        scope: RateLimitScope::ApiKey,
    });
    let gw = common::start_gateway(common::test_config(vec![e])).await;
    let client = common::client();

    for remaining in ["1", "0"] {
        let res = client
            .get(gw.url("/limited"))
            .header("x-api-key", "alpha")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-ratelimit-limit"], "2");
        assert_eq!(res.headers()["x-ratelimit-remaining"], remaining);
    }

    let res = client
        .get(gw.url("/limited"))
        .header("x-api-key", "alpha")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["x-ratelimit-remaining"], "0");
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!(retry_after <= 60);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "rate_limited");

    // Another key is counted separately
    let res = client
        .get(gw.url("/limited"))
        .header("x-api-key", "beta")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_round_robin_across_instances() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let e = common::endpoint(
        "GET",
        "/rr",
        Target::Instances(vec![common::instance("a", a), common::instance("b", b)]),
    );
    let gw = common::start_gateway(common::test_config(vec![e])).await;
    let client = common::client();

    let mut bodies = Vec::new();
    for _ in 0..4 {
        bodies.push(client.get(gw.url("/rr")).send().await.unwrap().text().await.unwrap());
    }
    assert_eq!(bodies, vec!["a", "b", "a", "b"]);
}

#[tokio::test]
async fn test_upstream_failures_open_circuit() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let backend = common::start_programmable_backend(move |path| {
        let counter = counter.clone();
        async move {
            if path == "/health" {
                return (200, "ok".into());
            }
            counter.fetch_add(1, Ordering::SeqCst);
            (500, "boom".into())
        }
    })
    .await;

    let mut e = common::endpoint("GET", "/fragile", Target::Instances(vec![common::instance("f1", backend)]));
    e.circuit_breaker = Some(CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 1,
        timeout_ms: 60_000,
        monitoring_period_ms: 60_000,
    });
    let gw = common::start_gateway(common::test_config(vec![e])).await;
    let client = common::client();

    for _ in 0..3 {
        let res = client.get(gw.url("/fragile")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
    let state = gw.gateway.breaker().get_state("f1").await;
    assert_eq!(state.state, CircuitState::Open);

    let res = client.get(gw.url("/fragile")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not reach the backend");

    gw.gateway.breaker().reset_circuit_breaker("f1").await.unwrap();
    let res = client.get(gw.url("/fragile")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_health_check_eviction() {
    let b1 = common::start_mock_backend("b1").await;
    let b2_healthy = Arc::new(AtomicBool::new(true));
    let flag = b2_healthy.clone();
    let b2 = common::start_programmable_backend(move |_path| {
        let flag = flag.clone();
        async move {
            if flag.load(Ordering::SeqCst) {
                (200, "b2".into())
            } else {
                (503, "dead".into())
            }
        }
    })
    .await;

    let e = common::endpoint(
        "GET",
        "/svc",
        Target::Instances(vec![common::instance("b1", b1), common::instance("b2", b2)]),
    );
    let gw = common::start_gateway(common::test_config(vec![e])).await;
    let client = common::client();
    let monitor = gw.gateway.balancer().monitor().clone();

    b2_healthy.store(false, Ordering::SeqCst);
    let outcome = monitor.probe_now("b2").await.unwrap();
    assert!(outcome.error.is_some());

    for _ in 0..4 {
        let body = client.get(gw.url("/svc")).send().await.unwrap().text().await.unwrap();
        assert_eq!(body, "b1");
    }

    b2_healthy.store(true, Ordering::SeqCst);
    monitor.probe_now("b2").await.unwrap();
    let mut seen_b2 = false;
    for _ in 0..4 {
        let body = client.get(gw.url("/svc")).send().await.unwrap().text().await.unwrap();
        seen_b2 |= body == "b2";
    }
    assert!(seen_b2, "recovered instance should be routable again");

    let history = monitor.history().recent(Some("b2"), 10).await;
    assert!(history.len() >= 2);
}

#[tokio::test]
async fn test_upstream_timeout_is_504() {
    let backend = common::start_programmable_backend(|path| async move {
        if path != "/health" {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        (200, "late".into())
    })
    .await;
    let mut e = common::endpoint("GET", "/slow", Target::Raw(format!("http://{}", backend)));
    e.timeout_ms = Some(200);
    let gw = common::start_gateway(common::test_config(vec![e])).await;

    let res = common::client().get(gw.url("/slow")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_unreachable_instance_is_502() {
    // Reserve a port and close it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let mut config = common::test_config(vec![common::endpoint(
        "GET",
        "/gone",
        Target::Raw(format!("http://{}", dead)),
    )]);
    config.health_check.enabled = false;
    let gw = common::start_gateway(config).await;

    let res = common::client().get(gw.url("/gone")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_least_connections_strategy_routes() {
    let a = common::start_mock_backend("a").await;
    let mut e = common::endpoint("GET", "/lc", Target::Instances(vec![common::instance("a", a)]));
    e.strategy = Some(BalanceStrategy::LeastConnections);
    let gw = common::start_gateway(common::test_config(vec![e])).await;

    let res = common::client().get(gw.url("/lc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let instance = &gw.gateway.balancer().instances("GET v1 /lc")[0];
    assert_eq!(instance.connections(), 0);
}

#[tokio::test]
async fn test_reload_with_longer_endpoint_timeout() {
    let backend = common::start_programmable_backend(|path| async move {
        if path != "/health" {
            tokio::time::sleep(Duration::from_millis(600)).await;
        }
        (200, "done".into())
    })
    .await;
    let target = Target::Raw(format!("http://{}", backend));
    let mut config = common::test_config(vec![common::endpoint("GET", "/report", target.clone())]);
    config.timeouts.request_ms = 200;
    let gw = common::start_gateway(config).await;
    let client = common::client();

    let res = client.get(gw.url("/report")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);

    let mut slow = common::endpoint("GET", "/report", target);
    slow.timeout_ms = Some(3_000);
    gw.gateway.reload(&[slow]);

    let res = client.get(gw.url("/report")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "done");
}
