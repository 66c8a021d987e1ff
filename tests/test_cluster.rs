mod common;

use axum::http::StatusCode;
use common::{build_test_app, dead_url, json_request, test_config, MockOllama};
use ollama_router_rs::config::PolicyConfig;
use ollama_router_rs::core::{Selection, Worker};
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;

#[tokio::test]
async fn test_requests_only_reach_healthy_instances() {
    let a = MockOllama::spawn(&["llama3"]);
    let b = MockOllama::spawn(&["llama3"]);
    let down = dead_url();
    let (app, state) = build_test_app(test_config(
        &[a.url(), down.clone(), b.url()],
        PolicyConfig::LeastConnections,
    ))
    .await;

    let cluster = &state.context.cluster;
    assert_eq!(cluster.registry().healthy_count(), 2);
    let down_worker = cluster.registry().get_by_url(&down).unwrap();
    assert!(!down_worker.is_healthy());

    // Park every call on the backends so all 5 are in flight at once
    a.hold_requests();
    b.hold_requests();
    let handles: Vec<_> = (0..5)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                app.oneshot(json_request(
                    "/api/generate",
                    &json!({"model": "llama3", "prompt": format!("request {}", i)}),
                ))
                .await
                .unwrap()
            })
        })
        .collect();

    let all_parked = tokio::time::timeout(Duration::from_secs(5), async {
        while a.held() + b.held() < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(all_parked.is_ok());

    let in_flight: usize = cluster.registry().get_all().iter().map(|w| w.load()).sum();
    assert_eq!(in_flight, 5);
    assert_eq!(down_worker.load(), 0);
    for worker in cluster.registry().get_all() {
        assert!(worker.load() <= 5);
    }
    // Least-connections keeps the two healthy instances within one of each other
    assert!(a.held().abs_diff(b.held()) <= 1);

    a.release_requests();
    b.release_requests();
    for handle in handles {
        assert_eq!(handle.await.unwrap().status(), StatusCode::OK);
    }

    assert_eq!(a.generate_calls() + b.generate_calls(), 5);
    assert_eq!(down_worker.processed_requests(), 0);
    assert_eq!(down_worker.load(), 0);
    for worker in cluster.registry().get_all() {
        assert_eq!(worker.load(), 0);
    }
}

#[tokio::test]
async fn test_round_robin_spreads_over_healthy_instances() {
    let a = MockOllama::spawn(&["llama3"]);
    let b = MockOllama::spawn(&["llama3"]);
    let (app, _state) =
        build_test_app(test_config(&[a.url(), b.url()], PolicyConfig::RoundRobin)).await;

    for _ in 0..4 {
        let response = app
            .clone()
            .oneshot(json_request(
                "/api/generate",
                &json!({"model": "llama3", "prompt": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(a.generate_calls(), 2);
    assert_eq!(b.generate_calls(), 2);
}

#[tokio::test]
async fn test_all_unhealthy_returns_503() {
    let a = MockOllama::spawn(&["llama3"]);
    a.set_healthy(false);
    let (app, state) =
        build_test_app(test_config(&[a.url(), dead_url()], PolicyConfig::Random)).await;

    assert!(matches!(
        state.context.cluster.get_instance(),
        Selection::Unavailable
    ));

    let response = app
        .oneshot(json_request(
            "/api/generate",
            &json!({"model": "llama3", "prompt": "hi"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = common::body_json(response).await;
    assert_eq!(body["error"], "No healthy Ollama instances available");

    assert_eq!(a.generate_calls(), 0);
    for worker in state.context.cluster.registry().get_all() {
        assert_eq!(worker.load(), 0);
        assert_eq!(worker.processed_requests(), 0);
    }
}

#[tokio::test]
async fn test_health_follows_latest_probe() {
    let backend = MockOllama::spawn(&["llama3", "mistral"]);
    let (_app, state) =
        build_test_app(test_config(&[backend.url()], PolicyConfig::RoundRobin)).await;
    let cluster = &state.context.cluster;
    let worker = cluster.registry().get_all()[0].clone();

    assert!(worker.is_healthy());
    assert_eq!(worker.models(), vec!["llama3".to_string(), "mistral".to_string()]);
    let first_check = worker.last_health_check().unwrap();

    backend.set_healthy(false);
    assert_eq!(cluster.check_health().await, 0);
    assert!(!worker.is_healthy());
    // Failed probes keep the last known models and timestamp
    assert_eq!(worker.models().len(), 2);
    assert_eq!(worker.last_health_check(), Some(first_check));

    backend.set_healthy(true);
    assert_eq!(cluster.check_health().await, 1);
    assert!(worker.is_healthy());
    assert!(worker.last_health_check().unwrap() >= first_check);
}

#[tokio::test]
async fn test_background_checker_marks_recovery() {
    let backend = MockOllama::spawn(&["llama3"]);
    backend.set_healthy(false);
    let mut config = test_config(&[backend.url()], PolicyConfig::RoundRobin);
    config.health_check.check_interval_secs = 1;
    let (_app, state) = build_test_app(config).await;
    let cluster = &state.context.cluster;
    let worker = cluster.registry().get_all()[0].clone();
    assert!(!worker.is_healthy());

    let checker = cluster.start_health_checker();
    backend.set_healthy(true);

    let recovered = tokio::time::timeout(Duration::from_secs(5), async {
        while !worker.is_healthy() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(recovered.is_ok());

    checker.shutdown().await;
}
