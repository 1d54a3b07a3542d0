// Proxy reactor pipeline, error classification, deadline and lifecycle.
mod common;

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use axon_reactor::{
        GatewayRequest,
        config::{AnalyticsConfig, AnalyticsTracingConfig},
        core::{
            LifecycleState, ReactorError, RequestContext,
            invoker::{InvokerSlot, LegacyInvoker, LegacyResponse},
            reactor::{REQUEST_TIMEOUT_KEY, proxy::NO_ENTRYPOINT_FAILURE_MESSAGE},
        },
    };
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    use crate::common::{Behavior, EndpointScript, Setup, config_with_timeout, json_body};

    const REQUEST_STAGES: [&str; 8] = [
        "before-handle:request",
        "organization:request",
        "before-security:request",
        "security-plan:request",
        "before-api-execution:request",
        "entrypoint:request",
        "plan:request",
        "api:request",
    ];

    fn expected(parts: &[&[&str]]) -> Vec<String> {
        parts
            .iter()
            .flat_map(|part| part.iter().map(|entry| entry.to_string()))
            .collect()
    }

    struct StaticLegacyInvoker;

    #[async_trait]
    impl LegacyInvoker for StaticLegacyInvoker {
        fn id(&self) -> &str {
            "legacy-http"
        }

        async fn invoke(&self, _request: &GatewayRequest) -> eyre::Result<LegacyResponse> {
            Ok(LegacyResponse {
                status: StatusCode::CREATED,
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"legacy"),
            })
        }
    }

    fn use_legacy_invoker(ctx: &mut RequestContext) {
        ctx.internal.invoker = Some(InvokerSlot::Legacy(Arc::new(StaticLegacyInvoker)));
    }

    #[tokio::test]
    async fn test_full_pipeline_order() {
        let harness = Setup::default().build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        let ctx = harness.handle("/echo/items").await;

        assert_eq!(
            harness.pipeline_entries(),
            expected(&[
                &REQUEST_STAGES,
                &[
                    "endpoint:backend",
                    "plan:response",
                    "api:response",
                    "after-api-execution:response",
                    "organization:response",
                    "entrypoint:response",
                    "after-handle:response",
                ],
            ])
        );
        let response = harness.last_response();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(b"backend"));
        assert_eq!(response.headers["x-entrypoint"], "http-proxy");
        assert!(ctx.response.is_ended());
        assert_eq!(ctx.metrics.path_info, "/items");
        assert!(ctx.metrics.endpoint_response_time.duration().is_some());
        assert_eq!(harness.reactor.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_no_entrypoint_returns_not_found() {
        let harness = Setup {
            connector_accepts: false,
            ..Default::default()
        }
        .build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        harness.handle("/echo").await;

        // Plan and API flows and the backend are skipped; the response
        // entrypoint step is skipped because a failure is recorded.
        assert_eq!(
            harness.pipeline_entries(),
            expected(&[
                &REQUEST_STAGES[..5],
                &[
                    "on-error:response",
                    "organization:response",
                    "after-handle:response",
                ],
            ])
        );
        let response = harness.last_response();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(json_body(&response)["message"], NO_ENTRYPOINT_FAILURE_MESSAGE);
        assert_eq!(harness.endpoints.calls("backend"), 0);
    }

    #[tokio::test]
    async fn test_benign_interruption_runs_after_api_execution() {
        let harness = Setup::default()
            .behave("api:request", Behavior::Interrupt)
            .build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        harness.handle("/echo").await;

        assert_eq!(
            harness.pipeline_entries(),
            expected(&[
                &REQUEST_STAGES,
                &[
                    "after-api-execution:response",
                    "organization:response",
                    "entrypoint:response",
                    "after-handle:response",
                ],
            ])
        );
        assert_eq!(harness.last_response().status, StatusCode::OK);
        assert_eq!(harness.endpoints.calls("backend"), 0);
    }

    #[tokio::test]
    async fn test_benign_interruption_in_response_flow_runs_after_api_execution() {
        let harness = Setup::default()
            .behave("api:response", Behavior::Interrupt)
            .build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        harness.handle("/echo").await;

        assert_eq!(
            harness.pipeline_entries(),
            expected(&[
                &REQUEST_STAGES,
                &[
                    "endpoint:backend",
                    "plan:response",
                    "api:response",
                    "after-api-execution:response",
                    "organization:response",
                    "entrypoint:response",
                    "after-handle:response",
                ],
            ])
        );
        let response = harness.last_response();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(b"backend"));
    }

    #[tokio::test]
    async fn test_interruption_in_after_api_execution_reruns_it_and_resumes() {
        let harness = Setup::default()
            .behave("after-api-execution:response", Behavior::Interrupt)
            .build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        harness.handle("/echo").await;

        // The classifier runs the after-api-execution processors again; their
        // second interruption does not escape it.
        assert_eq!(
            harness.pipeline_entries(),
            expected(&[
                &REQUEST_STAGES,
                &[
                    "endpoint:backend",
                    "plan:response",
                    "api:response",
                    "after-api-execution:response",
                    "after-api-execution:response",
                    "organization:response",
                    "entrypoint:response",
                    "after-handle:response",
                ],
            ])
        );
        assert_eq!(harness.last_response().status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_failure_in_response_flow_runs_on_error() {
        let harness = Setup::default()
            .behave("plan:response", Behavior::Fail(StatusCode::BAD_GATEWAY))
            .build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        harness.handle("/echo").await;

        assert_eq!(
            harness.pipeline_entries(),
            expected(&[
                &REQUEST_STAGES,
                &[
                    "endpoint:backend",
                    "plan:response",
                    "on-error:response",
                    "organization:response",
                    "after-handle:response",
                ],
            ])
        );
        let response = harness.last_response();
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(&response)["key"], "POLICY_FAILURE");
    }

    #[tokio::test]
    async fn test_failure_runs_on_error_and_renders_it() {
        let harness = Setup::default()
            .behave(
                "security-plan:request",
                Behavior::Fail(StatusCode::UNAUTHORIZED),
            )
            .build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        let ctx = harness.handle("/echo").await;

        assert_eq!(
            harness.pipeline_entries(),
            expected(&[
                &REQUEST_STAGES[..4],
                &[
                    "on-error:response",
                    "organization:response",
                    "after-handle:response",
                ],
            ])
        );
        let response = harness.last_response();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        let body = json_body(&response);
        assert_eq!(body["key"], "POLICY_FAILURE");
        assert_eq!(body["message"], "Rejected by policy");
        assert_eq!(ctx.metrics.error_key.as_deref(), Some("POLICY_FAILURE"));
    }

    #[tokio::test]
    async fn test_unexpected_error_becomes_server_error() {
        let harness = Setup::default()
            .behave("plan:request", Behavior::Error)
            .build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        harness.handle("/echo").await;

        assert_eq!(
            harness.pipeline_entries(),
            expected(&[
                &REQUEST_STAGES[..7],
                &[
                    "on-error:response",
                    "organization:response",
                    "after-handle:response",
                ],
            ])
        );
        assert_eq!(
            harness.last_response().status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_after_response_still_sends_and_counts_out() {
        let harness = Setup::default()
            .behave("after-handle:response", Behavior::Error)
            .build();
        harness.reactor.start().await.unwrap();

        harness.handle("/echo").await;

        assert_eq!(
            harness.last_response().status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(harness.reactor.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_returns_gateway_timeout() {
        let harness = Setup {
            config: config_with_timeout(50, 10),
            endpoints: vec![EndpointScript::slow("backend", Duration::from_millis(200))],
            ..Default::default()
        }
        .build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        let ctx = harness.handle("/echo").await;

        // The organization response flow still runs, bounded by the grace delay.
        assert_eq!(
            harness.pipeline_entries(),
            expected(&[
                &REQUEST_STAGES,
                &[
                    "endpoint:backend",
                    "on-error:response",
                    "organization:response",
                    "after-handle:response",
                ],
            ])
        );
        let response = harness.last_response();
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json_body(&response)["key"], REQUEST_TIMEOUT_KEY);
        assert!(ctx.metrics.endpoint_response_time.duration().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_organization_response_flow_times_out() {
        let harness = Setup {
            config: config_with_timeout(50, 10),
            ..Default::default()
        }
        .behave(
            "organization:response",
            Behavior::Sleep(Duration::from_secs(5)),
        )
        .build();
        harness.reactor.start().await.unwrap();

        let started = tokio::time::Instant::now();
        harness.handle("/echo").await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(
            harness.last_response().status,
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_timeout_waits_for_backend() {
        let harness = Setup {
            config: config_with_timeout(0, 10),
            endpoints: vec![EndpointScript::slow("backend", Duration::from_secs(30))],
            ..Default::default()
        }
        .build();
        harness.reactor.start().await.unwrap();

        harness.handle("/echo").await;

        assert_eq!(harness.last_response().status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invoker_skip_bypasses_backend() {
        let harness = Setup::default()
            .behave(
                "api:request",
                Behavior::Apply(|ctx| ctx.internal.invoker_skip = true),
            )
            .build();
        harness.reactor.start().await.unwrap();

        harness.handle("/echo").await;

        assert_eq!(harness.endpoints.calls("backend"), 0);
        assert!(
            harness
                .pipeline_entries()
                .contains(&"api:response".to_string())
        );
        assert_eq!(harness.last_response().status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_legacy_invoker_is_adapted() {
        let harness = Setup::default()
            .behave("api:request", Behavior::Apply(use_legacy_invoker))
            .build();
        harness.reactor.start().await.unwrap();

        harness.handle("/echo").await;

        let response = harness.last_response();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.body, Bytes::from_static(b"legacy"));
        assert_eq!(harness.endpoints.calls("backend"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_releases_pending_counter() {
        let harness = Setup {
            config: config_with_timeout(0, 10),
            endpoints: vec![EndpointScript::slow("backend", Duration::from_secs(60))],
            ..Default::default()
        }
        .build();
        harness.reactor.start().await.unwrap();

        let reactor = harness.reactor.clone();
        let ctx = harness.request("/echo");
        let task = tokio::spawn(async move { reactor.handle(ctx).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.reactor.pending_requests(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(harness.reactor.pending_requests(), 0);
        assert!(harness.sent().is_empty());
    }

    #[tokio::test]
    async fn test_start_order() {
        let harness = Setup {
            services: vec!["health-check", "dynamic-properties"],
            ..Default::default()
        }
        .build();
        assert_eq!(harness.reactor.state(), LifecycleState::Initialized);

        harness.reactor.start().await.unwrap();

        assert_eq!(harness.reactor.state(), LifecycleState::Started);
        assert_eq!(
            harness.entries(),
            vec![
                "resource-manager:start",
                "policy-manager:start",
                "security-factory:create",
                "tracer:start",
                "endpoint-manager:start",
                "service:health-check:start",
                "service:dynamic-properties:start",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_order() {
        let harness = Setup {
            services: vec!["health-check"],
            ..Default::default()
        }
        .build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        harness.reactor.stop().await.unwrap();
        assert_eq!(harness.reactor.state(), LifecycleState::Stopping);
        harness.reactor.wait_for_state(LifecycleState::Stopped).await;

        assert_eq!(
            harness.entries(),
            vec![
                "service:health-check:stop",
                "entrypoint:pre-stop",
                "endpoint-manager:pre-stop",
                "policy-manager:pre-stop",
                "resource-manager:pre-stop",
                "entrypoint:stop",
                "endpoint-manager:stop",
                "policy-manager:stop",
                "resource-manager:stop",
                "tracer:stop",
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_before_node_started_is_immediate() {
        let harness = Setup {
            node_started: false,
            ..Default::default()
        }
        .build();
        harness.reactor.start().await.unwrap();

        harness.reactor.stop().await.unwrap();

        assert_eq!(harness.reactor.state(), LifecycleState::Stopped);
        assert!(harness.entries().contains(&"tracer:stop".to_string()));
        assert_eq!(
            harness.observed_stop_states(),
            vec![LifecycleState::Stopping, LifecycleState::Stopping]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_start_releases_components() {
        let harness = Setup::default().build();

        harness.reactor.stop().await.unwrap();
        assert_eq!(harness.reactor.state(), LifecycleState::Stopping);
        harness.reactor.wait_for_state(LifecycleState::Stopped).await;

        let entries = harness.entries();
        for released in [
            "entrypoint:stop",
            "endpoint-manager:stop",
            "policy-manager:stop",
            "resource-manager:stop",
            "tracer:stop",
        ] {
            assert!(entries.contains(&released.to_string()), "{released} missing");
        }
    }

    #[tokio::test]
    async fn test_stop_after_failed_start_releases_started_components() {
        let harness = Setup {
            node_started: false,
            services: vec!["health-check", "dynamic-properties"],
            failing_services: vec!["dynamic-properties"],
            ..Default::default()
        }
        .build();

        let error = harness.reactor.start().await.unwrap_err();
        assert!(matches!(error, ReactorError::Component { .. }));
        assert_eq!(harness.reactor.state(), LifecycleState::Starting);
        harness.clear();

        harness.reactor.stop().await.unwrap();

        assert_eq!(harness.reactor.state(), LifecycleState::Stopped);
        assert_eq!(
            harness.entries(),
            vec![
                "service:health-check:stop",
                "entrypoint:pre-stop",
                "endpoint-manager:pre-stop",
                "policy-manager:pre-stop",
                "resource-manager:pre-stop",
                "entrypoint:stop",
                "endpoint-manager:stop",
                "policy-manager:stop",
                "resource-manager:stop",
                "tracer:stop",
            ]
        );
    }

    #[tokio::test]
    async fn test_second_stop_is_rejected() {
        let harness = Setup {
            node_started: false,
            ..Default::default()
        }
        .build();
        harness.reactor.start().await.unwrap();
        harness.reactor.stop().await.unwrap();

        let error = harness.reactor.stop().await.unwrap_err();

        assert!(matches!(
            error,
            ReactorError::InvalidTransition {
                from: LifecycleState::Stopped,
                to: LifecycleState::Stopping,
            }
        ));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let harness = Setup::default().build();
        harness.reactor.start().await.unwrap();

        let error = harness.reactor.start().await.unwrap_err();

        assert!(matches!(
            error,
            ReactorError::InvalidTransition {
                from: LifecycleState::Started,
                to: LifecycleState::Starting,
            }
        ));
    }

    #[tokio::test]
    async fn test_trace_spans_end_exactly_once() {
        let mut setup = Setup::default().behave(
            "security-plan:request",
            Behavior::Fail(StatusCode::FORBIDDEN),
        );
        setup.config.tracing.enabled = true;
        setup.api.analytics = AnalyticsConfig {
            enabled: true,
            tracing: Some(AnalyticsTracingConfig {
                enabled: true,
                verbose: false,
            }),
            ..Default::default()
        };
        let harness = setup.build();
        harness.reactor.start().await.unwrap();
        harness.clear();

        harness.handle("/echo").await;
        harness.handle("/echo").await;

        let entries = harness.entries();
        let count = |suffix: &str| {
            entries
                .iter()
                .filter(|entry| entry.starts_with("span:") && entry.ends_with(suffix))
                .count()
        };
        assert!(entries.contains(&"span:request:start".to_string()));
        assert!(entries.contains(&"span:security-plan:error".to_string()));
        assert!(count(":start") > 0);
        assert_eq!(count(":start"), count(":end"));
    }
}
