//! Instance selection, deadlines and retries for one routed request.
//!
//! # Responsibilities
//! - Buffer the request body so attempts can be replayed
//! - Pick an instance per attempt, preferring ones not yet tried
//! - Bound every attempt with the upstream deadline
//! - Retry transient failures with backoff, within the retry budget if one
//!   is configured
//! - Feed outcomes back into instance health and latency stats
//!
//! # Design Decisions
//! - A 5xx answer on the final attempt is passed through unchanged
//! - Exhaustion after a timeout is a 504, any other exhaustion a 503
//! - Dropping the dispatch future (client gone) releases the connection
//!   guard and records no failure

use std::sync::Arc;
use std::time::Instant;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::Request;
use axum::response::Response;
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::config::GatewayConfig;
use crate::dispatch::upstream::{Upstream, UpstreamError};
use crate::dispatch::Dispatch;
use crate::error::{GatewayError, GatewayResult};
use crate::health::state::Thresholds;
use crate::http::context::{RequestContext, RequestPhase};
use crate::http::request::UpstreamRequest;
use crate::http::response;
use crate::load_balancer::BackendPool;
use crate::observability::metrics;
use crate::resilience::{retries::is_transient_status, Deadlines, FailureKind, RetryBudget, RetryPolicy};
use crate::routing::Route;

/// Reloadable dispatch parameters.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub retry: RetryPolicy,
    pub deadlines: Deadlines,
    pub thresholds: Thresholds,
    pub max_body_bytes: usize,
}

impl DispatchSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retries),
            deadlines: Deadlines::from_config(&config.timeouts),
            thresholds: Thresholds::from_config(&config.health_check),
            max_body_bytes: config.limits.max_body_bytes,
        }
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    pool: Arc<BackendPool>,
    upstream: Arc<dyn Upstream>,
    settings: ArcSwap<DispatchSettings>,
    budget: ArcSwapOption<RetryBudget>,
}

impl Dispatcher {
    pub fn new(pool: Arc<BackendPool>, upstream: Arc<dyn Upstream>, config: &GatewayConfig) -> Self {
        let settings = DispatchSettings::from_config(config);
        pool.set_trial_cooldown(settings.thresholds.cooldown);
        Self {
            pool,
            upstream,
            settings: ArcSwap::from_pointee(settings),
            budget: ArcSwapOption::from(RetryBudget::from_config(&config.retries).map(Arc::new)),
        }
    }

    /// Apply reloaded timeouts, retry and health settings.
    ///
    /// The upstream client keeps its connection pool unless the connect
    /// timeout changed.
    pub fn reconfigure(&self, config: &GatewayConfig) {
        let settings = DispatchSettings::from_config(config);
        let previous = self.settings.load();
        if previous.deadlines.connect != settings.deadlines.connect {
            tracing::info!(connect_timeout = ?settings.deadlines.connect, "Rebuilding upstream client");
            self.upstream.set_connect_timeout(settings.deadlines.connect);
        }
        self.pool.set_trial_cooldown(settings.thresholds.cooldown);
        self.settings.store(Arc::new(settings));
        self.budget
            .store(RetryBudget::from_config(&config.retries).map(Arc::new));
    }

    pub fn settings(&self) -> Arc<DispatchSettings> {
        self.settings.load_full()
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Forward `request` to an instance of `route.service`.
    pub async fn dispatch_route(
        &self,
        route: &Route,
        ctx: &mut RequestContext,
        request: Request<Body>,
    ) -> GatewayResult<Response> {
        let settings = self.settings.load_full();
        let budget = self.budget.load_full();
        let policy = match route.max_attempts {
            Some(n) => settings.retry.with_max_attempts(n),
            None => settings.retry.clone(),
        };
        let timeout = settings.deadlines.upstream_for(route.timeout);

        let (parts, body) = request.into_parts();
        let body = buffer_body(body, settings.max_body_bytes).await?;
        let template = UpstreamRequest::from_parts(&parts, ctx);
        if let Some(budget) = &budget {
            budget.record_request();
        }

        let mut tried: Vec<String> = Vec::new();
        let mut last_failure: Option<FailureKind> = None;

        loop {
            let Some(backend) = self.pool.select(&route.service, &tried) else {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    service = %route.service,
                    attempts = ctx.attempts(),
                    "No backend instance available"
                );
                ctx.enter(RequestPhase::Exhausted);
                return Err(exhausted(route, ctx.attempts(), last_failure, timeout));
            };

            ctx.begin_attempt(backend.address.clone());
            if !tried.contains(&backend.address) {
                tried.push(backend.address.clone());
            }

            let attempt = template.build(&backend.address, body.clone())?;
            let started = Instant::now();
            let outcome = tokio::time::timeout(timeout, self.upstream.send(attempt)).await;
            let elapsed = started.elapsed();

            let (failure, passthrough) = match outcome {
                Ok(Ok(upstream_response)) => {
                    backend.record_latency(elapsed);
                    let status = upstream_response.status();
                    if !is_transient_status(status) {
                        if let Some(state) = backend.mark_success(settings.thresholds) {
                            metrics::record_backend_health(&backend.address, state);
                        }
                        metrics::record_upstream_attempt(&route.service, &backend.address, "success");
                        ctx.enter(RequestPhase::Success);
                        tracing::debug!(
                            request_id = %ctx.request_id,
                            backend = %backend.address,
                            status = %status,
                            attempt = ctx.attempts(),
                            latency_ms = elapsed.as_millis() as u64,
                            "Upstream responded"
                        );
                        return Ok(response::sanitize(upstream_response, &ctx.request_id));
                    }
                    (FailureKind::Status(status), Some(upstream_response))
                }
                Ok(Err(UpstreamError::Connect(e))) => {
                    tracing::warn!(request_id = %ctx.request_id, backend = %backend.address, error = %e, "Upstream connect failed");
                    (FailureKind::Connect, None)
                }
                Ok(Err(UpstreamError::Request(e))) => {
                    tracing::warn!(request_id = %ctx.request_id, backend = %backend.address, error = %e, "Upstream request failed");
                    (FailureKind::Request, None)
                }
                Err(_) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        backend = %backend.address,
                        timeout_ms = timeout.as_millis() as u64,
                        "Upstream attempt timed out"
                    );
                    (FailureKind::Timeout, None)
                }
            };

            if let Some(state) = backend.mark_failure(settings.thresholds) {
                metrics::record_backend_health(&backend.address, state);
            }
            metrics::record_upstream_attempt(&route.service, &backend.address, failure.as_str());
            last_failure = Some(failure);
            drop(backend);

            let attempts = ctx.attempts();
            let retry = attempts < policy.max_attempts
                && policy.is_retryable(&template.method, failure)
                && budget.as_ref().map_or(true, |b| b.try_acquire());

            if !retry {
                ctx.enter(RequestPhase::Exhausted);
                if let Some(upstream_response) = passthrough {
                    return Ok(response::sanitize(upstream_response, &ctx.request_id));
                }
                return Err(exhausted(route, attempts, last_failure, timeout));
            }
            drop(passthrough);

            ctx.enter(RequestPhase::Retrying);
            metrics::record_retry(&route.service);
            let delay = policy.backoff(attempts);
            tracing::info!(
                request_id = %ctx.request_id,
                service = %route.service,
                attempt = attempts,
                reason = failure.as_str(),
                delay = ?delay,
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Dispatch for Dispatcher {
    async fn dispatch(&self, ctx: &mut RequestContext, request: Request<Body>) -> GatewayResult<Response> {
        let Some(route) = ctx.route().cloned() else {
            return Err(GatewayError::NoRouteMatch {
                method: request.method().to_string(),
                path: request.uri().path().to_string(),
            });
        };
        self.dispatch_route(&route, ctx, request).await
    }
}

fn exhausted(
    route: &Route,
    attempts: u32,
    last_failure: Option<FailureKind>,
    timeout: std::time::Duration,
) -> GatewayError {
    match last_failure {
        Some(FailureKind::Timeout) => GatewayError::BackendTimeout {
            service: route.service.clone(),
            timeout,
        },
        _ => GatewayError::BackendUnavailable {
            service: route.service.clone(),
            attempts,
        },
    }
}

async fn buffer_body(body: Body, limit: usize) -> GatewayResult<Bytes> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(GatewayError::PayloadTooLarge { limit }),
        Err(e) => Err(GatewayError::InvalidRequest(format!(
            "failed to read request body: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::http::{Method, StatusCode};

    use crate::config::schema::{InstanceConfig, RouteConfig, ServiceConfig};
    use crate::discovery::StaticRegistry;
    use crate::health::HealthState;

    /// Scripted upstream: pops one outcome per call, repeating the last.
    #[derive(Debug)]
    struct ScriptedUpstream {
        script: Mutex<VecDeque<Outcome>>,
        calls: AtomicU32,
        seen: Mutex<Vec<String>>,
        client_rebuilds: AtomicU32,
    }

    #[derive(Debug, Clone, Copy)]
    enum Outcome {
        Status(u16),
        Refused,
        Hang,
    }

    impl ScriptedUpstream {
        fn new(script: &[Outcome]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
                client_rebuilds: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn send(&self, request: Request<Body>) -> Result<Response, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let authority = request.uri().authority().map(|a| a.to_string()).unwrap_or_default();
            self.seen.lock().unwrap().push(authority);

            let outcome = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    *script.front().unwrap()
                }
            };
            match outcome {
                Outcome::Status(code) => Ok(Response::builder()
                    .status(code)
                    .body(Body::from("upstream"))
                    .unwrap()),
                Outcome::Refused => Err(UpstreamError::Connect("connection refused".into())),
                Outcome::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(UpstreamError::Request("unreachable".into()))
                }
            }
        }

        fn set_connect_timeout(&self, _timeout: Duration) {
            self.client_rebuilds.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(ports: &[u16], max_attempts: u32) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.retries.max_attempts = max_attempts;
        config.retries.base_delay_ms = 1;
        config.retries.max_delay_ms = 2;
        config.timeouts.upstream_ms = 50;
        config.limits.max_body_bytes = 16;
        config.services.push(ServiceConfig {
            name: "orders".to_string(),
            load_balancing: Default::default(),
            instances: ports
                .iter()
                .map(|p| InstanceConfig {
                    host: "127.0.0.1".to_string(),
                    port: *p,
                    weight: 1,
                    max_connections: 10,
                    metadata: Default::default(),
                })
                .collect(),
        });
        config
    }

    fn build_dispatcher(config: &GatewayConfig, upstream: Arc<ScriptedUpstream>) -> Dispatcher {
        let registry = Arc::new(StaticRegistry::from_config(&config.services));
        let pool = Arc::new(BackendPool::new(registry));
        pool.set_policies(&config.services);
        Dispatcher::new(pool, upstream, config)
    }

    fn route() -> Route {
        let config = RouteConfig {
            id: "orders".to_string(),
            path: "/orders/*".to_string(),
            host: None,
            headers: Vec::new(),
            methods: Vec::new(),
            service: "orders".to_string(),
            priority: 0,
            filters: Vec::new(),
            timeout_ms: None,
            max_attempts: None,
        };
        Route::compile(0, &config, &[]).unwrap()
    }

    fn request(method: Method, body: &'static str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri("/orders/1")
            .body(Body::from(body))
            .unwrap()
    }

    async fn run(dispatcher: &Dispatcher, request: Request<Body>) -> (GatewayResult<Response>, RequestContext) {
        let route = Arc::new(route());
        let mut ctx = RequestContext::new("test", None);
        ctx.set_route(route.clone());
        let result = dispatcher.dispatch_route(&route, &mut ctx, request).await;
        (result, ctx)
    }

    #[tokio::test]
    async fn always_failing_backend_gets_exactly_max_attempts() {
        let upstream = ScriptedUpstream::new(&[Outcome::Refused]);
        let dispatcher = build_dispatcher(&config(&[9001, 9002], 3), upstream.clone());

        let (result, ctx) = run(&dispatcher, request(Method::GET, "")).await;
        assert_eq!(upstream.calls(), 3);
        assert_eq!(ctx.attempts(), 3);
        assert_eq!(ctx.phase(), RequestPhase::Exhausted);
        match result {
            Err(GatewayError::BackendUnavailable { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected BackendUnavailable, got {:?}", other.map(|r| r.status())),
        }
    }

    #[tokio::test]
    async fn retry_moves_to_another_instance() {
        let upstream = ScriptedUpstream::new(&[Outcome::Status(503), Outcome::Status(200)]);
        let dispatcher = build_dispatcher(&config(&[9001, 9002], 3), upstream.clone());

        let (result, ctx) = run(&dispatcher, request(Method::GET, "")).await;
        assert_eq!(result.unwrap().status(), StatusCode::OK);
        assert_eq!(ctx.phase(), RequestPhase::Success);
        let seen = upstream.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn final_5xx_is_passed_through() {
        let upstream = ScriptedUpstream::new(&[Outcome::Status(503)]);
        let dispatcher = build_dispatcher(&config(&[9001], 2), upstream.clone());

        let (result, _) = run(&dispatcher, request(Method::GET, "")).await;
        assert_eq!(result.unwrap().status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn non_idempotent_not_retried_on_5xx_but_retried_on_connect() {
        let upstream = ScriptedUpstream::new(&[Outcome::Status(502)]);
        let dispatcher = build_dispatcher(&config(&[9001, 9002], 3), upstream.clone());
        let (result, _) = run(&dispatcher, request(Method::POST, "{}")).await;
        assert_eq!(result.unwrap().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(upstream.calls(), 1);

        let upstream = ScriptedUpstream::new(&[Outcome::Refused, Outcome::Status(201)]);
        let dispatcher = build_dispatcher(&config(&[9001, 9002], 3), upstream.clone());
        let (result, _) = run(&dispatcher, request(Method::POST, "{}")).await;
        assert_eq!(result.unwrap().status(), StatusCode::CREATED);
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn timeout_exhaustion_is_backend_timeout() {
        let upstream = ScriptedUpstream::new(&[Outcome::Hang]);
        let dispatcher = build_dispatcher(&config(&[9001], 2), upstream.clone());

        let (result, _) = run(&dispatcher, request(Method::GET, "")).await;
        assert!(matches!(result, Err(GatewayError::BackendTimeout { .. })));
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn no_instances_is_unavailable_with_zero_attempts() {
        let upstream = ScriptedUpstream::new(&[Outcome::Status(200)]);
        let dispatcher = build_dispatcher(&config(&[], 3), upstream.clone());

        let (result, ctx) = run(&dispatcher, request(Method::GET, "")).await;
        assert!(matches!(
            result,
            Err(GatewayError::BackendUnavailable { attempts: 0, .. })
        ));
        assert_eq!(ctx.attempts(), 0);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_before_any_attempt() {
        let upstream = ScriptedUpstream::new(&[Outcome::Status(200)]);
        let dispatcher = build_dispatcher(&config(&[9001], 3), upstream.clone());

        let (result, _) = run(&dispatcher, request(Method::POST, "this body is far too long")).await;
        assert!(matches!(result, Err(GatewayError::PayloadTooLarge { limit: 16 })));
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn dispatch_without_route_is_no_match() {
        let upstream = ScriptedUpstream::new(&[Outcome::Status(200)]);
        let dispatcher = build_dispatcher(&config(&[9001], 3), upstream);
        let mut ctx = RequestContext::new("test", None);
        let result = dispatcher.dispatch(&mut ctx, request(Method::GET, "")).await;
        assert!(matches!(result, Err(GatewayError::NoRouteMatch { .. })));
    }

    #[tokio::test]
    async fn sequential_failures_each_get_every_attempt() {
        let upstream = ScriptedUpstream::new(&[Outcome::Refused]);
        let dispatcher = build_dispatcher(&config(&[9001], 3), upstream.clone());

        for i in 1..=12 {
            let (result, ctx) = run(&dispatcher, request(Method::GET, "")).await;
            assert_eq!(ctx.attempts(), 3, "request {} was cut short", i);
            assert!(matches!(
                result,
                Err(GatewayError::BackendUnavailable { attempts: 3, .. })
            ));
        }
        assert_eq!(upstream.calls(), 36);
    }

    #[tokio::test]
    async fn enabled_budget_caps_retries() {
        let upstream = ScriptedUpstream::new(&[Outcome::Refused]);
        let mut config = config(&[9001], 3);
        config.retries.budget_enabled = true;
        config.retries.budget_ratio = 0.0;
        config.retries.budget_min_retries = 2;
        let dispatcher = build_dispatcher(&config, upstream.clone());

        let (_, first) = run(&dispatcher, request(Method::GET, "")).await;
        let (_, second) = run(&dispatcher, request(Method::GET, "")).await;
        assert_eq!(first.attempts(), 3);
        assert_eq!(second.attempts(), 1);
    }

    #[tokio::test]
    async fn cancelled_attempt_releases_slot_and_records_nothing() {
        let upstream = ScriptedUpstream::new(&[Outcome::Hang]);
        let mut config = config(&[9001], 3);
        config.timeouts.upstream_ms = 10_000;
        config.health_check.unhealthy_threshold = 1;
        let dispatcher = build_dispatcher(&config, upstream.clone());

        let route = Arc::new(route());
        let mut ctx = RequestContext::new("test", None);
        ctx.set_route(route.clone());
        tokio::select! {
            _ = dispatcher.dispatch_route(&route, &mut ctx, request(Method::GET, "")) => {
                panic!("hung upstream should not complete");
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }

        assert_eq!(upstream.calls(), 1);
        let backend = dispatcher.pool().group("orders").backends[0].clone();
        assert_eq!(backend.active(), 0);
        assert_eq!(backend.health(), HealthState::Unknown);
        assert_eq!(backend.latency_micros(), 0);
    }

    #[tokio::test]
    async fn reconfigure_rebuilds_client_only_on_connect_timeout_change() {
        let upstream = ScriptedUpstream::new(&[Outcome::Status(200)]);
        let mut config = config(&[9001], 3);
        let dispatcher = build_dispatcher(&config, upstream.clone());

        config.retries.max_attempts = 5;
        dispatcher.reconfigure(&config);
        assert_eq!(upstream.client_rebuilds.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.settings().retry.max_attempts, 5);

        config.timeouts.connect_ms += 500;
        dispatcher.reconfigure(&config);
        assert_eq!(upstream.client_rebuilds.load(Ordering::SeqCst), 1);
    }
}
