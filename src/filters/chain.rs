//! Filter chain execution (onion model).

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};

use crate::dispatch::Dispatch;
use crate::filters::{Filter, FilterAction};
use crate::http::context::{RequestContext, RequestPhase};
use crate::observability::metrics;

/// Ordered filters of one route.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(Filter::name).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run pre-phase filters, dispatch, then unwind post-phase filters.
    ///
    /// If a filter short-circuits, dispatch is skipped and only the filters
    /// whose pre-phase completed run their post-phase, in reverse order.
    /// Dispatch errors are rendered as responses before unwinding.
    pub async fn execute<D>(&self, ctx: &mut RequestContext, request: Request<Body>, dispatcher: &D) -> Response
    where
        D: Dispatch + ?Sized,
    {
        let (mut parts, body) = request.into_parts();
        let mut entered = 0;
        let mut short_circuit = None;

        for filter in &self.filters {
            match filter.on_request(ctx, &mut parts) {
                FilterAction::Continue => entered += 1,
                FilterAction::ShortCircuit(response) => {
                    tracing::info!(
                        request_id = %ctx.request_id,
                        filter = filter.name(),
                        status = %response.status(),
                        "Request short-circuited by filter"
                    );
                    metrics::record_filter_rejection(filter.name());
                    ctx.enter(RequestPhase::Rejected);
                    short_circuit = Some(response);
                    break;
                }
            }
        }

        let mut response = match short_circuit {
            Some(response) => response,
            None => match dispatcher.dispatch(ctx, Request::from_parts(parts, body)).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        error = %e,
                        attempts = ctx.attempts(),
                        "Dispatch failed"
                    );
                    e.into_response()
                }
            },
        };

        for filter in self.filters[..entered].iter().rev() {
            filter.on_response(ctx, &mut response);
        }

        response
    }
}
