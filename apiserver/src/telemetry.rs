use crate::api::NO_TELEMETRY_ENDPOINTS;

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use lazy_static::lazy_static;
use tracing::Span;
use tracing_actix_web::{DefaultRootSpanBuilder, RootSpanBuilder};

use std::collections::HashSet;

// tracing-actix-web doesn't provide a convenient way to remove any routes from the logs, so we use a global
// settings containing API paths to generate empty `tracing::Span`s on paths which we don't want logged.
lazy_static! {
    static ref EXCLUDED_PATHS: HashSet<&'static str> =
        NO_TELEMETRY_ENDPOINTS.iter().copied().collect();
}

/// Creates the root span of every request. The Node name is only known once the request body has
/// been parsed, so handlers record it on the span themselves.
#[derive(Default)]
pub(crate) struct DrainApiserverRootSpanBuilder;

impl RootSpanBuilder for DrainApiserverRootSpanBuilder {
    fn on_request_start(request: &ServiceRequest) -> Span {
        if EXCLUDED_PATHS.contains(request.path()) {
            Span::none()
        } else {
            tracing_actix_web::root_span!(request, node_name = tracing::field::Empty)
        }
    }

    fn on_request_end<B: MessageBody>(
        span: Span,
        response: &std::result::Result<ServiceResponse<B>, actix_web::Error>,
    ) {
        DefaultRootSpanBuilder::on_request_end(span, response);
    }
}
