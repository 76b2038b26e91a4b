use super::APIServerSettings;
use crate::constants::{CORDON_OPERATION, DRAIN_OPERATION, UNCORDON_OPERATION};
use crate::error::{self, Result};
use crate::{DrainNodeRequest, NodeRequest};
use drain::telemetry::AUDIT_TARGET;
use drain::NodeDrainClient;

use actix_web::{web, HttpResponse};
use snafu::ResultExt;
use tracing::{event, Level};
use tracing_actix_web::RootSpan;
use validator::Validate;

/// HTTP endpoint which prevents work from being scheduled to a node, and removes all pods currently running.
///
/// Dropping the request (e.g. because the client disconnected) cancels the drain. The Node stays cordoned.
pub(crate) async fn drain_node<T: NodeDrainClient>(
    settings: web::Data<APIServerSettings<T>>,
    root_span: RootSpan,
    request: web::Json<DrainNodeRequest>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    request.validate().context(error::InvalidRequestSnafu)?;
    root_span.record("node_name", request.node_name.as_str());
    event!(
        target: AUDIT_TARGET,
        Level::INFO,
        node_name = %request.node_name,
        policy = ?request.policy,
        operation = DRAIN_OPERATION,
        "Drain requested."
    );

    let policy = request
        .policy
        .with_default_timeout(settings.default_drain_timeout);
    let result = settings
        .drain_client
        .drain_node(&request.node_name, &policy)
        .await;
    settings
        .metrics
        .observe_request(DRAIN_OPERATION, result.is_ok());

    let report = result.context(error::NodeDrainSnafu)?;
    Ok(HttpResponse::Ok().json(report))
}

/// HTTP endpoint which prevents work from being scheduled to a node.
pub(crate) async fn cordon<T: NodeDrainClient>(
    settings: web::Data<APIServerSettings<T>>,
    root_span: RootSpan,
    request: web::Json<NodeRequest>,
) -> Result<HttpResponse> {
    let node_name = accept_node_request(&root_span, request.into_inner(), CORDON_OPERATION)?;

    let result = settings.drain_client.cordon_node(&node_name).await;
    settings
        .metrics
        .observe_request(CORDON_OPERATION, result.is_ok());
    result.context(error::NodeCordonSnafu)?;

    Ok(HttpResponse::Ok().finish())
}

/// HTTP endpoint which re-allows work to be scheduled on a node that has been cordoned.
pub(crate) async fn uncordon<T: NodeDrainClient>(
    settings: web::Data<APIServerSettings<T>>,
    root_span: RootSpan,
    request: web::Json<NodeRequest>,
) -> Result<HttpResponse> {
    let node_name = accept_node_request(&root_span, request.into_inner(), UNCORDON_OPERATION)?;

    let result = settings.drain_client.uncordon_node(&node_name).await;
    settings
        .metrics
        .observe_request(UNCORDON_OPERATION, result.is_ok());
    result.context(error::NodeUncordonSnafu)?;

    Ok(HttpResponse::Ok().finish())
}

/// Validates the request and records it on the request span and in the audit trail.
fn accept_node_request(
    root_span: &RootSpan,
    request: NodeRequest,
    operation: &'static str,
) -> Result<String> {
    request.validate().context(error::InvalidRequestSnafu)?;
    root_span.record("node_name", request.node_name.as_str());
    event!(
        target: AUDIT_TARGET,
        Level::INFO,
        node_name = %request.node_name,
        operation,
        "Schedulability change requested."
    );
    Ok(request.node_name)
}
