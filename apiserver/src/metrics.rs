//! Prometheus metrics describing drain activity.
use crate::api::APIServerSettings;
use crate::constants::{CORDON_OPERATION, DRAIN_OPERATION, UNCORDON_OPERATION};

use actix_web::http::header::CONTENT_TYPE;
use actix_web::{web::Data, HttpResponse};
use drain::{NodeDrainClient, PodRemovedHook};
use k8s_openapi::api::core::v1::Pod;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::{event, Level};

const OUTCOME_SUCCESS: &str = "success";
const OUTCOME_FAILURE: &str = "failure";
const METHOD_EVICTION: &str = "eviction";
const METHOD_DELETION: &str = "deletion";

#[derive(Clone)]
pub struct DrainMetrics {
    registry: Registry,
    requests: IntCounterVec,
    removed_pods: IntCounterVec,
}

impl DrainMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new(
                "node_drain_requests_total",
                "Drain, cordon and uncordon requests by outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let removed_pods = IntCounterVec::new(
            Opts::new(
                "node_drain_removed_pods_total",
                "Pods removed from drained Nodes",
            ),
            &["method"],
        )?;
        registry.register(Box::new(removed_pods.clone()))?;

        Ok(DrainMetrics {
            registry,
            requests,
            removed_pods,
        })
    }

    /// Counts a finished request for `operation`.
    pub fn observe_request(&self, operation: &str, succeeded: bool) {
        let outcome = if succeeded {
            OUTCOME_SUCCESS
        } else {
            OUTCOME_FAILURE
        };
        self.requests
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn observe_removed_pod(&self, evicted: bool) {
        let method = if evicted {
            METHOD_EVICTION
        } else {
            METHOD_DELETION
        };
        self.removed_pods.with_label_values(&[method]).inc();
    }

    /// A hook that counts every Pod the drainer removes.
    pub fn pod_removed_hook(&self) -> PodRemovedHook {
        let metrics = self.clone();
        Arc::new(move |_pod: &Pod, evicted: bool| {
            metrics.observe_removed_pod(evicted)
        })
    }

    /// Renders every metric in the Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buf) {
            event!(Level::ERROR, %err, "Failed to encode metrics.");
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    /// Labels every counter with zero so that dashboards see all series from the start.
    pub fn initialize_series(&self) {
        for operation in [DRAIN_OPERATION, CORDON_OPERATION, UNCORDON_OPERATION] {
            for outcome in [OUTCOME_SUCCESS, OUTCOME_FAILURE] {
                self.requests.with_label_values(&[operation, outcome]);
            }
        }
        for method in [METHOD_EVICTION, METHOD_DELETION] {
            self.removed_pods.with_label_values(&[method]);
        }
    }
}

/// HTTP endpoint vending metrics in the Prometheus text format.
pub(crate) async fn vending_metrics<T: NodeDrainClient>(
    settings: Data<APIServerSettings<T>>,
) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, prometheus::TEXT_FORMAT))
        .body(settings.metrics.encode())
}
