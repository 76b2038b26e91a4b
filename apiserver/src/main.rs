use apiserver::api::{self, APIServerSettings};
use apiserver::config::ServerConfig;
use apiserver::error::{self, Result};
use apiserver::metrics::DrainMetrics;
use drain::telemetry::init_telemetry_from_env;
use drain::{K8SClusterClient, NodeDrainer};
use tracing::{event, Level};

use snafu::ResultExt;

use std::env;
use std::fs;

// By default, errors resulting in termination of the apiserver are written to this file,
// which is the location kubernetes uses by default to surface termination-causing errors.
const TERMINATION_LOG: &str = "/dev/termination-log";

#[actix_web::main]
async fn main() {
    let termination_log = env::var("TERMINATION_LOG").unwrap_or(TERMINATION_LOG.to_string());

    if let Err(error) = run_server().await {
        event!(Level::ERROR, %error, "Drain apiserver failed.");
        fs::write(&termination_log, format!("{}", error))
            .expect("Could not write k8s termination log.");
    }

    opentelemetry::global::shutdown_tracer_provider();
}

async fn run_server() -> Result<()> {
    init_telemetry_from_env().context(error::TracingConfigurationSnafu)?;

    let config = ServerConfig::from_env()?;

    let k8s_client = kube::client::Client::try_default()
        .await
        .context(error::ClientCreateSnafu)?;

    let metrics = DrainMetrics::new().context(error::MetricsRegistrationSnafu)?;
    metrics.initialize_series();

    let drainer = NodeDrainer::new(K8SClusterClient::new(k8s_client))
        .with_pod_removed_hook(metrics.pod_removed_hook());
    let shutdown = drainer.shutdown_token();

    let settings = APIServerSettings {
        drain_client: drainer,
        metrics,
        default_drain_timeout: config.default_drain_timeout,
    };

    let result = api::run_server(settings, &config).await;

    // Any drain still running past server shutdown is abandoned. Its Node stays cordoned.
    shutdown.cancel();
    result
}
