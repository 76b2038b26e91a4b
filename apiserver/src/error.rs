use drain::DrainError;

use actix_web::error::ResponseError;
use actix_web::http::StatusCode;
use snafu::Snafu;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to create client: '{}'", source))]
    ClientCreate { source: kube::Error },

    #[snafu(display("Invalid value '{}' for environment variable '{}'", value, name))]
    InvalidEnvVar { name: &'static str, value: String },

    #[snafu(display("Invalid request: '{}'", source))]
    InvalidRequest { source: validator::ValidationErrors },

    #[snafu(display("Error running HTTP server: '{}'", source))]
    HttpServerError { source: std::io::Error },

    #[snafu(display("Error configuring tracing: '{}'", source))]
    TracingConfiguration {
        source: drain::telemetry::TelemetryConfigError,
    },

    #[snafu(display("Unable to register metrics: '{}'", source))]
    MetricsRegistration { source: prometheus::Error },

    #[snafu(display("Failed to cordon Node: '{}'", source))]
    NodeCordon { source: DrainError },

    #[snafu(display("Failed to uncordon Node: '{}'", source))]
    NodeUncordon { source: DrainError },

    #[snafu(display("Failed to drain Node: '{}'", source))]
    NodeDrain { source: DrainError },
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NodeCordon { source }
            | Error::NodeUncordon { source }
            | Error::NodeDrain { source }
                if source.is_precondition() =>
            {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let blocked = Error::NodeDrain {
            source: DrainError::PodsBlocked {
                node_name: "node-1".to_string(),
                errors: vec!["cannot delete Pods with local storage: default/cache".to_string()],
            },
        };
        assert_eq!(blocked.status_code(), StatusCode::CONFLICT);

        let failed = Error::NodeDrain {
            source: DrainError::RemovePods {
                node_name: "node-1".to_string(),
                errors: vec![],
            },
        };
        assert_eq!(failed.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
