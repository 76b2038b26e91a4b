//! Process configuration read from the environment.
use crate::error::{self, Result};

use snafu::OptionExt;
use std::env;
use tokio::time::Duration;

const APISERVER_PORT_ENV_VAR: &str = "APISERVER_PORT";
const DRAIN_DEFAULT_TIMEOUT_ENV_VAR: &str = "DRAIN_DEFAULT_TIMEOUT_SECONDS";
const KUBERNETES_SERVICE_HOST_ENV_VAR: &str = "KUBERNETES_SERVICE_HOST";

const DEFAULT_SERVER_PORT: u16 = 8080;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub server_port: u16,
    /// Global timeout for drains whose policy does not set one.
    pub default_drain_timeout: Option<Duration>,
    /// Listen on IPv6 if the cluster itself is reached over IPv6.
    pub ipv6: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::parse(
            env::var(APISERVER_PORT_ENV_VAR).ok(),
            env::var(DRAIN_DEFAULT_TIMEOUT_ENV_VAR).ok(),
            env::var(KUBERNETES_SERVICE_HOST_ENV_VAR).ok(),
        )
    }

    fn parse(
        port: Option<String>,
        default_timeout: Option<String>,
        service_host: Option<String>,
    ) -> Result<Self> {
        let server_port = match port {
            Some(port) => port.parse::<u16>().ok().context(error::InvalidEnvVarSnafu {
                name: APISERVER_PORT_ENV_VAR,
                value: port.clone(),
            })?,
            None => DEFAULT_SERVER_PORT,
        };

        let default_drain_timeout = match default_timeout {
            Some(seconds) => {
                let seconds: u64 = seconds.parse().ok().context(error::InvalidEnvVarSnafu {
                    name: DRAIN_DEFAULT_TIMEOUT_ENV_VAR,
                    value: seconds.clone(),
                })?;
                (seconds > 0).then(|| Duration::from_secs(seconds))
            }
            None => None,
        };

        Ok(ServerConfig {
            server_port,
            default_drain_timeout,
            ipv6: service_host.map_or(false, |host| host.contains(':')),
        })
    }

    pub fn bind_address(&self) -> String {
        if self.ipv6 {
            format!("[::]:{}", self.server_port)
        } else {
            format!("0.0.0.0:{}", self.server_port)
        }
    }
}
