use crate::{Connector, Link, TransportError, polling, ws};
use futures_util::future::BoxFuture;
use huddle::config::{ClientConfig, TransportKind};
use reqwest::cookie::Jar;
use std::sync::Arc;

/// Opens a link to the configured server, trying each transport in the
/// configured preference order.
///
/// Build a new connector for every session start: its HTTP client and cookie
/// jar are never shared between sessions.
pub struct WireConnector {
    config: ClientConfig,
    http: reqwest::Client,
    jar: Option<Arc<Jar>>,
}

impl WireConnector {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let jar = config.with_credentials.then(|| Arc::new(Jar::default()));

        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout());
        if let Some(jar) = &jar {
            builder = builder.cookie_provider(jar.clone());
        }
        let http = builder.build()?;

        Ok(Self { config, http, jar })
    }

    async fn open_first(&self) -> Result<Link, TransportError> {
        if self.config.transports.is_empty() {
            return Err(TransportError::NoTransports);
        }

        let mut failures = Vec::new();
        for kind in &self.config.transports {
            let result = match kind {
                TransportKind::Websocket => ws::open(&self.config, self.jar.as_deref()).await,
                TransportKind::Polling => polling::open(&self.config, self.http.clone()).await,
            };
            match result {
                Ok(link) => {
                    tracing::info!(transport = %kind, server = %self.config.server_url, "transport open");
                    return Ok(link);
                }
                Err(e) => {
                    tracing::debug!(transport = %kind, err = %e, "transport failed, trying next");
                    failures.push(format!("{kind}: {e}"));
                }
            }
        }
        Err(TransportError::Exhausted(failures.join("; ")))
    }
}

impl Connector for WireConnector {
    fn open(&self) -> BoxFuture<'_, Result<Link, TransportError>> {
        Box::pin(self.open_first())
    }
}
