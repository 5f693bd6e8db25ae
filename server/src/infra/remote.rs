//! HTTP client for a real provisioning backend

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::lab::{AccessBundle, CreateLabParams, Lab, LabId, LabStatus};
use crate::domain::types::ProvisionEvent;
use crate::error::{Error, Result};
use crate::infra::lab_service::{LabService, EVENT_CHANNEL_CAPACITY};
use crate::Config;

/// Provisioning backend reached over HTTP
pub struct RemoteLabService {
    client: Client,
    base_url: String,
    events: broadcast::Sender<ProvisionEvent>,
}

impl RemoteLabService {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            events,
        })
    }

    /// Create a client from the server configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = match config.backend_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self::new(&config.backend_url, timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, lab_id: Option<LabId>) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            if let Some(id) = lab_id {
                return Err(Error::LabNotFound(id));
            }
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ServiceUnavailable(format!(
                "backend returned {}: {}",
                status, body
            )));
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        lab_id: Option<LabId>,
    ) -> Result<T> {
        Ok(self.send(request, lab_id).await?.json::<T>().await?)
    }

    /// Fetch the access bundle of a running lab
    pub async fn fetch_access(&self, id: LabId) -> Result<AccessBundle> {
        let request = self.client.get(self.url(&format!("/labs/{}/access", id)));
        self.send_json(request, Some(id)).await
    }

    /// Poll the backend and announce labs that left `Creating`
    pub fn spawn_poller(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Polling provisioning backend every {:?}", interval);
            let mut pending = HashSet::new();
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                if let Err(e) = self.poll_once(&mut pending).await {
                    warn!("Provisioning poll failed: {}", e);
                }
            }
        })
    }

    /// One polling round.
    ///
    /// `pending` holds the labs seen in `Creating` by earlier rounds.
    pub async fn poll_once(&self, pending: &mut HashSet<LabId>) -> Result<()> {
        let labs = self.list_labs().await?;
        let present: HashSet<LabId> = labs.iter().map(|lab| lab.id).collect();
        pending.retain(|id| present.contains(id));

        for lab in labs {
            if lab.status == LabStatus::Creating {
                pending.insert(lab.id);
                continue;
            }
            if !pending.remove(&lab.id) {
                continue;
            }

            let event = match lab.status {
                LabStatus::Running => {
                    let Some(access) = lab.access else {
                        // Retry on the next round
                        error!("Lab {} is running without access details", lab.id);
                        pending.insert(lab.id);
                        continue;
                    };
                    ProvisionEvent::Ready {
                        lab_id: lab.id,
                        access,
                        vms: lab.vms,
                    }
                }
                LabStatus::Failed => ProvisionEvent::Failed {
                    lab_id: lab.id,
                    reason: lab
                        .failure_reason
                        .unwrap_or_else(|| "provisioning failed".to_string()),
                },
                other => {
                    debug!("Lab {} went from creating to {}", lab.id, other);
                    continue;
                }
            };

            debug!("Lab {} finished provisioning", event.lab_id());
            let _ = self.events.send(event);
        }

        Ok(())
    }
}

#[async_trait]
impl LabService for RemoteLabService {
    /// Running labs listed without access details get them from the access endpoint
    async fn list_labs(&self) -> Result<Vec<Lab>> {
        let request = self.client.get(self.url("/labs"));
        let mut labs: Vec<Lab> = self.send_json(request, None).await?;

        for lab in labs.iter_mut() {
            if lab.status != LabStatus::Running || lab.access.is_some() {
                continue;
            }
            let id = lab.id;
            let access = self.fetch_access(id).await.map_err(|e| {
                Error::ServiceUnavailable(format!("access details of lab {} unavailable: {}", id, e))
            })?;
            debug!("Fetched access details of lab {}", id);
            lab.access = Some(access);
        }

        Ok(labs)
    }

    async fn create_lab(&self, params: CreateLabParams) -> Result<Lab> {
        let request = self.client.post(self.url("/labs")).json(&params);
        self.send_json(request, None).await
    }

    async fn stop_lab(&self, id: LabId) -> Result<Lab> {
        let request = self.client.post(self.url(&format!("/labs/{}/stop", id)));
        self.send_json(request, Some(id)).await
    }

    async fn extend_lab(&self, id: LabId, hours: i64) -> Result<Lab> {
        let request = self
            .client
            .post(self.url(&format!("/labs/{}/extend?hours={}", id, hours)));
        self.send_json(request, Some(id)).await
    }

    async fn delete_lab(&self, id: LabId) -> Result<()> {
        let request = self.client.delete(self.url(&format!("/labs/{}", id)));
        self.send(request, Some(id)).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProvisionEvent> {
        self.events.subscribe()
    }
}
