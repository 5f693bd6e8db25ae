//! Lab lifecycle store
//!
//! The store is the only place lab status changes. It keeps the labs of the
//! current user in memory, forwards user actions to the provisioning backend
//! and applies the backend's provisioning notifications.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::lab::{extension_delta, CreateLabParams, Lab, LabId, LabStatus};
use crate::domain::types::{LabUpdate, LabUpdateKind, ProvisionEvent};
use crate::error::{Error, Result};
use crate::infra::lab_service::LabService;
use crate::Config;

/// Capacity of the change feed
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Limits applied before a lab creation reaches the backend
#[derive(Debug, Clone, Copy)]
pub struct LabLimits {
    pub max_active_labs: usize,
    pub max_vms_per_lab: usize,
}

impl LabLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_active_labs: config.max_active_labs,
            max_vms_per_lab: config.max_vms_per_lab,
        }
    }
}

impl Default for LabLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Single source of truth for the labs shown on the dashboard
pub struct LabLifecycleStore {
    labs: RwLock<BTreeMap<LabId, Lab>>,
    service: Arc<dyn LabService>,
    updates: broadcast::Sender<LabUpdate>,
    limits: LabLimits,
    /// Creations sent to the backend but not yet committed
    creations_in_flight: AtomicUsize,
}

/// Holds one active-lab slot while a creation is in flight
struct CreationSlot<'a>(&'a AtomicUsize);

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Backend failures keep their meaning when it is one the caller can act on
fn backend_error(err: Error) -> Error {
    match err {
        Error::LabNotFound(_)
        | Error::InvalidLabState { .. }
        | Error::InvalidArgument(_)
        | Error::LabLimitExceeded(_)
        | Error::ServiceUnavailable(_) => err,
        other => Error::ServiceUnavailable(other.to_string()),
    }
}

fn invalid_payload(err: Error) -> Error {
    Error::ServiceUnavailable(format!("backend sent an invalid lab: {}", err))
}

impl LabLifecycleStore {
    /// Create an empty store backed by `service`
    pub fn new(service: Arc<dyn LabService>, limits: LabLimits) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            labs: RwLock::new(BTreeMap::new()),
            service,
            updates,
            limits,
            creations_in_flight: AtomicUsize::new(0),
        }
    }

    /// Subscribe to lab changes
    pub fn subscribe(&self) -> broadcast::Receiver<LabUpdate> {
        self.updates.subscribe()
    }

    fn publish(&self, kind: LabUpdateKind, lab: &Lab) {
        // Nobody watching is fine
        let _ = self.updates.send(LabUpdate {
            kind,
            lab: lab.clone(),
        });
    }

    /// Fetch the labs from the backend and replace the local collection.
    ///
    /// The whole response is validated before anything is applied. Concurrent
    /// calls each swap the collection atomically, so the last successful
    /// response wins.
    pub async fn list_labs(&self) -> Result<Vec<Lab>> {
        let fetched = self
            .service
            .list_labs()
            .await
            .map_err(|e| match e {
                Error::ServiceUnavailable(_) => e,
                other => Error::ServiceUnavailable(other.to_string()),
            })?;

        let mut next = BTreeMap::new();
        for lab in fetched {
            lab.validate().map_err(invalid_payload)?;
            let id = lab.id;
            if next.insert(id, lab).is_some() {
                return Err(Error::ServiceUnavailable(format!(
                    "backend returned lab {} more than once",
                    id
                )));
            }
        }

        let listed: Vec<Lab> = next.values().cloned().collect();
        let previous = std::mem::replace(&mut *self.labs.write().await, next);

        for lab in &listed {
            if previous.get(&lab.id) != Some(lab) {
                self.publish(LabUpdateKind::Listed, lab);
            }
        }
        debug!("Listed {} labs", listed.len());

        Ok(listed)
    }

    /// Labs currently held by the store, ordered by id
    pub async fn labs(&self, status: Option<LabStatus>) -> Vec<Lab> {
        self.labs
            .read()
            .await
            .values()
            .filter(|lab| status.map_or(true, |s| lab.status == s))
            .cloned()
            .collect()
    }

    /// Get a lab held by the store
    pub async fn get_lab(&self, id: LabId) -> Result<Lab> {
        self.labs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::LabNotFound(id))
    }

    /// Ask the backend for a new lab
    pub async fn create_lab(&self, params: CreateLabParams) -> Result<Lab> {
        params.validate(self.limits.max_vms_per_lab)?;

        let slot = self.reserve_creation_slot().await?;

        let created = self
            .service
            .create_lab(params)
            .await
            .map_err(backend_error)?;
        created.validate().map_err(invalid_payload)?;
        if created.status != LabStatus::Creating {
            return Err(Error::ServiceUnavailable(format!(
                "backend returned new lab {} as {}",
                created.id, created.status
            )));
        }

        // A resync may already have brought the lab in, possibly further along
        let lab = {
            let mut labs = self.labs.write().await;
            let lab = labs.entry(created.id).or_insert(created).clone();
            drop(slot);
            lab
        };

        info!("Lab {} ({}) requested", lab.id, lab.name);
        self.publish(LabUpdateKind::Created, &lab);
        Ok(lab)
    }

    /// Count committed and in-flight labs against the limit.
    ///
    /// Reservations are only taken under the write lock, so two concurrent
    /// creations cannot both claim the last slot.
    async fn reserve_creation_slot(&self) -> Result<CreationSlot<'_>> {
        let labs = self.labs.write().await;
        let active = labs.values().filter(|lab| lab.is_active()).count()
            + self.creations_in_flight.load(Ordering::SeqCst);
        if active >= self.limits.max_active_labs {
            return Err(Error::LabLimitExceeded(self.limits.max_active_labs));
        }
        self.creations_in_flight.fetch_add(1, Ordering::SeqCst);
        drop(labs);

        Ok(CreationSlot(&self.creations_in_flight))
    }

    /// Stop a running lab
    pub async fn stop_lab(&self, id: LabId) -> Result<Lab> {
        // Reject before contacting the backend
        self.get_lab(id).await?.stopped()?;

        let reported = self.service.stop_lab(id).await.map_err(backend_error)?;

        let stopped = {
            let mut labs = self.labs.write().await;
            let current = labs.get(&id).ok_or(Error::LabNotFound(id))?;
            let stopped = current.stopped()?;
            labs.insert(id, stopped.clone());
            stopped
        };

        if reported.status != LabStatus::Stopped {
            warn!(
                "Backend reports lab {} as {} after stopping it",
                id, reported.status
            );
        }
        info!("Lab {} stopped", id);
        self.publish(LabUpdateKind::Stopped, &stopped);
        Ok(stopped)
    }

    /// Push the expiry of a running lab forward by `hours`
    pub async fn extend_lab(&self, id: LabId, hours: i64) -> Result<Lab> {
        extension_delta(hours)?;
        self.get_lab(id).await?.extended(hours)?;

        let reported = self
            .service
            .extend_lab(id, hours)
            .await
            .map_err(backend_error)?;

        let extended = {
            let mut labs = self.labs.write().await;
            let current = labs.get(&id).ok_or(Error::LabNotFound(id))?;
            let extended = current.extended(hours)?;
            labs.insert(id, extended.clone());
            extended
        };

        if reported.expires_at != extended.expires_at {
            debug!(
                "Backend reports expiry {} for lab {}, keeping {}",
                reported.expires_at, id, extended.expires_at
            );
        }
        info!("Lab {} extended by {}h until {}", id, hours, extended.expires_at);
        self.publish(LabUpdateKind::Extended, &extended);
        Ok(extended)
    }

    /// Remove a stopped or failed lab
    pub async fn delete_lab(&self, id: LabId) -> Result<Lab> {
        self.get_lab(id).await?.ensure_removable()?;

        match self.service.delete_lab(id).await {
            Ok(()) => {}
            // Already gone on the backend side
            Err(Error::LabNotFound(_)) => {
                debug!("Backend no longer knows lab {}", id);
            }
            Err(e) => return Err(backend_error(e)),
        }

        let removed = {
            let mut labs = self.labs.write().await;
            labs.get(&id)
                .ok_or(Error::LabNotFound(id))?
                .ensure_removable()?;
            labs.remove(&id).ok_or(Error::LabNotFound(id))?
        };

        info!("Lab {} deleted", id);
        self.publish(LabUpdateKind::Deleted, &removed);
        Ok(removed)
    }

    /// Apply a provisioning outcome.
    ///
    /// Status, access and VMs change under one write lock, so no reader sees
    /// a running lab without its access details.
    pub async fn apply_event(&self, event: ProvisionEvent) -> Result<Lab> {
        let id = event.lab_id();

        let (kind, next) = {
            let mut labs = self.labs.write().await;
            let current = labs.get(&id).ok_or(Error::LabNotFound(id))?;
            let (kind, next) = match event {
                ProvisionEvent::Ready { access, vms, .. } => {
                    (LabUpdateKind::Provisioned, current.provisioned(access, vms)?)
                }
                ProvisionEvent::Failed { reason, .. } => {
                    (LabUpdateKind::Failed, current.failed(reason)?)
                }
            };
            labs.insert(id, next.clone());
            (kind, next)
        };

        info!("Lab {} is now {}", id, next.status);
        self.publish(kind, &next);
        Ok(next)
    }

    /// Consume provisioning notifications until the backend closes its channel
    pub fn spawn_event_pump(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.service.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let id = event.lab_id();
                        match self.apply_event(event).await {
                            Ok(_) => {}
                            Err(Error::LabNotFound(_)) => {
                                warn!("Provisioning event for unknown lab {}, resynchronizing", id);
                                self.resync().await;
                            }
                            Err(e) => warn!("Rejected provisioning event for lab {}: {}", id, e),
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} provisioning events, resynchronizing", missed);
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        info!("Provisioning event channel closed");
                        break;
                    }
                }
            }
        })
    }

    async fn resync(&self) {
        if let Err(e) = self.list_labs().await {
            warn!("Resynchronization failed: {}", e);
        }
    }
}
