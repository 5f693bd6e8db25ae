//! Provisioning backend contract

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::lab::{CreateLabParams, Lab, LabId};
use crate::domain::types::ProvisionEvent;
use crate::error::Result;

/// Capacity of the provisioning event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The external service that creates VMs and issues credentials.
///
/// Labs leave `Creating` asynchronously; implementations announce that on the
/// channel returned by [`LabService::subscribe`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabService: Send + Sync {
    /// List the labs of the current user
    async fn list_labs(&self) -> Result<Vec<Lab>>;

    /// Request a new lab, returned in `Creating`
    async fn create_lab(&self, params: CreateLabParams) -> Result<Lab>;

    /// Stop a running lab
    async fn stop_lab(&self, id: LabId) -> Result<Lab>;

    /// Push the expiry of a running lab forward
    async fn extend_lab(&self, id: LabId, hours: i64) -> Result<Lab>;

    /// Remove a stopped or failed lab
    async fn delete_lab(&self, id: LabId) -> Result<()>;

    /// Subscribe to provisioning outcomes
    fn subscribe(&self) -> broadcast::Receiver<ProvisionEvent>;
}
