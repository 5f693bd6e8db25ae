//! Common domain types

use serde::{Deserialize, Serialize};

use crate::domain::lab::{AccessBundle, Lab, LabId, VmDescriptor};

/// Notification from the provisioning backend about a lab leaving `Creating`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProvisionEvent {
    Ready {
        lab_id: LabId,
        access: AccessBundle,
        #[serde(default)]
        vms: Vec<VmDescriptor>,
    },
    Failed {
        lab_id: LabId,
        reason: String,
    },
}

impl ProvisionEvent {
    pub fn lab_id(&self) -> LabId {
        match self {
            ProvisionEvent::Ready { lab_id, .. } | ProvisionEvent::Failed { lab_id, .. } => *lab_id,
        }
    }
}

/// What happened to a lab in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabUpdateKind {
    Listed,
    Created,
    Provisioned,
    Failed,
    Stopped,
    Extended,
    Deleted,
}

/// Change feed entry published by the store
#[derive(Debug, Clone, Serialize)]
pub struct LabUpdate {
    pub kind: LabUpdateKind,
    pub lab: Lab,
}

/// Remote access flavour offered for a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchKind {
    Terminal,
    Rdp,
}

impl LaunchKind {
    /// Path segment of the launch URL
    pub fn path_segment(&self) -> &'static str {
        match self {
            LaunchKind::Terminal => "terminal",
            LaunchKind::Rdp => "rdp",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LaunchKind::Terminal => "Terminal",
            LaunchKind::Rdp => "RDP",
        }
    }
}
