//! Lab domain model
//!
//! A lab moves through a small state machine:
//!
//! ```text
//! Creating --(provision success)--> Running --(stop)--> Stopped
//! Creating --(provision failure)--> Failed
//! ```
//!
//! Transitions never mutate in place. Each one returns the next value of the
//! record, so a caller either commits the whole new lab or keeps the old one.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::LaunchKind;
use crate::error::{Error, Result};

/// Lab identifier
pub type LabId = u64;

/// Lab status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabStatus {
    /// Lab is being provisioned
    #[serde(alias = "CREATING")]
    Creating,
    /// Lab is provisioned and reachable
    #[serde(alias = "RUNNING")]
    Running,
    /// Lab was stopped by the user
    #[serde(alias = "STOPPED")]
    Stopped,
    /// Provisioning failed
    #[serde(alias = "FAILED")]
    Failed,
}

impl LabStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabStatus::Creating => "creating",
            LabStatus::Running => "running",
            LabStatus::Stopped => "stopped",
            LabStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "creating" => Some(LabStatus::Creating),
            "running" => Some(LabStatus::Running),
            "stopped" => Some(LabStatus::Stopped),
            "failed" => Some(LabStatus::Failed),
            _ => None,
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, LabStatus::Stopped | LabStatus::Failed)
    }
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Virtual machine descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDescriptor {
    /// Display name, unique within a lab
    pub name: String,

    /// Operating system label
    pub os: String,

    /// Address inside the lab network
    pub ip: String,

    /// Whether a web terminal may be opened
    #[serde(default)]
    pub terminal_enabled: bool,

    /// Whether a remote desktop session may be opened
    #[serde(default)]
    pub rdp_enabled: bool,
}

impl VmDescriptor {
    pub fn supports(&self, kind: LaunchKind) -> bool {
        match kind {
            LaunchKind::Terminal => self.terminal_enabled,
            LaunchKind::Rdp => self.rdp_enabled,
        }
    }
}

/// Additional service exposed by a lab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomAccess {
    pub host: String,
    pub ports: Vec<u16>,
}

impl CustomAccess {
    fn validate(&self, name: &str) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidArgument(format!(
                "custom access '{}' has no host",
                name
            )));
        }
        if self.ports.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "custom access '{}' has no ports",
                name
            )));
        }
        if self.ports.contains(&0) {
            return Err(Error::InvalidArgument(format!(
                "custom access '{}' has port 0",
                name
            )));
        }
        Ok(())
    }
}

/// Connection details attached to a running lab
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessBundle {
    /// OpenVPN client profile
    #[serde(default)]
    pub vpn_config: String,

    /// Display name -> SSH command
    #[serde(default)]
    pub ssh_commands: BTreeMap<String, String>,

    /// Display name -> `host:port` RDP address
    #[serde(default)]
    pub rdp_commands: BTreeMap<String, String>,

    /// Display name -> extra host/ports
    #[serde(default)]
    pub custom_access: BTreeMap<String, CustomAccess>,
}

impl AccessBundle {
    pub fn validate(&self) -> Result<()> {
        for (name, access) in &self.custom_access {
            access.validate(name)?;
        }
        Ok(())
    }
}

/// Lab entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lab {
    /// Unique identifier
    pub id: LabId,

    /// Display name
    pub name: String,

    /// Current status
    pub status: LabStatus,

    /// When the lab is due to expire
    pub expires_at: DateTime<Utc>,

    /// Connection details, only present while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessBundle>,

    /// Virtual machines, in display order
    #[serde(default)]
    pub vms: Vec<VmDescriptor>,

    /// Reason reported by the provisioning backend (if status is Failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Lab {
    /// Create a new lab awaiting provisioning
    pub fn new(id: LabId, name: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            status: LabStatus::Creating,
            expires_at,
            access: None,
            vms: Vec::new(),
            failure_reason: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == LabStatus::Running
    }

    /// Creating or running labs count against the per-user limit
    pub fn is_active(&self) -> bool {
        matches!(self.status, LabStatus::Creating | LabStatus::Running)
    }

    /// Informational only, nothing stops a lab when it expires
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Look up a VM by display name
    pub fn vm(&self, name: &str) -> Option<&VmDescriptor> {
        self.vms.iter().find(|vm| vm.name == name)
    }

    /// Check a record received from the provisioning backend
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidArgument(format!("lab {} has no name", self.id)));
        }

        match (&self.access, self.status) {
            (Some(_), status) if status != LabStatus::Running => {
                return Err(Error::InvalidArgument(format!(
                    "lab {} carries access details while {}",
                    self.id, status
                )));
            }
            (Some(access), _) => access.validate()?,
            (None, LabStatus::Running) => {
                return Err(Error::InvalidArgument(format!(
                    "lab {} is running without access details",
                    self.id
                )));
            }
            (None, _) => {}
        }

        let mut names = HashSet::new();
        for vm in &self.vms {
            if !names.insert(vm.name.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "lab {} has duplicate VM name '{}'",
                    self.id, vm.name
                )));
            }
        }

        Ok(())
    }

    fn require_status(&self, expected: LabStatus) -> Result<()> {
        if self.status != expected {
            return Err(Error::invalid_state(expected.as_str(), self.status.as_str()));
        }
        Ok(())
    }

    /// Only stopped or failed labs may be removed
    pub fn ensure_removable(&self) -> Result<()> {
        if !self.status.is_terminal() {
            return Err(Error::invalid_state("stopped or failed", self.status.as_str()));
        }
        Ok(())
    }

    /// Running -> Stopped
    pub fn stopped(&self) -> Result<Lab> {
        self.require_status(LabStatus::Running)?;

        Ok(Lab {
            status: LabStatus::Stopped,
            access: None,
            ..self.clone()
        })
    }

    /// Push the expiry of a running lab forward by `hours`
    pub fn extended(&self, hours: i64) -> Result<Lab> {
        let delta = extension_delta(hours)?;
        self.require_status(LabStatus::Running)?;

        let expires_at = self
            .expires_at
            .checked_add_signed(delta)
            .ok_or_else(|| Error::InvalidArgument(format!("cannot extend by {} hours", hours)))?;

        Ok(Lab {
            expires_at,
            ..self.clone()
        })
    }

    /// Creating -> Running, attaching access and VMs together.
    ///
    /// An empty `vms` keeps the VMs the lab was created with.
    pub fn provisioned(&self, access: AccessBundle, vms: Vec<VmDescriptor>) -> Result<Lab> {
        self.require_status(LabStatus::Creating)?;

        if access.vpn_config.trim().is_empty() {
            return Err(Error::InvalidArgument(format!(
                "lab {} provisioned without a VPN profile",
                self.id
            )));
        }

        let next = Lab {
            status: LabStatus::Running,
            access: Some(access),
            vms: if vms.is_empty() { self.vms.clone() } else { vms },
            ..self.clone()
        };
        next.validate()?;
        Ok(next)
    }

    /// Creating -> Failed
    pub fn failed(&self, reason: String) -> Result<Lab> {
        self.require_status(LabStatus::Creating)?;

        Ok(Lab {
            status: LabStatus::Failed,
            access: None,
            failure_reason: Some(reason),
            ..self.clone()
        })
    }
}

/// Validate an extension request, returning the duration to add
pub fn extension_delta(hours: i64) -> Result<TimeDelta> {
    if hours <= 0 {
        return Err(Error::InvalidArgument(format!(
            "hours must be a positive integer, got {}",
            hours
        )));
    }
    TimeDelta::try_hours(hours)
        .ok_or_else(|| Error::InvalidArgument(format!("cannot extend by {} hours", hours)))
}

/// Requested machine, before the backend has assigned it an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    pub name: String,
    pub os: String,
    #[serde(default)]
    pub terminal_enabled: bool,
    #[serde(default)]
    pub rdp_enabled: bool,
}

impl VmSpec {
    pub fn into_descriptor(self, ip: String) -> VmDescriptor {
        VmDescriptor {
            name: self.name,
            os: self.os,
            ip,
            terminal_enabled: self.terminal_enabled,
            rdp_enabled: self.rdp_enabled,
        }
    }
}

/// Parameters for creating a lab
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLabParams {
    /// Display name
    pub name: String,

    /// Lifetime in hours
    pub duration_hours: i64,

    /// Machines to provision
    #[serde(default)]
    pub vms: Vec<VmSpec>,
}

impl CreateLabParams {
    /// Reject requests the backend should never see
    pub fn validate(&self, max_vms: usize) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidArgument("lab name must not be empty".to_string()));
        }
        extension_delta(self.duration_hours).map_err(|_| {
            Error::InvalidArgument(format!(
                "duration_hours must be a positive integer, got {}",
                self.duration_hours
            ))
        })?;
        if self.vms.is_empty() || self.vms.len() > max_vms {
            return Err(Error::InvalidArgument(format!(
                "a lab needs between 1 and {} VMs, got {}",
                max_vms,
                self.vms.len()
            )));
        }

        let mut names = HashSet::new();
        for vm in &self.vms {
            if vm.name.trim().is_empty() {
                return Err(Error::InvalidArgument("VM name must not be empty".to_string()));
            }
            if !names.insert(vm.name.as_str()) {
                return Err(Error::InvalidArgument(format!("duplicate VM name '{}'", vm.name)));
            }
        }
        Ok(())
    }
}
