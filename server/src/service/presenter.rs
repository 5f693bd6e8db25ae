//! Read-only views of a lab's access details
//!
//! Both views are pure functions of a `Lab` value. Missing access details or
//! an empty VM list render as empty views.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::lab::{Lab, LabId};
use crate::domain::types::LaunchKind;
use crate::error::{Error, Result};

/// Download file name of a lab's VPN profile
pub fn vpn_filename(id: LabId) -> String {
    format!("lab_{}.ovpn", id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VpnView {
    pub filename: String,
    pub config: String,
}

/// One copyable credential line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialView {
    pub vm: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomAccessView {
    pub name: String,
    pub host: String,
    pub ports: Vec<u16>,
}

/// VPN, SSH, RDP and custom credentials of a lab
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessView {
    pub lab_id: LabId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpn: Option<VpnView>,
    pub ssh: Vec<CredentialView>,
    pub rdp: Vec<CredentialView>,
    pub custom: Vec<CustomAccessView>,
}

impl AccessView {
    /// `None` when the lab carries no access details
    pub fn from_lab(lab: &Lab) -> Option<Self> {
        let access = lab.access.as_ref()?;

        let vpn = (!access.vpn_config.trim().is_empty()).then(|| VpnView {
            filename: vpn_filename(lab.id),
            config: access.vpn_config.clone(),
        });

        let credentials = |map: &BTreeMap<String, String>| -> Vec<CredentialView> {
            map.iter()
                .map(|(vm, command)| CredentialView {
                    vm: vm.clone(),
                    command: command.clone(),
                })
                .collect()
        };

        Some(Self {
            lab_id: lab.id,
            vpn,
            ssh: credentials(&access.ssh_commands),
            rdp: credentials(&access.rdp_commands),
            custom: access
                .custom_access
                .iter()
                .map(|(name, custom)| CustomAccessView {
                    name: name.clone(),
                    host: custom.host.clone(),
                    ports: custom.ports.clone(),
                })
                .collect(),
        })
    }
}

/// A VM that can be opened in a browser tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchTarget {
    pub vm: String,
    pub os: String,
    pub ip: String,
    /// Absent while the lab is not running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Terminal and remote desktop launch actions of a lab
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmAccessView {
    pub lab_id: LabId,
    pub terminal: Vec<LaunchTarget>,
    pub rdp: Vec<LaunchTarget>,
}

impl VmAccessView {
    pub fn from_lab(lab: &Lab, launch_base: &str) -> Self {
        let targets = |kind: LaunchKind| -> Vec<LaunchTarget> {
            lab.vms
                .iter()
                .filter(|vm| vm.supports(kind))
                .map(|vm| LaunchTarget {
                    vm: vm.name.clone(),
                    os: vm.os.clone(),
                    ip: vm.ip.clone(),
                    url: launch_url(lab, &vm.name, kind, launch_base).ok(),
                })
                .collect()
        };

        Self {
            lab_id: lab.id,
            terminal: targets(LaunchKind::Terminal),
            rdp: targets(LaunchKind::Rdp),
        }
    }
}

/// URL opening a terminal or remote desktop session on one VM
pub fn launch_url(lab: &Lab, vm_name: &str, kind: LaunchKind, launch_base: &str) -> Result<String> {
    let vm = lab
        .vm(vm_name)
        .ok_or_else(|| Error::VmNotFound(vm_name.to_string()))?;

    if !vm.supports(kind) {
        return Err(Error::CapabilityDisabled {
            vm: vm.name.clone(),
            capability: kind.label().to_string(),
        });
    }
    if !lab.is_running() {
        return Err(Error::invalid_state("running", lab.status.as_str()));
    }

    Ok(format!(
        "{}/{}/{}/{}",
        launch_base.trim_end_matches('/'),
        kind.path_segment(),
        lab.id,
        urlencoding::encode(&vm.name)
    ))
}
