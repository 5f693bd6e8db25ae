//! In-memory provisioning backend
//!
//! Stands in for the real provisioning service. Labs are provisioned after a
//! fixed delay, and the outcome is published on the same event channel a real
//! backend would use.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::domain::lab::{
    extension_delta, AccessBundle, CreateLabParams, CustomAccess, Lab, LabId, LabStatus,
    VmDescriptor,
};
use crate::domain::types::ProvisionEvent;
use crate::error::{Error, Result};
use crate::infra::lab_service::{LabService, EVENT_CHANNEL_CAPACITY};
use crate::Config;

/// State shared with the provisioning timers
struct Shared {
    labs: RwLock<BTreeMap<LabId, Lab>>,
    events: broadcast::Sender<ProvisionEvent>,
    vpn_host: String,
}

/// Simulated provisioning backend
pub struct SimulatedLabService {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    /// `None` leaves provisioning to explicit `complete_provisioning` calls
    provision_delay: Option<Duration>,
}

impl SimulatedLabService {
    /// Create an empty backend
    pub fn new(provision_delay: Option<Duration>, vpn_host: String) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                labs: RwLock::new(BTreeMap::new()),
                events,
                vpn_host,
            }),
            next_id: AtomicU64::new(1),
            provision_delay,
        }
    }

    /// Create a backend from the server configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Some(Duration::from_secs(config.provision_delay_secs)),
            config.vpn_host.clone(),
        )
    }

    /// Insert the two demo labs: one running, one still being provisioned
    pub async fn seed_demo_labs(&self) {
        let now = Utc::now();

        let mut web = Lab::new(
            1,
            "Web Application Security Lab".to_string(),
            now + TimeDelta::hours(1),
        );
        web.vms = vec![
            vm("Kali Linux Attack Box", "Kali Linux 2023.3", "10.0.0.100", true, true),
            vm("Vulnerable Web Server", "Ubuntu 22.04", "10.0.0.10", true, false),
            vm("Windows Target", "Windows Server 2019", "10.0.0.20", true, true),
        ];
        let mut access = self.shared.access_for(&web);
        access.custom_access.insert(
            "Vulnerable Web Server".to_string(),
            CustomAccess {
                host: "10.0.0.10".to_string(),
                ports: vec![80, 443],
            },
        );
        web.status = LabStatus::Running;
        web.access = Some(access);

        let mut network = Lab::new(
            2,
            "Network Security Lab".to_string(),
            now + TimeDelta::hours(2),
        );
        network.vms = vec![
            vm("Kali Linux Attack Box", "Kali Linux 2023.3", "10.0.1.100", true, true),
            vm("Target Network Router", "VyOS 1.4", "10.0.1.1", true, false),
            vm("Internal Windows Server", "Windows Server 2022", "172.16.0.10", true, true),
        ];

        let mut labs = self.shared.labs.write().await;
        labs.insert(web.id, web);
        labs.insert(network.id, network);
        self.next_id.fetch_max(3, Ordering::SeqCst);
        info!("Seeded {} demo labs", labs.len());
    }

    /// Schedule provisioning for every lab that is still creating
    pub async fn start(&self) {
        let pending: Vec<LabId> = self
            .shared
            .labs
            .read()
            .await
            .values()
            .filter(|lab| lab.status == LabStatus::Creating)
            .map(|lab| lab.id)
            .collect();

        for id in pending {
            self.schedule_provisioning(id);
        }
    }

    fn schedule_provisioning(&self, id: LabId) {
        let Some(delay) = self.provision_delay else {
            return;
        };

        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = shared.complete_provisioning(id).await {
                warn!("Simulated provisioning of lab {} did not complete: {}", id, e);
            }
        });
        debug!("Lab {} will be provisioned in {:?}", id, delay);
    }

    /// Finish provisioning a lab now
    pub async fn complete_provisioning(&self, id: LabId) -> Result<Lab> {
        self.shared.complete_provisioning(id).await
    }

    /// Report a provisioning failure for a lab now
    pub async fn fail_provisioning(&self, id: LabId, reason: &str) -> Result<Lab> {
        self.shared.fail_provisioning(id, reason.to_string()).await
    }
}

impl Shared {
    async fn complete_provisioning(&self, id: LabId) -> Result<Lab> {
        let lab = {
            let labs = self.labs.read().await;
            labs.get(&id).cloned().ok_or(Error::LabNotFound(id))?
        };

        if lab.vms.is_empty() {
            return self
                .fail_provisioning(id, "lab has no virtual machines".to_string())
                .await;
        }

        let access = self.access_for(&lab);
        let running = {
            let mut labs = self.labs.write().await;
            let current = labs.get(&id).ok_or(Error::LabNotFound(id))?;
            let running = current.provisioned(access.clone(), current.vms.clone())?;
            labs.insert(id, running.clone());
            running
        };

        info!("Lab {} provisioned", id);
        // No receiver is not an error: nothing may be listening yet
        let _ = self.events.send(ProvisionEvent::Ready {
            lab_id: id,
            access,
            vms: running.vms.clone(),
        });
        Ok(running)
    }

    async fn fail_provisioning(&self, id: LabId, reason: String) -> Result<Lab> {
        let failed = {
            let mut labs = self.labs.write().await;
            let current = labs.get(&id).ok_or(Error::LabNotFound(id))?;
            let failed = current.failed(reason.clone())?;
            labs.insert(id, failed.clone());
            failed
        };

        warn!("Lab {} failed to provision: {}", id, reason);
        let _ = self.events.send(ProvisionEvent::Failed { lab_id: id, reason });
        Ok(failed)
    }

    /// Credentials a lab gets once its VMs are up
    fn access_for(&self, lab: &Lab) -> AccessBundle {
        let vpn_config = format!(
            "client\n\
             dev tun\n\
             proto udp\n\
             remote {} 1194\n\
             resolv-retry infinite\n\
             nobind\n\
             persist-key\n\
             persist-tun\n\
             remote-cert-tls server\n\
             cipher AES-256-GCM\n\
             verb 3\n\
             # lab {}\n",
            self.vpn_host, lab.id
        );

        let ssh_commands = lab
            .vms
            .iter()
            .filter(|vm| vm.terminal_enabled)
            .map(|vm| (vm.name.clone(), format!("ssh -i lab_key.pem user@{}", vm.ip)))
            .collect();

        let rdp_commands = lab
            .vms
            .iter()
            .filter(|vm| vm.rdp_enabled)
            .map(|vm| (vm.name.clone(), format!("{}:3389", vm.ip)))
            .collect();

        AccessBundle {
            vpn_config,
            ssh_commands,
            rdp_commands,
            custom_access: BTreeMap::new(),
        }
    }
}

fn vm(name: &str, os: &str, ip: &str, terminal: bool, rdp: bool) -> VmDescriptor {
    VmDescriptor {
        name: name.to_string(),
        os: os.to_string(),
        ip: ip.to_string(),
        terminal_enabled: terminal,
        rdp_enabled: rdp,
    }
}

#[async_trait]
impl LabService for SimulatedLabService {
    async fn list_labs(&self) -> Result<Vec<Lab>> {
        Ok(self.shared.labs.read().await.values().cloned().collect())
    }

    async fn create_lab(&self, params: CreateLabParams) -> Result<Lab> {
        let duration = extension_delta(params.duration_hours)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let subnet = id % 250 + 1;

        let mut lab = Lab::new(id, params.name, Utc::now() + duration);
        lab.vms = params
            .vms
            .into_iter()
            .enumerate()
            .map(|(i, spec)| spec.into_descriptor(format!("10.{}.0.{}", subnet, 10 + i)))
            .collect();

        self.shared.labs.write().await.insert(id, lab.clone());
        info!("Lab {} created with {} VMs", id, lab.vms.len());

        self.schedule_provisioning(id);
        Ok(lab)
    }

    async fn stop_lab(&self, id: LabId) -> Result<Lab> {
        let mut labs = self.shared.labs.write().await;
        let current = labs.get(&id).ok_or(Error::LabNotFound(id))?;
        let stopped = current.stopped()?;
        labs.insert(id, stopped.clone());
        Ok(stopped)
    }

    async fn extend_lab(&self, id: LabId, hours: i64) -> Result<Lab> {
        let mut labs = self.shared.labs.write().await;
        let current = labs.get(&id).ok_or(Error::LabNotFound(id))?;
        let extended = current.extended(hours)?;
        labs.insert(id, extended.clone());
        Ok(extended)
    }

    async fn delete_lab(&self, id: LabId) -> Result<()> {
        let mut labs = self.shared.labs.write().await;
        labs.get(&id)
            .ok_or(Error::LabNotFound(id))?
            .ensure_removable()?;
        labs.remove(&id);
        info!("Lab {} deleted", id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProvisionEvent> {
        self.shared.events.subscribe()
    }
}
