//! Server configuration

use serde::Deserialize;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Provisioning backend: "simulated" or "remote"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Base URL of the remote provisioning backend
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Request timeout towards the remote backend in seconds (0 = none)
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_secs: u64,

    /// How often the remote backend is polled for provisioning outcomes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Simulated provisioning time in seconds
    #[serde(default = "default_provision_delay")]
    pub provision_delay_secs: u64,

    /// Seed the simulated backend with demo labs
    #[serde(default = "default_seed_demo_labs")]
    pub seed_demo_labs: bool,

    /// VPN endpoint written into generated client profiles
    #[serde(default = "default_vpn_host")]
    pub vpn_host: String,

    /// Prefix for terminal/RDP launch URLs. Empty means same-origin paths.
    #[serde(default)]
    pub launch_base_url: String,

    /// Maximum number of creating or running labs
    #[serde(default = "default_max_active_labs")]
    pub max_active_labs: usize,

    /// Maximum number of VMs in one lab
    #[serde(default = "default_max_vms_per_lab")]
    pub max_vms_per_lab: usize,

    /// Log output: "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_backend() -> String {
    "simulated".to_string()
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000/api/v1".to_string()
}

fn default_backend_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    10
}

fn default_provision_delay() -> u64 {
    5
}

fn default_seed_demo_labs() -> bool {
    true
}

fn default_vpn_host() -> String {
    "vpn.labs.local".to_string()
}

fn default_max_active_labs() -> usize {
    3
}

fn default_max_vms_per_lab() -> usize {
    5
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Ok(val) = std::env::var("LABDESK_HTTP_HOST") {
            config.http_host = val;
        }
        if let Ok(val) = std::env::var("LABDESK_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http_port = port;
            }
        }
        if let Ok(val) = std::env::var("LABDESK_BACKEND") {
            config.backend = val;
        }
        if let Ok(val) = std::env::var("LABDESK_BACKEND_URL") {
            config.backend_url = val.trim_end_matches('/').to_string();
        }
        if let Ok(val) = std::env::var("LABDESK_BACKEND_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.backend_timeout_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("LABDESK_POLL_INTERVAL") {
            if let Ok(secs) = val.parse() {
                config.poll_interval_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("LABDESK_PROVISION_DELAY") {
            if let Ok(secs) = val.parse() {
                config.provision_delay_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("LABDESK_SEED_DEMO_LABS") {
            if let Ok(seed) = val.parse() {
                config.seed_demo_labs = seed;
            }
        }
        if let Ok(val) = std::env::var("LABDESK_VPN_HOST") {
            config.vpn_host = val;
        }
        if let Ok(val) = std::env::var("LABDESK_LAUNCH_BASE_URL") {
            config.launch_base_url = val.trim_end_matches('/').to_string();
        }
        if let Ok(val) = std::env::var("LABDESK_MAX_ACTIVE_LABS") {
            if let Ok(max) = val.parse() {
                config.max_active_labs = max;
            }
        }
        if let Ok(val) = std::env::var("LABDESK_MAX_VMS_PER_LAB") {
            if let Ok(max) = val.parse() {
                config.max_vms_per_lab = max;
            }
        }
        if let Ok(val) = std::env::var("LABDESK_LOG_FORMAT") {
            config.log_format = val;
        }

        if config.poll_interval_secs == 0 {
            anyhow::bail!("LABDESK_POLL_INTERVAL must be greater than zero");
        }

        Ok(config)
    }

    /// Whether the remote provisioning backend is selected
    pub fn uses_remote_backend(&self) -> bool {
        self.backend == "remote"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            backend: default_backend(),
            backend_url: default_backend_url(),
            backend_timeout_secs: default_backend_timeout(),
            poll_interval_secs: default_poll_interval(),
            provision_delay_secs: default_provision_delay(),
            seed_demo_labs: default_seed_demo_labs(),
            vpn_host: default_vpn_host(),
            launch_base_url: String::new(),
            max_active_labs: default_max_active_labs(),
            max_vms_per_lab: default_max_vms_per_lab(),
            log_format: default_log_format(),
        }
    }
}
