use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf};
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    pub ssh: ConnectionProfile,
    pub lcm: LcmConf,
    pub telemetry: TelemetryConf,
}

/// Cible SSH courante. Valeur unique, détenue par l'état applicatif et
/// passée explicitement au transport à chaque appel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Utilisé via `sshpass` si présent, sinon clé/agent
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LcmConf {
    pub execution_env: String,
    pub required_uids: u32,
    pub bind_source: String,
    pub bind_destination: String,
    /// Commande envoyée après install/uninstall ; le device renumérote ses collections
    pub restart_command: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TelemetryConf {
    /// 0 = pas de polling en tâche de fond
    pub poll_interval_secs: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5000)),
            data_dir: PathBuf::from("./data"),
            ssh: ConnectionProfile::default(),
            lcm: LcmConf::default(),
            telemetry: TelemetryConf::default(),
        }
    }
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self {
            host: "192.168.246.160".into(),
            port: 22,
            username: "root".into(),
            password: None,
            identity_file: None,
            connect_timeout_secs: 10,
            command_timeout_secs: 30,
        }
    }
}

impl Default for LcmConf {
    fn default() -> Self {
        Self {
            execution_env: "generic".into(),
            required_uids: 1,
            bind_source: "/var/run/ubus".into(),
            bind_destination: "/var/run/ubus".into(),
            restart_command: "reboot".into(),
        }
    }
}

impl ConnectionProfile {
    pub fn with_host(&self, host: &str) -> Self {
        Self { host: host.to_string(), ..self.clone() }
    }

    /// Variables historiques du backend : SSH_HOST, SSH_PORT, SSH_USERNAME, SSH_PASSWORD
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("SSH_HOST").filter(|h| !h.trim().is_empty()) {
            self.host = host;
        }
        if let Some(port) = lookup("SSH_PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        if let Some(user) = lookup("SSH_USERNAME").filter(|u| !u.trim().is_empty()) {
            self.username = user;
        }
        if let Some(password) = lookup("SSH_PASSWORD") {
            self.password = Some(password);
        }
    }
}

pub fn parse_config(txt: &str) -> KernelConfig {
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        tracing::warn!("invalid config, using defaults: {e}");
        KernelConfig::default()
    })
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("PASSERELLE_CONFIG").unwrap_or_else(|_| "passerelle.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        tracing::info!("no {path}, using default config");
        KernelConfig::default()
    };
    cfg.ssh.apply_env(|key| std::env::var(key).ok());
    cfg
}
