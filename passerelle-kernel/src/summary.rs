/**
 * RÉSUMÉ DEVICE - Informations de base + alimentation de la télémétrie
 *
 * RÔLE :
 * Interroge la passerelle (hostname, uptime, CPU, mémoire, réseau, firmware,
 * modèle) et enregistre un point CPU / mémoire / température à chaque appel.
 *
 * FONCTIONNEMENT :
 * - Commandes shell exécutées l'une après l'autre sur la même session
 * - Valeur vide → "N/A" dans la réponse, mesure illisible → 0 dans la série
 * - Poller optionnel : même collecte à intervalle fixe, sans appelant HTTP
 */

use crate::error::GatewayResult;
use crate::params::parse_measurement;
use crate::state::AppState;
use crate::telemetry::{Series, TelemetryStore};
use crate::transport::DeviceSession;
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const HOSTNAME: &str = "cat /proc/sys/kernel/hostname";
const UPTIME: &str = r#"uptime -p || uptime | cut -d"," -f1 | cut -d" " -f3-"#;
const CPU_USAGE: &str = r#"awk '/^cpu / {usage=($2+$4)*100/($2+$4+$5); printf "%.1f%%\n", usage}' /proc/stat"#;
const MEMORY_USAGE: &str = r#"free | awk '/Mem:/ {print int($3*100/$2) "%"}'"#;
const IP_ADDRESS: &str = "ip route get 8.8.8.8 | awk '{print $7; exit}'";
const MAC_ADDRESS: &str = "cat /sys/class/net/$(ip route show default | awk '/default/ {print $5}')/address";
const DEFAULT_GATEWAY: &str = "ip route | grep default | awk '{print $3}' | head -1";
const DNS_SERVERS: &str = r#"grep nameserver /etc/resolv.conf | awk '{print $2}' | tr '\n' ',' | sed 's/,$//'"#;
const FIRMWARE_VERSION: &str = r#"grep DISTRIB_RELEASE /etc/openwrt_release | cut -d"'" -f2 || uname -r"#;
const DEVICE_MODEL: &str = "cat /proc/device-tree/model";
const MANUFACTURER: &str = r#"cat /proc/device-tree/compatible | cut -d, -f1 || echo "Unknown""#;
const TEMPERATURE: &str = "cat /sys/class/thermal/thermal_zone0/temp || echo 0";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub hostname: String,
    pub uptime: String,
    pub cpu_usage: String,
    pub memory_usage: String,
    pub ip_address: String,
    pub mac_address: String,
    pub default_gateway: String,
    pub dns_servers: String,
    pub firmware_version: String,
    pub device_model: String,
    pub manufacturer: String,
}

fn or_na(value: String) -> String {
    // /proc/device-tree/* se termine par un NUL
    let cleaned = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if cleaned.is_empty() {
        "N/A".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Millidegrés (`/sys/class/thermal`) → degrés
pub fn temperature_celsius(raw: &str) -> f64 {
    raw.trim()
        .lines()
        .next()
        .and_then(|l| l.trim().parse::<i64>().ok())
        .map(|milli| milli as f64 / 1000.0)
        .unwrap_or(0.0)
}

pub async fn collect(session: &DeviceSession<'_>, telemetry: &TelemetryStore) -> GatewayResult<DeviceSummary> {
    let summary = DeviceSummary {
        hostname: or_na(session.run(HOSTNAME).await?),
        uptime: or_na(session.run(UPTIME).await?),
        cpu_usage: or_na(session.run(CPU_USAGE).await?),
        memory_usage: or_na(session.run(MEMORY_USAGE).await?),
        ip_address: or_na(session.run(IP_ADDRESS).await?),
        mac_address: or_na(session.run(MAC_ADDRESS).await?),
        default_gateway: or_na(session.run(DEFAULT_GATEWAY).await?),
        dns_servers: or_na(session.run(DNS_SERVERS).await?),
        firmware_version: or_na(session.run(FIRMWARE_VERSION).await?),
        device_model: or_na(session.run(DEVICE_MODEL).await?),
        manufacturer: or_na(session.run(MANUFACTURER).await?),
    };
    let temperature = temperature_celsius(&session.run(TEMPERATURE).await?);

    let now = OffsetDateTime::now_utc();
    telemetry.record(Series::Cpu, parse_measurement(&summary.cpu_usage), now).await;
    telemetry.record(Series::Memory, parse_measurement(&summary.memory_usage), now).await;
    telemetry.record(Series::Temperature, temperature, now).await;

    debug!("summary collected from {}", session.profile().host);
    Ok(summary)
}

/// Rafraîchit le résumé (et donc la télémétrie) toutes les `interval_secs`
pub fn spawn_summary_poller(state: AppState, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }
    info!("starting summary poller (every {}s)", interval_secs);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let session = state.session();
            if let Err(e) = collect(&session, &state.telemetry).await {
                warn!("summary poll failed: {}", e);
            }
        }
    });
}
