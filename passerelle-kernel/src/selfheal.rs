/**
 * SELF-HEAL - Historique des reboots et seuils de surveillance du device
 *
 * RÔLE :
 * Lit le sous-arbre `X_TINNO-COM_SelfHeal.` en une seule requête et en extrait
 * l'historique des reboots (entrées indexées 1..N) et les seuils moyens
 * CPU / mémoire / température. Lecture seule : la configuration passe par
 * `POST /api/configure`.
 */

use crate::error::GatewayResult;
use crate::params::{self, ParameterMap};
use crate::transport::DeviceSession;
use serde::Serialize;

pub const SELFHEAL_ROOT: &str = "X_TINNO-COM_SelfHeal";

pub const DEFAULT_TEMPERATURE_THRESHOLD: i64 = 120;
const NO_HISTORY: &str = "No History";
const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebootEntry {
    pub reason: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfHealSnapshot {
    pub params: ParameterMap,
    pub reboots: Vec<RebootEntry>,
    pub last_reboot_reason: String,
    pub last_reboot_time: String,
    pub reboot_count: u32,
    pub avg_cpu_threshold: i64,
    pub avg_memory_threshold: i64,
    pub avg_temperature_threshold: i64,
}

fn key(suffix: &str) -> String {
    format!("{SELFHEAL_ROOT}.{suffix}")
}

pub fn snapshot_from_params(params: ParameterMap) -> SelfHealSnapshot {
    let reboot_count = params::get_count(&params, &key("RebootNumberOfEntries"));

    let reboots: Vec<RebootEntry> = (1..=reboot_count)
        .map(|i| RebootEntry {
            reason: params::get_str(&params, &key(&format!("Reboot.{i}.Reason")))
                .unwrap_or(NOT_AVAILABLE)
                .to_string(),
            time: params::get_str(&params, &key(&format!("Reboot.{i}.Time")))
                .unwrap_or(NOT_AVAILABLE)
                .to_string(),
        })
        .collect();

    let last = reboots.last().cloned().unwrap_or(RebootEntry {
        reason: NO_HISTORY.into(),
        time: NO_HISTORY.into(),
    });

    SelfHealSnapshot {
        avg_cpu_threshold: params::get_i64(&params, &key("AvgCPUThreshold"), 0),
        avg_memory_threshold: params::get_i64(&params, &key("AvgMemoryThreshold"), 0),
        avg_temperature_threshold: params::get_i64(
            &params,
            &key("AvgTemperatureThreshold"),
            DEFAULT_TEMPERATURE_THRESHOLD,
        ),
        last_reboot_reason: last.reason,
        last_reboot_time: last.time,
        reboot_count,
        reboots,
        params,
    }
}

pub async fn build_snapshot(session: &DeviceSession<'_>) -> GatewayResult<SelfHealSnapshot> {
    let params = session.query(&format!("{SELFHEAL_ROOT}.?")).await?;
    Ok(snapshot_from_params(params))
}
