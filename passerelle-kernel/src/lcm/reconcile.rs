//! Fusion DeploymentUnit / ExecutionUnit
//!
//! Deux passes : les DeploymentUnit créent les fiches (métadonnées), puis les
//! ExecutionUnit complètent le runtime et fixent `unit_index`. Une unité peut
//! n'exister que d'un côté (déployée mais pas lancée, ou lancée sans métadonnées).

use super::FreshnessToken;
use crate::error::GatewayResult;
use crate::params::{self, ParameterMap};
use crate::transport::DeviceSession;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

pub const SOFTWARE_MODULES: &str = "SoftwareModules";

/// Ordre de priorité des clés d'identité : le firmware expose l'une ou l'autre selon l'unité
pub const IDENTITY_SUFFIXES: [&str; 3] = [".DUID", ".EUID", ".UUID"];

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareModuleRecord {
    pub duid: String,
    pub uuid: String,
    pub name: String,
    pub url: String,
    pub description: String,
    pub vendor: String,
    pub version: String,
    pub alias: String,
    pub installed_at: String,
    pub last_update: String,
    pub execution_status: String,
    pub deployment_status: String,
    /// Position 1-based dans la collection ExecutionUnit courante
    pub unit_index: Option<usize>,
    /// Position 1-based dans la collection DeploymentUnit courante
    pub deployment_index: Option<usize>,
}

impl SoftwareModuleRecord {
    pub fn is_active(&self) -> bool {
        self.execution_status == "Active"
    }
}

/// Résultat d'une réconciliation complète
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInventory {
    pub software_modules: ParameterMap,
    pub deployment_units: Vec<ParameterMap>,
    pub execution_units: Vec<ParameterMap>,
    pub modules: Vec<SoftwareModuleRecord>,
    #[serde(skip)]
    pub installed_identifiers: BTreeSet<String>,
    pub total_containers: u32,
    pub active_containers: usize,
    pub freshness: FreshnessToken,
}

pub fn identity_of(unit: &ParameterMap) -> Option<&str> {
    params::first_suffixed(unit, &IDENTITY_SUFFIXES).filter(|v| !v.is_empty())
}

/// Champ direct de l'unité (`<prefix>.<Name>`), sinon première clé finissant par `.<Name>`
fn field(unit: &ParameterMap, prefix: &str, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        params::get_str(unit, &format!("{prefix}.{name}"))
            .or_else(|| params::find_suffix(unit, &format!(".{name}")).map(|(_, v)| v))
            .map(str::to_string)
    })
}

fn or_na(value: Option<String>) -> String {
    value.unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

pub fn merge_units(deployment_units: &[ParameterMap], execution_units: &[ParameterMap]) -> Vec<SoftwareModuleRecord> {
    let mut records: Vec<SoftwareModuleRecord> = Vec::new();
    let mut by_identity: HashMap<String, usize> = HashMap::new();

    for (pos, unit) in deployment_units.iter().enumerate() {
        let i = pos + 1;
        let prefix = format!("{SOFTWARE_MODULES}.DeploymentUnit.{i}");
        let Some(identity) = identity_of(unit) else {
            warn!("deployment unit {i} exposes no DUID/EUID/UUID, dropped from view");
            continue;
        };
        if by_identity.contains_key(identity) {
            debug!("deployment unit {i} repeats identity {identity}, ignored");
            continue;
        }
        by_identity.insert(identity.to_string(), records.len());
        records.push(SoftwareModuleRecord {
            duid: identity.to_string(),
            uuid: or_na(field(unit, &prefix, &["UUID"])),
            name: or_na(field(unit, &prefix, &["Name"])),
            url: or_na(field(unit, &prefix, &["URL"])),
            description: or_na(field(unit, &prefix, &["Description"])),
            vendor: or_na(field(unit, &prefix, &["Vendor"])),
            version: or_na(field(unit, &prefix, &["Version"])),
            alias: or_na(field(unit, &prefix, &["Alias"])),
            installed_at: or_na(field(unit, &prefix, &["Installed", "CreationTime"])),
            last_update: or_na(field(unit, &prefix, &["LastUpdate"])),
            execution_status: NOT_AVAILABLE.into(),
            deployment_status: or_na(field(unit, &prefix, &["Status"])),
            unit_index: None,
            deployment_index: Some(i),
        });
    }

    for (pos, unit) in execution_units.iter().enumerate() {
        let j = pos + 1;
        let prefix = format!("{SOFTWARE_MODULES}.ExecutionUnit.{j}");
        let Some(identity) = identity_of(unit) else {
            warn!("execution unit {j} exposes no DUID/EUID/UUID, dropped from view");
            continue;
        };
        let status = or_na(field(unit, &prefix, &["Status"]));

        match by_identity.get(identity) {
            Some(&slot) => {
                let record = &mut records[slot];
                if record.unit_index.is_some() {
                    debug!("execution unit {j} repeats identity {identity}, ignored");
                    continue;
                }
                record.execution_status = status;
                if let Some(alias) = field(unit, &prefix, &["Alias"]) {
                    record.alias = alias;
                }
                if let Some(last_update) = field(unit, &prefix, &["LastUpdate"]) {
                    record.last_update = last_update;
                }
                record.unit_index = Some(j);
            }
            None => {
                by_identity.insert(identity.to_string(), records.len());
                records.push(SoftwareModuleRecord {
                    duid: identity.to_string(),
                    uuid: or_na(field(unit, &prefix, &["UUID"])),
                    name: or_na(field(unit, &prefix, &["Name"])),
                    url: NOT_AVAILABLE.into(),
                    description: NOT_AVAILABLE.into(),
                    vendor: or_na(field(unit, &prefix, &["Vendor"])),
                    version: or_na(field(unit, &prefix, &["Version"])),
                    alias: or_na(field(unit, &prefix, &["Alias"])),
                    installed_at: NOT_AVAILABLE.into(),
                    last_update: or_na(field(unit, &prefix, &["LastUpdate"])),
                    execution_status: status,
                    deployment_status: NOT_AVAILABLE.into(),
                    unit_index: Some(j),
                    deployment_index: None,
                });
            }
        }
    }

    records
}

pub fn installed_identifiers(modules: &[SoftwareModuleRecord]) -> BTreeSet<String> {
    modules
        .iter()
        .flat_map(|m| [m.duid.clone(), m.uuid.clone()])
        .filter(|id| id != NOT_AVAILABLE && !id.is_empty())
        .collect()
}

/// Lecture complète des deux collections. `token` est le jeton en vigueur au
/// moment où le profil de `session` a été copié.
pub async fn reconcile(session: &DeviceSession<'_>, token: FreshnessToken) -> GatewayResult<DeviceInventory> {
    let software_modules = session.query(&format!("{SOFTWARE_MODULES}.?")).await?;
    let deployment_count =
        params::get_count(&software_modules, &format!("{SOFTWARE_MODULES}.DeploymentUnitNumberOfEntries"));
    let execution_count =
        params::get_count(&software_modules, &format!("{SOFTWARE_MODULES}.ExecutionUnitNumberOfEntries"));

    let mut deployment_units = Vec::new();
    for i in 1..=deployment_count {
        deployment_units.push(session.query(&format!("{SOFTWARE_MODULES}.DeploymentUnit.{i}.?")).await?);
    }

    let mut execution_units = Vec::new();
    for j in 1..=execution_count {
        execution_units.push(session.query(&format!("{SOFTWARE_MODULES}.ExecutionUnit.{j}.?")).await?);
    }

    let modules = merge_units(&deployment_units, &execution_units);
    let active_containers = execution_units
        .iter()
        .filter(|unit| params::find_suffix(unit, ".Status").map(|(_, v)| v) == Some("Active"))
        .count();

    debug!(
        "reconciled {} modules ({} deployment units, {} execution units)",
        modules.len(),
        deployment_count,
        execution_count
    );

    Ok(DeviceInventory {
        installed_identifiers: installed_identifiers(&modules),
        software_modules,
        deployment_units,
        execution_units,
        modules,
        total_containers: execution_count,
        active_containers,
        freshness: token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn du(i: usize, duid: &str, name: &str, url: &str) -> ParameterMap {
        params::parse(&format!(
            "SoftwareModules.DeploymentUnit.{i}.\n\
             SoftwareModules.DeploymentUnit.{i}.DUID=\"{duid}\"\n\
             SoftwareModules.DeploymentUnit.{i}.UUID=\"uuid-{duid}\"\n\
             SoftwareModules.DeploymentUnit.{i}.Name=\"{name}\"\n\
             SoftwareModules.DeploymentUnit.{i}.URL=\"{url}\"\n\
             SoftwareModules.DeploymentUnit.{i}.Vendor=\"acme\"\n\
             SoftwareModules.DeploymentUnit.{i}.Version=\"1.0\"\n\
             SoftwareModules.DeploymentUnit.{i}.Status=\"Installed\"\n\
             SoftwareModules.DeploymentUnit.{i}.Installed=\"2024-05-01T10:00:00Z\"\n"
        ))
    }

    fn eu(j: usize, id_key: &str, id: &str, status: &str) -> ParameterMap {
        params::parse(&format!(
            "SoftwareModules.ExecutionUnit.{j}.{id_key}=\"{id}\"\n\
             SoftwareModules.ExecutionUnit.{j}.Alias=\"cpe-{id}\"\n\
             SoftwareModules.ExecutionUnit.{j}.Status=\"{status}\"\n\
             SoftwareModules.ExecutionUnit.{j}.LastUpdate=\"2024-05-02T08:00:00Z\"\n"
        ))
    }

    #[test]
    fn test_merge_by_identity_sets_unit_index() {
        let dus = vec![du(1, "a", "alpha", "docker://r/alpha"), du(2, "b", "beta", "docker://r/beta")];
        let eus = vec![eu(1, "DUID", "b", "Active")];

        let modules = merge_units(&dus, &eus);
        assert_eq!(modules.len(), 2);

        assert_eq!(modules[0].duid, "a");
        assert_eq!(modules[0].execution_status, "N/A");
        assert_eq!(modules[0].unit_index, None);
        assert_eq!(modules[0].deployment_index, Some(1));

        assert_eq!(modules[1].name, "beta");
        assert_eq!(modules[1].execution_status, "Active");
        assert_eq!(modules[1].deployment_status, "Installed");
        assert_eq!(modules[1].alias, "cpe-b");
        assert_eq!(modules[1].last_update, "2024-05-02T08:00:00Z");
        assert_eq!(modules[1].unit_index, Some(1));
        assert_eq!(modules[1].deployment_index, Some(2));
        assert!(modules[1].is_active());
    }

    #[test]
    fn test_execution_only_straggler_comes_last() {
        let dus = vec![du(1, "a", "alpha", "docker://r/alpha")];
        let eus = vec![eu(1, "EUID", "zz", "Idle"), eu(2, "DUID", "a", "Active")];

        let modules = merge_units(&dus, &eus);
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].duid, "a");
        assert_eq!(modules[0].unit_index, Some(2));
        assert_eq!(modules[1].duid, "zz");
        assert_eq!(modules[1].deployment_status, "N/A");
        assert_eq!(modules[1].url, "N/A");
        assert_eq!(modules[1].unit_index, Some(1));
        assert_eq!(modules[1].deployment_index, None);
    }

    #[test]
    fn test_identity_priority_and_missing_identity() {
        let only_uuid = params::parse("SoftwareModules.DeploymentUnit.1.UUID=\"u-1\"\n");
        assert_eq!(identity_of(&only_uuid), Some("u-1"));

        let both = params::parse("X.1.UUID=\"u\"\nX.1.DUID=\"d\"\n");
        assert_eq!(identity_of(&both), Some("d"));

        let anonymous = params::parse("SoftwareModules.DeploymentUnit.1.Name=\"ghost\"\n");
        assert_eq!(identity_of(&anonymous), None);
        assert!(merge_units(&[anonymous], &[]).is_empty());
    }

    #[test]
    fn test_merge_is_deterministic() {
        let dus = vec![du(1, "a", "alpha", "u1"), du(2, "b", "beta", "u2")];
        let eus = vec![eu(1, "DUID", "a", "Active"), eu(2, "EUID", "c", "Idle")];
        assert_eq!(merge_units(&dus, &eus), merge_units(&dus, &eus));
    }

    #[test]
    fn test_installed_identifiers_skip_na() {
        let dus = vec![du(1, "a", "alpha", "u1")];
        let eus = vec![eu(1, "EUID", "c", "Idle")];
        let ids = installed_identifiers(&merge_units(&dus, &eus));
        assert_eq!(ids, BTreeSet::from(["a".to_string(), "uuid-a".to_string(), "c".to_string()]));
    }

    struct CountsOnly(&'static str);

    impl crate::transport::RemoteShell for CountsOnly {
        fn exec<'a>(
            &'a self,
            _profile: &'a crate::config::ConnectionProfile,
            command: &'a str,
        ) -> futures::future::BoxFuture<'a, GatewayResult<crate::transport::CommandOutput>> {
            let output = if command == crate::transport::ubus("SoftwareModules.?") { self.0 } else { "" };
            Box::pin(async move { Ok(crate::transport::CommandOutput { output: output.to_string(), exit_code: Some(0) }) })
        }
    }

    #[tokio::test]
    async fn test_oversized_entry_counts_are_bounded() {
        let shell = CountsOnly(
            "SoftwareModules.DeploymentUnitNumberOfEntries=4294967295\n\
             SoftwareModules.ExecutionUnitNumberOfEntries=4294967295\n",
        );
        let session = DeviceSession::new(&shell, crate::config::ConnectionProfile::default());
        let token = crate::lcm::Freshness::with_epoch(1).current();

        let inventory = reconcile(&session, token).await.unwrap();
        assert_eq!(inventory.deployment_units.len(), params::MAX_COLLECTION_ENTRIES as usize);
        assert_eq!(inventory.execution_units.len(), params::MAX_COLLECTION_ENTRIES as usize);
        assert_eq!(inventory.total_containers, params::MAX_COLLECTION_ENTRIES);
        assert!(inventory.modules.is_empty());
        assert_eq!(inventory.freshness, token);
    }
}
