//! Install / start / stop / uninstall des Software Modules
//!
//! Transitions d'une fiche : Cataloged → Installing → Installed{Idle|Active}
//! → Uninstalling → (retirée). Aucune notification côté device : la vue n'est
//! fraîche que jusqu'au prochain `reconcile`.

use super::library::{LibraryEntry, LibraryStore, NewLibraryEntry};
use super::reconcile::{self, DeviceInventory, SOFTWARE_MODULES};
use super::{Freshness, FreshnessToken};
use crate::config::LcmConf;
use crate::error::{GatewayError, GatewayResult};
use crate::transport::{ubus, DeviceSession};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

pub const MAX_IDENTIFIER_ATTEMPTS: usize = 64;
const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedState {
    Active,
    Idle,
}

impl RequestedState {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestedState::Active => "Active",
            RequestedState::Idle => "Idle",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstallRequest {
    pub url: String,
    pub name: String,
    /// Identifiant proposé par l'appelant ; remplacé s'il est déjà utilisé
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub uuid: String,
    pub output: String,
    pub freshness: FreshnessToken,
}

/// Identifiant candidat n (1-based) : `00000000-0000-5000-b000-00000000000n`
fn candidate(n: usize) -> String {
    format!("00000000-0000-5000-b000-{n:012x}")
}

pub fn allocate_identifier(requested: Option<&str>, used: &BTreeSet<String>) -> GatewayResult<String> {
    if let Some(req) = requested.map(str::trim).filter(|r| !r.is_empty()) {
        if !used.contains(req) {
            return Ok(req.to_string());
        }
        warn!("requested identifier {req} already in use, allocating another");
    }
    (1..=MAX_IDENTIFIER_ATTEMPTS)
        .map(candidate)
        .find(|c| !used.contains(c))
        .ok_or(GatewayError::IdentifierExhausted(MAX_IDENTIFIER_ATTEMPTS))
}

pub fn install_command(conf: &LcmConf, url: &str, uuid: &str) -> String {
    ubus(&format!(
        "{SOFTWARE_MODULES}.InstallDU(URL=\"{url}\", UUID=\"{uuid}\", ExecutionEnvRef=\"{env}\", \
         Privileged=false, NumRequiredUIDs={uids}, \
         HostObject=[{{Source=\"{src}\", Destination=\"{dst}\", Options=\"type=mount,bind\"}}])",
        env = conf.execution_env,
        uids = conf.required_uids,
        src = conf.bind_source,
        dst = conf.bind_destination,
    ))
}

pub fn requested_state_command(unit_index: usize, state: RequestedState) -> String {
    ubus(&format!(
        "{SOFTWARE_MODULES}.ExecutionUnit.{unit_index}.SetRequestedState(RequestedState={})",
        state.as_str()
    ))
}

pub fn uninstall_command(deployment_index: usize) -> String {
    ubus(&format!("{SOFTWARE_MODULES}.DeploymentUnit.{deployment_index}.Uninstall()"))
}

fn require(value: &str, field: &str) -> GatewayResult<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::missing(field));
    }
    Ok(())
}

/// Identifiant proposé par l'appelant : syntaxe UUID stricte, il est inséré
/// tel quel dans la commande InstallDU
fn validate_identifier(requested: Option<&str>) -> GatewayResult<()> {
    match requested.map(str::trim).filter(|r| !r.is_empty()) {
        Some(req) if Uuid::parse_str(req).is_err() => {
            Err(GatewayError::Validation(format!("Invalid uuid: {req}")))
        }
        _ => Ok(()),
    }
}

fn require_index(index: usize, field: &str) -> GatewayResult<()> {
    if index == 0 {
        return Err(GatewayError::Validation(format!("{field} is 1-based")));
    }
    Ok(())
}

/// Moteur LCM : bibliothèque locale + jetons de fraîcheur + options d'install
pub struct LcmEngine {
    library: LibraryStore,
    freshness: Freshness,
    conf: LcmConf,
}

impl LcmEngine {
    pub fn new(library: LibraryStore, conf: LcmConf) -> Self {
        Self { library, freshness: Freshness::new(), conf }
    }

    pub fn library(&self) -> &LibraryStore {
        &self.library
    }

    pub fn freshness(&self) -> &Freshness {
        &self.freshness
    }

    /// `token` : jeton lu en même temps que le profil de `session` (voir `AppState::indexed_session`)
    pub async fn inventory(&self, session: &DeviceSession<'_>, token: FreshnessToken) -> GatewayResult<DeviceInventory> {
        reconcile::reconcile(session, token).await
    }

    pub async fn add_to_library(&self, new: NewLibraryEntry) -> GatewayResult<LibraryEntry> {
        require(&new.url, "url")?;
        require(&new.name, "name")?;
        Ok(self.library.add(new).await)
    }

    pub async fn remove_from_library(&self, name: &str) -> GatewayResult<usize> {
        require(name, "name")?;
        Ok(self.library.remove(name).await)
    }

    pub async fn install(&self, session: &DeviceSession<'_>, request: InstallRequest) -> GatewayResult<InstallOutcome> {
        require(&request.url, "url")?;
        require(&request.name, "name")?;
        if request.url.contains('"') {
            return Err(GatewayError::Validation("url must not contain quotes".into()));
        }
        validate_identifier(request.uuid.as_deref())?;
        let url = request.url.trim();

        let inventory = self.inventory(session, self.freshness.current()).await?;
        if inventory.modules.iter().any(|m| m.url != NOT_AVAILABLE && m.url == url) {
            info!("install of {} skipped: {} already on device", request.name, url);
            return Err(GatewayError::AlreadyInstalled(request.name));
        }

        let mut used = inventory.installed_identifiers;
        used.extend(self.library.list().await.into_iter().map(|e| e.uuid).filter(|u| !u.is_empty()));
        let uuid = allocate_identifier(request.uuid.as_deref(), &used)?;

        info!("installing {} from {} as {}", request.name, url, uuid);
        let output = session.run(&install_command(&self.conf, url, &uuid)).await?;

        self.library.remove(&request.name).await;
        let freshness = self.restart(session).await;
        Ok(InstallOutcome { uuid, output, freshness })
    }

    pub async fn set_requested_state(
        &self,
        session: &DeviceSession<'_>,
        unit_index: usize,
        freshness: &str,
        state: RequestedState,
    ) -> GatewayResult<String> {
        require_index(unit_index, "unitIndex")?;
        self.freshness.check(freshness)?;
        info!("setting execution unit {} to {}", unit_index, state.as_str());
        session.run(&requested_state_command(unit_index, state)).await
    }

    /// `unit_index` absent : module déployé mais jamais lancé, pas d'arrêt préalable
    pub async fn uninstall(
        &self,
        session: &DeviceSession<'_>,
        unit_index: Option<usize>,
        deployment_index: usize,
        freshness: &str,
    ) -> GatewayResult<FreshnessToken> {
        if let Some(unit_index) = unit_index {
            require_index(unit_index, "unitIndex")?;
        }
        require_index(deployment_index, "deploymentIndex")?;
        self.freshness.check(freshness)?;

        info!("uninstalling execution unit {:?} / deployment unit {}", unit_index, deployment_index);
        if let Some(unit_index) = unit_index {
            session.run(&requested_state_command(unit_index, RequestedState::Idle)).await?;
        }
        session.run(&uninstall_command(deployment_index)).await?;
        Ok(self.restart(session).await)
    }

    /// Nouvelle cible : les index de l'ancien device ne valent rien ici
    pub fn invalidate_indices(&self) -> FreshnessToken {
        self.freshness.invalidate()
    }

    /// Invalide les index puis redémarre le device. La session SSH peut tomber
    /// pendant le redémarrage : l'échec est loggé, pas remonté.
    async fn restart(&self, session: &DeviceSession<'_>) -> FreshnessToken {
        let token = self.freshness.invalidate();
        match session.run(&self.conf.restart_command).await {
            Ok(_) => info!("restart requested on {}", session.profile().host),
            Err(e) => warn!("restart command on {} did not complete: {}", session.profile().host, e),
        }
        token
    }
}
