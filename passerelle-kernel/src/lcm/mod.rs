/**
 * LCM - Cycle de vie des Software Modules de la passerelle
 *
 * RÔLE :
 * Vue unifiée de "ce qui tourne sur le device" et commandes de cycle de vie.
 *
 * FONCTIONNEMENT :
 * - `reconcile` : fusionne DeploymentUnit (métadonnées) et ExecutionUnit (runtime),
 *   deux collections indexées indépendamment, corrélées par leur identité (DUID/EUID/UUID)
 * - `library` : catalogue local des modules installables, persisté en JSON
 * - `lifecycle` : install / start / stop / uninstall
 *
 * INDEX ET FRAÎCHEUR :
 * Le device adresse ses unités par position, et renumérote ses collections au
 * redémarrage qui suit un install/uninstall. Chaque réconciliation délivre un
 * `FreshnessToken` ; toute mutation qui invalide les positions incrémente la
 * génération, et les commandes adressées par index refusent un jeton périmé.
 */

pub mod library;
pub mod lifecycle;
pub mod reconcile;

pub use library::{LibraryEntry, LibraryStore, NewLibraryEntry};
pub use lifecycle::{allocate_identifier, InstallOutcome, InstallRequest, LcmEngine, RequestedState};
pub use reconcile::{merge_units, DeviceInventory, SoftwareModuleRecord};

use crate::error::{GatewayError, GatewayResult};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

/// Jeton `<epoch>-<generation>` prouvant qu'une vue des index a été obtenue
/// après la dernière mutation connue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessToken {
    epoch: u64,
    generation: u64,
}

impl fmt::Display for FreshnessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-{}", self.epoch, self.generation)
    }
}

impl FromStr for FreshnessToken {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GatewayError::Validation(format!("Invalid freshness token: {s}"));
        let (epoch, generation) = s.trim().split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            epoch: u64::from_str_radix(epoch, 16).map_err(|_| invalid())?,
            generation: generation.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for FreshnessToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Générations d'index pour ce processus. L'epoch distingue deux exécutions
/// du kernel, un jeton d'avant redémarrage n'est jamais accepté.
#[derive(Debug)]
pub struct Freshness {
    epoch: u64,
    generation: AtomicU64,
}

impl Freshness {
    pub fn new() -> Self {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        Self::with_epoch(nanos as u64)
    }

    pub fn with_epoch(epoch: u64) -> Self {
        Self { epoch, generation: AtomicU64::new(0) }
    }

    pub fn current(&self) -> FreshnessToken {
        FreshnessToken { epoch: self.epoch, generation: self.generation.load(Ordering::SeqCst) }
    }

    /// Les index connus jusqu'ici ne désignent plus les mêmes unités
    pub fn invalidate(&self) -> FreshnessToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        FreshnessToken { epoch: self.epoch, generation }
    }

    pub fn check(&self, presented: &str) -> GatewayResult<()> {
        let token: FreshnessToken = presented.parse()?;
        let current = self.current();
        if token != current {
            return Err(GatewayError::StaleIndex { presented: token.to_string(), current: current.to_string() });
        }
        Ok(())
    }
}

impl Default for Freshness {
    fn default() -> Self {
        Self::new()
    }
}
