use crate::config::{ConnectionProfile, KernelConfig};
use crate::lcm::{FreshnessToken, LcmEngine, LibraryStore};
use crate::telemetry::TelemetryStore;
use crate::transport::{DeviceSession, RemoteShell};
use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// État unique partagé par les handlers Axum et le poller
#[derive(Clone)]
pub struct AppState {
    pub shell: Arc<dyn RemoteShell>,
    pub profile: Shared<ConnectionProfile>,
    pub telemetry: Arc<TelemetryStore>,
    pub lcm: Arc<LcmEngine>,
}

impl AppState {
    pub fn new(cfg: &KernelConfig, shell: Arc<dyn RemoteShell>) -> Self {
        let library = LibraryStore::new(cfg.data_dir.join("library.json"));
        Self {
            shell,
            profile: new_state(cfg.ssh.clone()),
            telemetry: Arc::new(TelemetryStore::new(cfg.data_dir.clone())),
            lcm: Arc::new(LcmEngine::new(library, cfg.lcm.clone())),
        }
    }

    /// Session sur le profil courant, copié : un changement d'hôte pendant le
    /// flux ne le redirige pas
    pub fn session(&self) -> DeviceSession<'_> {
        DeviceSession::new(self.shell.as_ref(), self.profile.lock().clone())
    }

    /// Session + jeton de fraîcheur lus sous le verrou du profil : le jeton
    /// renvoyé correspond toujours à l'hôte interrogé
    pub fn indexed_session(&self) -> (DeviceSession<'_>, FreshnessToken) {
        let profile = self.profile.lock();
        let token = self.lcm.freshness().current();
        (DeviceSession::new(self.shell.as_ref(), profile.clone()), token)
    }

    /// Change d'hôte et invalide les index sous le même verrou.
    /// Renvoie l'ancien hôte et le nouveau jeton.
    pub fn set_host(&self, host: &str) -> (String, FreshnessToken) {
        let mut profile = self.profile.lock();
        let token = self.lcm.invalidate_indices();
        let previous = std::mem::replace(&mut profile.host, host.to_string());
        (previous, token)
    }

    pub fn session_for(&self, profile: ConnectionProfile) -> DeviceSession<'_> {
        DeviceSession::new(self.shell.as_ref(), profile)
    }
}
