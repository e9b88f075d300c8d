/**
 * TÉLÉMÉTRIE - Séries temporelles bornées CPU / mémoire / température
 *
 * RÔLE :
 * Historique des mesures prises à chaque rafraîchissement du résumé device,
 * persisté entre deux redémarrages du kernel pour les graphes du dashboard.
 *
 * FONCTIONNEMENT :
 * - Un fichier JSON par série (`cpu_stats.json`, `memory_stats.json`, `temp_stats.json`)
 * - `record` = charge, ajoute, tronque par l'avant à 20 points, réécrit tout
 * - Fichier absent ou corrompu → série vide (loggé, jamais fatal)
 * - Un verrou async par série : deux polls qui se chevauchent s'exécutent l'un après l'autre
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{error, warn};

pub const MAX_SAMPLES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Series {
    Cpu,
    Memory,
    Temperature,
}

impl Series {
    pub fn file_name(self) -> &'static str {
        match self {
            Series::Cpu => "cpu_stats.json",
            Series::Memory => "memory_stats.json",
            Series::Temperature => "temp_stats.json",
        }
    }

    fn slot(self) -> usize {
        match self {
            Series::Cpu => 0,
            Series::Memory => 1,
            Series::Temperature => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub value: f64,
}

pub struct TelemetryStore {
    dir: PathBuf,
    locks: [Mutex<()>; 3],
}

impl TelemetryStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            locks: [Mutex::new(()), Mutex::new(()), Mutex::new(())],
        }
    }

    pub fn path(&self, series: Series) -> PathBuf {
        self.dir.join(series.file_name())
    }

    /// Ajoute un point et applique la borne FIFO
    pub async fn record(&self, series: Series, value: f64, timestamp: OffsetDateTime) -> Vec<TelemetrySample> {
        let _guard = self.locks[series.slot()].lock().await;
        let path = self.path(series);

        let mut samples = load_samples(&path).await;
        samples.push(TelemetrySample { time: timestamp, value: if value.is_finite() { value } else { 0.0 } });
        if samples.len() > MAX_SAMPLES {
            let excess = samples.len() - MAX_SAMPLES;
            samples.drain(..excess);
        }

        if let Err(e) = save_samples(&path, &samples).await {
            error!("failed to save {}: {}", path.display(), e);
        }
        samples
    }

    /// Série complète, du plus ancien au plus récent
    pub async fn read(&self, series: Series) -> Vec<TelemetrySample> {
        let _guard = self.locks[series.slot()].lock().await;
        load_samples(&self.path(series)).await
    }
}

async fn load_samples(path: &Path) -> Vec<TelemetrySample> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to load {}, initializing empty: {}", path.display(), e);
            }
            return Vec::new();
        }
    };
    match serde_json::from_str::<Option<Vec<TelemetrySample>>>(&content) {
        Ok(samples) => samples.unwrap_or_default(),
        Err(e) => {
            warn!("failed to load {}, initializing empty: {}", path.display(), e);
            Vec::new()
        }
    }
}

async fn save_samples(path: &Path, samples: &[TelemetrySample]) -> Result<(), crate::error::GatewayError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(samples)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
