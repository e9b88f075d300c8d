/*!
Test Harness pour le kernel passerelle

- État applicatif complet sur un répertoire de données temporaire
- `FakeGateway` branchée comme shell distant
- Requêtes JSON envoyées au routeur Axum sans socket (`oneshot`)
*/

use crate::fake_gateway::FakeGateway;
use crate::ubus_dump::UbusDump;
use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use passerelle_kernel::config::KernelConfig;
use passerelle_kernel::{http, AppState};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestHarness {
    pub gateway: FakeGateway,
    pub state: AppState,
    data_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_config(KernelConfig::default())
    }

    /// `data_dir` est toujours remplacé par un répertoire temporaire
    pub fn with_config(mut cfg: KernelConfig) -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let data_dir = tempfile::tempdir().context("failed to create temp data dir")?;
        cfg.data_dir = data_dir.path().to_path_buf();

        let gateway = FakeGateway::new();
        let state = AppState::new(&cfg, Arc::new(gateway.clone()));
        Ok(Self { gateway, state, data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    pub fn router(&self) -> Router {
        http::build_router(self.state.clone())
    }

    pub async fn get(&self, uri: &str) -> Result<(StatusCode, Value)> {
        let request = Request::builder().method("GET").uri(uri).body(Body::empty())?;
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.post_raw(uri, &body.to_string()).await
    }

    /// Corps envoyé tel quel, pour les JSON invalides
    pub async fn post_raw(&self, uri: &str, body: &str) -> Result<(StatusCode, Value)> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?;
        self.send(request).await
    }

    /// Corps JSON si possible, sinon texte brut en `Value::String`
    async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = self.router().oneshot(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        Ok((status, value))
    }

    /// Scripte un device exposant des Deployment Units `(duid, name, url)` et des
    /// Execution Units `(euid, status)`
    pub fn script_modules(&self, deployment_units: &[(&str, &str, &str)], execution_units: &[(&str, &str)]) {
        self.gateway.on_ubus(
            "SoftwareModules.?",
            &UbusDump::software_modules(deployment_units.len(), execution_units.len()).render(),
        );
        for (i, (duid, name, url)) in deployment_units.iter().enumerate() {
            let index = i + 1;
            self.gateway.on_ubus(
                &format!("SoftwareModules.DeploymentUnit.{index}.?"),
                &UbusDump::deployment_unit(index, duid, name, url).render(),
            );
        }
        for (j, (euid, status)) in execution_units.iter().enumerate() {
            let index = j + 1;
            self.gateway.on_ubus(
                &format!("SoftwareModules.ExecutionUnit.{index}.?"),
                &UbusDump::execution_unit(index, euid, status).render(),
            );
        }
    }

    /// Jeton de fraîcheur d'une lecture `GET /api/lcm`
    pub async fn freshness(&self) -> Result<String> {
        let (status, body) = self.get("/api/lcm").await?;
        anyhow::ensure!(status == StatusCode::OK, "GET /api/lcm returned {status}: {body}");
        body["freshness"]
            .as_str()
            .map(str::to_string)
            .context("no freshness token in /api/lcm response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_health_and_empty_stats() {
        let harness = TestHarness::new().unwrap();

        let (status, body) = harness.get("/health").await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("ok".into()));

        let (status, body) = harness.get("/api/stats").await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cpuStats"], serde_json::json!([]));
        assert!(harness.gateway.commands().is_empty());
    }
}
