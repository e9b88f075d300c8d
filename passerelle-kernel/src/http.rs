/**
 * API REST PASSERELLE - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose les requêtes (résumé, self-heal, stats, modules) et les commandes
 * (configure, install/start/stop/uninstall, changement d'hôte) au dashboard.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, routes sous /api + /health
 * - Chaque requête ouvre sa propre session sur une copie du profil courant
 * - Corps JSON à champs optionnels : absence → 400 avant tout appel distant
 * - Corps illisible ou mal typé → 400 `{error}` aussi (`JsonBody`)
 * - Erreurs : `GatewayError` → `{error}` + code HTTP
 *
 * CORS permissif : le dashboard est servi depuis une autre origine.
 */

use crate::error::{GatewayError, GatewayResult};
use crate::lcm::{DeviceInventory, InstallRequest, LibraryEntry, NewLibraryEntry, RequestedState};
use crate::params::{self, ParameterMap};
use crate::selfheal::{self, SelfHealSnapshot};
use crate::state::AppState;
use crate::summary::{self, DeviceSummary};
use crate::telemetry::Series;
use crate::transport::ubus;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/summary", get(get_summary))
        .route("/api/selfheal", get(get_selfheal))
        .route("/api/configure", post(configure))
        .route("/api/stats", get(get_stats))
        .route("/api/lcm", get(get_modules))
        .route("/api/lcm/add", post(add_to_library))
        .route("/api/lcm/delete", post(remove_from_library))
        .route("/api/lcm/install", post(install))
        .route("/api/lcm/start", post(start))
        .route("/api/lcm/stop", post(stop))
        .route("/api/lcm/uninstall", post(uninstall))
        .route("/api/test-connection", post(test_connection))
        .route("/api/update-ssh-host", post(update_ssh_host))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// `Json<T>` dont le rejet passe par `GatewayError` (400 + `{error}`)
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

fn required<T>(value: Option<T>, field: &str) -> GatewayResult<T> {
    value.ok_or_else(|| GatewayError::missing(field))
}

fn required_text(value: Option<String>, field: &str) -> GatewayResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(GatewayError::missing(field)),
    }
}

// GET /api/summary
async fn get_summary(State(app): State<AppState>) -> GatewayResult<Json<DeviceSummary>> {
    let session = app.session();
    Ok(Json(summary::collect(&session, &app.telemetry).await?))
}

// GET /api/selfheal
async fn get_selfheal(State(app): State<AppState>) -> GatewayResult<Json<SelfHealSnapshot>> {
    let session = app.session();
    Ok(Json(selfheal::build_snapshot(&session).await?))
}

#[derive(Debug, Deserialize)]
struct ConfigureBody {
    param: Option<String>,
    /// Chaîne, nombre ou booléen : le dashboard envoie les seuils en nombres
    value: Option<Value>,
}

fn scalar_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Valeur relue après écriture, pour le chemin demandé uniquement
fn read_back(map: &ParameterMap, param: &str) -> Option<String> {
    map.get(param).map(|v| params::unquote(v).to_string())
}

// POST /api/configure
async fn configure(State(app): State<AppState>, JsonBody(body): JsonBody<ConfigureBody>) -> GatewayResult<Json<Value>> {
    let param = required_text(body.param, "param")?;
    let value = required_text(scalar_text(body.value), "value")?;

    let session = app.session();
    session.run(&ubus(&format!("{param}={value}"))).await?;
    let confirmed = session.query(&format!("{param}?")).await?;
    let updated = read_back(&confirmed, &param);

    info!("configured {} = {} (device reports {:?})", param, value, updated);
    Ok(Json(json!({ "success": true, "updatedValue": updated })))
}

// GET /api/stats
async fn get_stats(State(app): State<AppState>) -> Json<Value> {
    let telemetry = &app.telemetry;
    Json(json!({
        "cpuStats": telemetry.read(Series::Cpu).await,
        "memoryStats": telemetry.read(Series::Memory).await,
        "tempStats": telemetry.read(Series::Temperature).await,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModulesView {
    #[serde(flatten)]
    inventory: DeviceInventory,
    library_catalog: Vec<LibraryEntry>,
}

// GET /api/lcm
async fn get_modules(State(app): State<AppState>) -> GatewayResult<Json<ModulesView>> {
    let (session, token) = app.indexed_session();
    let inventory = app.lcm.inventory(&session, token).await?;
    let library_catalog = app.lcm.library().list().await;
    Ok(Json(ModulesView { inventory, library_catalog }))
}

#[derive(Debug, Deserialize)]
struct AddBody {
    url: Option<String>,
    name: Option<String>,
    description: Option<String>,
    vendor: Option<String>,
    version: Option<String>,
}

// POST /api/lcm/add
async fn add_to_library(State(app): State<AppState>, JsonBody(body): JsonBody<AddBody>) -> GatewayResult<Json<Value>> {
    let new = NewLibraryEntry {
        url: required_text(body.url, "url")?,
        name: required_text(body.name, "name")?,
        description: body.description,
        vendor: body.vendor,
        version: body.version,
    };
    let container = app.lcm.add_to_library(new).await?;
    Ok(Json(json!({ "success": true, "container": container })))
}

#[derive(Debug, Deserialize)]
struct NameBody {
    name: Option<String>,
}

// POST /api/lcm/delete
async fn remove_from_library(State(app): State<AppState>, JsonBody(body): JsonBody<NameBody>) -> GatewayResult<Json<Value>> {
    let name = required_text(body.name, "name")?;
    let removed = app.lcm.remove_from_library(&name).await?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}

#[derive(Debug, Deserialize)]
struct InstallBody {
    url: Option<String>,
    name: Option<String>,
    uuid: Option<String>,
}

// POST /api/lcm/install
async fn install(State(app): State<AppState>, JsonBody(body): JsonBody<InstallBody>) -> GatewayResult<Json<Value>> {
    let request = InstallRequest {
        url: required_text(body.url, "url")?,
        name: required_text(body.name, "name")?,
        uuid: body.uuid,
    };
    let session = app.session();
    let outcome = app.lcm.install(&session, request).await?;
    Ok(Json(json!({
        "success": true,
        "uuid": outcome.uuid,
        "output": outcome.output,
        "freshness": outcome.freshness,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnitBody {
    unit_index: Option<usize>,
    deployment_index: Option<usize>,
    freshness: Option<String>,
}

async fn request_state(app: AppState, body: UnitBody, state: RequestedState) -> GatewayResult<Json<Value>> {
    let unit_index = required(body.unit_index, "unitIndex")?;
    let freshness = required_text(body.freshness, "freshness")?;
    let session = app.session();
    let output = app.lcm.set_requested_state(&session, unit_index, &freshness, state).await?;
    Ok(Json(json!({ "success": true, "output": output })))
}

// POST /api/lcm/start
async fn start(State(app): State<AppState>, JsonBody(body): JsonBody<UnitBody>) -> GatewayResult<Json<Value>> {
    request_state(app, body, RequestedState::Active).await
}

// POST /api/lcm/stop
async fn stop(State(app): State<AppState>, JsonBody(body): JsonBody<UnitBody>) -> GatewayResult<Json<Value>> {
    request_state(app, body, RequestedState::Idle).await
}

// POST /api/lcm/uninstall
async fn uninstall(State(app): State<AppState>, JsonBody(body): JsonBody<UnitBody>) -> GatewayResult<Json<Value>> {
    let deployment_index = required(body.deployment_index, "deploymentIndex")?;
    let freshness = required_text(body.freshness, "freshness")?;
    let session = app.session();
    let token = app.lcm.uninstall(&session, body.unit_index, deployment_index, &freshness).await?;
    Ok(Json(json!({ "success": true, "freshness": token })))
}

#[derive(Debug, Deserialize)]
struct HostBody {
    host: Option<String>,
}

// POST /api/test-connection
async fn test_connection(State(app): State<AppState>, JsonBody(body): JsonBody<HostBody>) -> GatewayResult<Json<Value>> {
    let host = required_text(body.host, "host")?;
    let profile = app.profile.lock().with_host(&host);
    let session = app.session_for(profile);
    session.run("echo connected").await?;
    info!("connection to {} ok", host);
    Ok(Json(json!({ "success": true })))
}

// POST /api/update-ssh-host
async fn update_ssh_host(State(app): State<AppState>, JsonBody(body): JsonBody<HostBody>) -> GatewayResult<Json<Value>> {
    let host = required_text(body.host, "host")?;
    let (previous, freshness) = app.set_host(&host);
    info!("ssh host changed from {} to {}", previous, host);
    Ok(Json(json!({ "success": true, "freshness": freshness })))
}
