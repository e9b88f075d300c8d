/**
 * ERREURS KERNEL - Taxonomie unique des échecs exposés par l'API
 *
 * RÔLE :
 * Regroupe les erreurs que les opérations du kernel peuvent remonter à l'appelant
 * et leur traduction HTTP (`{error: message}` + code non-2xx).
 *
 * POLITIQUE :
 * - Transport / Validation : interrompent l'opération et remontent
 * - Persistence : loggée puis dégradée (jamais remontée depuis télémétrie/bibliothèque)
 * - Exit code non nul côté device : simple log, ce n'est pas une erreur
 */

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Connexion, authentification ou timeout vers la passerelle
    #[error("SSH error: {0}")]
    Transport(String),
    /// Champ obligatoire absent ou invalide, détecté avant tout appel distant
    #[error("{0}")]
    Validation(String),
    /// Index obtenu avant un install/uninstall/changement d'hôte
    #[error("stale unit index: freshness token {presented} does not match {current}, reload modules first")]
    StaleIndex { presented: String, current: String },
    #[error("container {0} is already installed on the device")]
    AlreadyInstalled(String),
    #[error("no free deployment identifier after {0} attempts")]
    IdentifierExhausted(usize),
    #[error("storage error: {0}")]
    Persistence(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::StaleIndex { .. } | GatewayError::AlreadyInstalled(_) => StatusCode::CONFLICT,
            GatewayError::IdentifierExhausted(_) | GatewayError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn missing(field: &str) -> Self {
        GatewayError::Validation(format!("Missing {field}"))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Persistence(e.to_string())
    }
}

/// Corps JSON absent, illisible ou mal typé : même forme `{error}` que la validation
impl From<axum::extract::rejection::JsonRejection> for GatewayError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        GatewayError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::debug!("request rejected: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
