/**
 * TRANSPORT - Exécution de commandes sur la passerelle
 *
 * RÔLE :
 * - `RemoteShell` : une ligne de commande en entrée, sortie combinée nettoyée en retour
 * - `SshShell` : client `ssh` système piloté par `tokio::process`, borné par
 *   les timeouts de connexion et de commande du profil
 * - `DeviceSession` : flux séquentiel de commandes sur un profil, avec les
 *   helpers `ubus-cli` utilisés par tous les modules
 */

use crate::config::ConnectionProfile;
use crate::error::{GatewayError, GatewayResult};
use crate::params::{self, ParameterMap};
use futures::future::BoxFuture;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

/// Résultat d'une commande distante
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    /// stdout + stderr, nettoyés
    pub output: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Exécute une ligne de commande sur l'hôte décrit par `profile`.
/// Échec de transport (connexion, auth, timeout) = erreur ; code de sortie non nul = non.
pub trait RemoteShell: Send + Sync {
    fn exec<'a>(
        &'a self,
        profile: &'a ConnectionProfile,
        command: &'a str,
    ) -> BoxFuture<'a, GatewayResult<CommandOutput>>;
}

/// ssh sort en 255 sur ses propres échecs de connexion/auth
const SSH_TRANSPORT_FAILURE: i32 = 255;

#[derive(Debug, Default, Clone)]
pub struct SshShell;

impl SshShell {
    pub fn new() -> Self {
        Self
    }

    fn build_command(profile: &ConnectionProfile, command: &str) -> AsyncCommand {
        let mut cmd = match &profile.password {
            Some(password) => {
                let mut c = AsyncCommand::new("sshpass");
                c.arg("-e").env("SSHPASS", password).arg("ssh");
                c
            }
            None => {
                let mut c = AsyncCommand::new("ssh");
                c.args(["-o", "BatchMode=yes"]);
                c
            }
        };
        cmd.args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "LogLevel=ERROR"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", profile.connect_timeout_secs))
            .arg("-p")
            .arg(profile.port.to_string());
        if let Some(identity) = &profile.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(format!("{}@{}", profile.username, profile.host))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(profile: &ConnectionProfile, command: &str) -> GatewayResult<CommandOutput> {
        let start_time = Instant::now();
        let budget = Duration::from_secs(profile.connect_timeout_secs + profile.command_timeout_secs);

        let output = tokio::time::timeout(budget, Self::build_command(profile, command).output())
            .await
            .map_err(|_| GatewayError::Transport(format!("timed out after {}s", budget.as_secs())))?
            .map_err(|e| GatewayError::Transport(format!("failed to spawn ssh: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{stdout}{stderr}").trim().to_string();
        let exit_code = output.status.code();

        if exit_code == Some(SSH_TRANSPORT_FAILURE) {
            return Err(GatewayError::Transport(if combined.is_empty() {
                format!("connection to {} failed", profile.host)
            } else {
                combined
            }));
        }

        debug!(
            "ssh {}@{} `{}` -> {:?} in {}ms",
            profile.username,
            profile.host,
            command,
            exit_code,
            start_time.elapsed().as_millis()
        );
        Ok(CommandOutput { output: combined, exit_code })
    }
}

impl RemoteShell for SshShell {
    fn exec<'a>(
        &'a self,
        profile: &'a ConnectionProfile,
        command: &'a str,
    ) -> BoxFuture<'a, GatewayResult<CommandOutput>> {
        Box::pin(Self::run(profile, command))
    }
}

/// Flux séquentiel de commandes vers un device. Détient sa propre copie du
/// profil : un changement d'hôte concurrent ne redirige pas un flux en cours.
pub struct DeviceSession<'a> {
    shell: &'a dyn RemoteShell,
    profile: ConnectionProfile,
}

impl<'a> DeviceSession<'a> {
    pub fn new(shell: &'a dyn RemoteShell, profile: ConnectionProfile) -> Self {
        Self { shell, profile }
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    /// Code de sortie non nul : loggé, la sortie est quand même renvoyée
    pub async fn run(&self, command: &str) -> GatewayResult<String> {
        let result = self.shell.exec(&self.profile, command).await?;
        if !result.success() {
            warn!(
                "command \"{}\" failed with code {:?}, output: {}",
                command, result.exit_code, result.output
            );
        }
        Ok(result.output)
    }

    /// `ubus-cli <path>` puis parsing
    pub async fn query(&self, path: &str) -> GatewayResult<ParameterMap> {
        let raw = self.run(&ubus(path)).await?;
        Ok(params::parse(&raw))
    }
}

/// Ligne de commande `ubus-cli` avec l'argument quoté pour le shell distant
pub fn ubus(expression: &str) -> String {
    format!("ubus-cli {}", shell_words::quote(expression))
}
