/*!
Passerelle simulée pour tests sans device

Implémente `RemoteShell` : chaque commande reçue est enregistrée (hôte +
ligne de commande) et reçoit la réponse scriptée correspondante.
Règles de correspondance :
- `on(needle, output)` : la commande contient `needle`
- `on_ubus(path, output)` : la commande est exactement `ubus-cli '<path>'`
- la règle enregistrée en dernier l'emporte ; sans règle → sortie vide, code 0
*/

use futures::future::BoxFuture;
use parking_lot::Mutex;
use passerelle_kernel::config::ConnectionProfile;
use passerelle_kernel::error::{GatewayError, GatewayResult};
use passerelle_kernel::transport::{ubus, CommandOutput, RemoteShell};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub host: String,
    pub command: String,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Contains(String),
}

impl Matcher {
    fn matches(&self, command: &str) -> bool {
        match self {
            Matcher::Exact(expected) => command == expected,
            Matcher::Contains(needle) => command.contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    matcher: Matcher,
    output: CommandOutput,
}

#[derive(Default)]
struct Script {
    rules: Vec<Rule>,
    sent: Vec<SentCommand>,
    unreachable: HashSet<String>,
    all_unreachable: bool,
}

/// Clone = même script, même journal
#[derive(Clone, Default)]
pub struct FakeGateway {
    inner: Arc<Mutex<Script>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, needle: &str, output: &str) -> &Self {
        self.push(Matcher::Contains(needle.to_string()), output, 0)
    }

    pub fn on_ubus(&self, path: &str, output: &str) -> &Self {
        self.push(Matcher::Exact(ubus(path)), output, 0)
    }

    /// Réponse avec code de sortie non nul (le transport, lui, réussit)
    pub fn on_failing(&self, needle: &str, output: &str, exit_code: i32) -> &Self {
        self.push(Matcher::Contains(needle.to_string()), output, exit_code)
    }

    /// Toute commande échoue au niveau transport
    pub fn set_unreachable(&self, unreachable: bool) -> &Self {
        self.inner.lock().all_unreachable = unreachable;
        self
    }

    pub fn unreachable_host(&self, host: &str) -> &Self {
        self.inner.lock().unreachable.insert(host.to_string());
        self
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.inner.lock().sent.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.inner.lock().sent.iter().map(|s| s.command.clone()).collect()
    }

    pub fn sent_containing(&self, needle: &str) -> Vec<String> {
        self.commands().into_iter().filter(|c| c.contains(needle)).collect()
    }

    pub fn clear_sent(&self) {
        self.inner.lock().sent.clear();
    }

    fn push(&self, matcher: Matcher, output: &str, exit_code: i32) -> &Self {
        self.inner.lock().rules.push(Rule {
            matcher,
            output: CommandOutput { output: output.trim().to_string(), exit_code: Some(exit_code) },
        });
        self
    }

    fn respond(&self, profile: &ConnectionProfile, command: &str) -> GatewayResult<CommandOutput> {
        let mut script = self.inner.lock();
        script.sent.push(SentCommand { host: profile.host.clone(), command: command.to_string() });

        if script.all_unreachable || script.unreachable.contains(&profile.host) {
            tracing::debug!("[fake] {} unreachable for {}", profile.host, command);
            return Err(GatewayError::Transport(format!("connect to host {} port {}: Connection refused", profile.host, profile.port)));
        }

        let output = script
            .rules
            .iter()
            .rev()
            .find(|rule| rule.matcher.matches(command))
            .map(|rule| rule.output.clone())
            .unwrap_or(CommandOutput { output: String::new(), exit_code: Some(0) });
        tracing::debug!("[fake] {} -> {:?}", command, output.exit_code);
        Ok(output)
    }
}

impl RemoteShell for FakeGateway {
    fn exec<'a>(
        &'a self,
        profile: &'a ConnectionProfile,
        command: &'a str,
    ) -> BoxFuture<'a, GatewayResult<CommandOutput>> {
        let result = self.respond(profile, command);
        Box::pin(async move { result })
    }
}
