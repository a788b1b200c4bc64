use querymesh_core::{AgentKind, AgentOutcome};
use querymesh_hub::HubConfig;
use querymesh_orchestrator::SchedulerConfig;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Contents of `querymesh.toml`.
#[derive(Debug, Deserialize)]
pub struct QuerymeshConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub agents: Vec<ScriptedAgentConfig>,
}

/// Middleware chain for the hub's match-all rule.
#[derive(Debug, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_middleware")]
    pub middleware: Vec<String>,
    #[serde(default = "default_rule_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            middleware: default_middleware(),
            timeout_secs: default_rule_timeout_secs(),
        }
    }
}

fn default_middleware() -> Vec<String> {
    vec!["validation".to_string(), "logging".to_string()]
}

fn default_rule_timeout_secs() -> u64 {
    30
}

/// An agent that plays back canned outcomes. The last outcome repeats.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedAgentConfig {
    pub name: AgentKind,
    pub outcomes: Vec<AgentOutcome>,
    /// Artificial latency per call.
    #[serde(default)]
    pub delay_ms: u64,
}

impl QuerymeshConfig {
    pub fn from_toml(source: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        Self::from_toml(&source)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.max_iterations == 0 {
            anyhow::bail!("scheduler.max_iterations must be at least 1");
        }
        if self.hub.queue_capacity == 0 {
            anyhow::bail!("hub.queue_capacity must be at least 1");
        }
        let mut seen = BTreeSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name) {
                anyhow::bail!("agent '{}' is defined more than once", agent.name);
            }
            if agent.outcomes.is_empty() {
                anyhow::bail!("agent '{}' has no outcomes", agent.name);
            }
        }
        Ok(())
    }

    /// Whether the agent that receives the bootstrap task is configured.
    pub fn has_first_agent(&self) -> bool {
        self.agents
            .iter()
            .any(|a| a.name == self.scheduler.first_agent)
    }
}
