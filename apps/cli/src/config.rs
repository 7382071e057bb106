use anyhow::Context;
use duel_sdk::{Difficulty, ResolverConfig, SignalingConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI configuration (from apps/cli/config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: ResolverConfig,
    pub player: PlayerSection,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub solution: Option<SolutionSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSection {
    pub identity: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: Difficulty,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_difficulty() -> Difficulty {
    Difficulty::Medium
}

fn default_rounds() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionSection {
    pub language: String,
    pub path: PathBuf,
}

impl SolutionSection {
    pub fn read(&self) -> anyhow::Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read solution {}", self.path.display()))
    }
}

impl Config {
    /// Load configuration from config.toml, then DUEL_* environment overrides
    /// Uses CARGO_MANIFEST_DIR so the path is consistent regardless of where the binary is run from
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("DUEL_CLI_CONFIG")
            .unwrap_or_else(|_| format!("{}/config.toml", env!("CARGO_MANIFEST_DIR")));

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(true))
            .add_source(config::Environment::with_prefix("DUEL").separator("__"));

        let settings = builder.build()?;
        settings.try_deserialize()
    }

    #[cfg(test)]
    fn parse(toml: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [backend]
            remote_base = "https://duel.example.com"

            [player]
            identity = "bob"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.local_base, "http://localhost:8080");
        assert_eq!(config.backend.probe_timeout_ms, 1500);
        assert_eq!(config.player.difficulty, Difficulty::Medium);
        assert_eq!(config.player.rounds, 1);
        assert_eq!(config.signaling, SignalingConfig::default());
        assert!(config.solution.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
            [backend]
            local_base = "http://127.0.0.1:9000"
            remote_base = "https://duel.example.com"

            [player]
            identity = "carol"
            difficulty = "hard"
            rounds = 3
            token = "secret"

            [signaling]
            reconnect_interval_ms = 1000
            max_reconnect_attempts = 4

            [solution]
            language = "rust"
            path = "solutions/main.rs"
            "#,
        )
        .unwrap();

        assert_eq!(config.player.difficulty, Difficulty::Hard);
        assert_eq!(config.player.token.as_deref(), Some("secret"));
        assert_eq!(config.signaling.max_reconnect_attempts, Some(4));
        assert_eq!(config.signaling.heartbeat_outgoing_ms, 10_000);
        assert_eq!(config.solution.unwrap().language, "rust");
    }

    #[test]
    fn test_shipped_config_parses() {
        let shipped = include_str!("../config.toml");
        let config = Config::parse(shipped).unwrap();
        assert_eq!(config.player.identity, "alice");
    }

    #[test]
    fn test_unknown_difficulty_rejected() {
        let result = Config::parse(
            r#"
            [backend]
            remote_base = "https://duel.example.com"

            [player]
            identity = "bob"
            difficulty = "legendary"
            "#,
        );
        assert!(result.is_err());
    }
}
