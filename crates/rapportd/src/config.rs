use std::path::PathBuf;

use rapport_core::types::Expression;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("RAPPORT_TARGET_ID must be set — the target identity is fixed per run")]
    MissingTarget,
    #[error("RAPPORT_POSITIVE_LABEL: {0}")]
    BadPositiveLabel(String),
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the JSON identity roster supplied by the identity directory.
    pub roster_path: PathBuf,
    /// Path to the SQLite edge-weight mirror.
    pub db_path: PathBuf,
    /// Euclidean distance threshold for a positive match.
    pub match_threshold: f32,
    /// Sampling tick period in milliseconds.
    pub tick_period_ms: u64,
    /// Fixed target identity whose expression drives the event weight.
    pub target_id: String,
    /// Initial owner identity; may be unset and changed at runtime.
    pub owner_id: Option<String>,
    /// Expression label that selects the high weight.
    pub positive_label: Expression,
    /// Weight for a positively-expressed interaction.
    pub weight_high: u32,
    /// Weight for any other interaction.
    pub weight_low: u32,
    /// Optional suppression window after a qualifying tick (0 = off).
    pub event_cooldown_ms: u64,
}

impl Config {
    /// Load configuration from `RAPPORT_*` environment variables with
    /// defaults. Only the target identity is mandatory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rapport");

        let roster_path = std::env::var("RAPPORT_ROSTER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/rapport/roster.json"));

        let db_path = std::env::var("RAPPORT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("edges.db"));

        let target_id = std::env::var("RAPPORT_TARGET_ID").map_err(|_| ConfigError::MissingTarget)?;
        let owner_id = std::env::var("RAPPORT_OWNER_ID").ok().filter(|v| !v.is_empty());

        let positive_label = match std::env::var("RAPPORT_POSITIVE_LABEL") {
            Ok(raw) => raw.parse().map_err(ConfigError::BadPositiveLabel)?,
            Err(_) => Expression::Happy,
        };

        Ok(Self {
            roster_path,
            db_path,
            match_threshold: env_f32("RAPPORT_MATCH_THRESHOLD", 0.6),
            tick_period_ms: env_u64("RAPPORT_TICK_PERIOD_MS", 2000),
            target_id,
            owner_id,
            positive_label,
            weight_high: env_u32("RAPPORT_WEIGHT_HIGH", 5),
            weight_low: env_u32("RAPPORT_WEIGHT_LOW", 1),
            event_cooldown_ms: env_u64("RAPPORT_EVENT_COOLDOWN_MS", 0),
        })
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
