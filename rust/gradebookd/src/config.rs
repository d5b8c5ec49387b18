use anyhow::{anyhow, Context};
use std::path::PathBuf;

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace opened at startup, before any `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub session_ttl_hours: i64,
    pub log_filter: String,
    /// When set, the `admin` user is bootstrapped into every opened workspace.
    pub admin_password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            admin_password: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut cfg = Self::default();
        cfg.workspace = non_blank("GRADEBOOKD_WORKSPACE").map(PathBuf::from);
        if let Some(raw) = non_blank("GRADEBOOKD_SESSION_TTL_HOURS") {
            let hours: i64 = raw
                .trim()
                .parse()
                .with_context(|| format!("GRADEBOOKD_SESSION_TTL_HOURS is not an integer: {raw}"))?;
            if !(1..=24 * 365).contains(&hours) {
                return Err(anyhow!(
                    "GRADEBOOKD_SESSION_TTL_HOURS must be in 1..=8760 (got {hours})"
                ));
            }
            cfg.session_ttl_hours = hours;
        }
        if let Some(filter) = non_blank("GRADEBOOKD_LOG") {
            cfg.log_filter = filter.trim().to_string();
        }
        cfg.admin_password = non_blank("GRADEBOOKD_ADMIN_PASSWORD");
        Ok(cfg)
    }
}
