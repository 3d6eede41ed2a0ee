use anyhow::{bail, Context, Result};
use axum::http::HeaderValue;
use std::{env, path::PathBuf};

use crate::store::RelationLoading;

pub const DEFAULT_LATEST_BUNDLE: &str = "/media/exports/robomission-latest.zip";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub media_dir: PathBuf,
    pub latest_bundle_url: String,
    pub run_migrations: bool,
    pub prefetch_relations: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL not set")?;

        let port = match lookup("PORT") {
            Some(v) => v.parse().with_context(|| format!("PORT is not a port number: {v}"))?,
            None => 8000,
        };
        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("DB_MAX_CONNECTIONS is not a count: {v}"))?,
            None => 5,
        };

        let latest_bundle_url =
            lookup("LATEST_BUNDLE_URL").unwrap_or_else(|| DEFAULT_LATEST_BUNDLE.into());
        if latest_bundle_url.is_empty() || HeaderValue::from_str(&latest_bundle_url).is_err() {
            bail!("LATEST_BUNDLE_URL is not a usable Location: {latest_bundle_url:?}");
        }

        Ok(Self {
            database_url,
            port,
            max_connections,
            media_dir: PathBuf::from(lookup("MEDIA_DIR").unwrap_or_else(|| "./media".into())),
            latest_bundle_url,
            run_migrations: flag(&lookup, "RUN_MIGRATIONS", true)?,
            prefetch_relations: flag(&lookup, "PREFETCH_RELATIONS", true)?,
        })
    }

    pub fn relation_loading(&self) -> RelationLoading {
        if self.prefetch_relations {
            RelationLoading::Batched
        } else {
            RelationLoading::PerRecord
        }
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{key} must be a boolean, got {raw:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&[("DATABASE_URL", "postgres://localhost/learn")]).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.latest_bundle_url, DEFAULT_LATEST_BUNDLE);
        assert!(cfg.run_migrations);
        assert_eq!(cfg.relation_loading(), RelationLoading::Batched);
    }

    #[test]
    fn database_url_is_required() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = load(&[("DATABASE_URL", "x"), ("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
        let err = load(&[("DATABASE_URL", "x"), ("PREFETCH_RELATIONS", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("PREFETCH_RELATIONS"));
    }

    #[test]
    fn prefetch_can_be_switched_off() {
        let cfg = load(&[("DATABASE_URL", "x"), ("PREFETCH_RELATIONS", "off")]).unwrap();
        assert_eq!(cfg.relation_loading(), RelationLoading::PerRecord);
    }
}
