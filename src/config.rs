//! Configuration: code-level defaults deep-merged with an optional TOML
//! override file.
//!
//! Merge rule: recurse into nested tables; on a scalar conflict the override
//! wins; keys present only in the defaults are kept. Keys present only in
//! the override are ignored — the defaults define the config surface.

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbConfig {
    /// sqlite connection string, e.g. `sqlite://aweb.db` or `sqlite::memory:`.
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Server secret mixed into every cookie signature.
    pub secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig { addr: "127.0.0.1:9000".into() },
            db: DbConfig {
                url: "sqlite://aweb.db".into(),
                min_connections: 1,
                max_connections: 10,
            },
            session: SessionConfig { secret: "Awesome".into() },
        }
    }
}

impl Config {
    /// Loads the defaults, merged with the TOML file at `path` when it
    /// exists. A missing file is not an error; an unreadable one is.
    pub fn load(path: &str) -> Result<Self, Error> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let override_value: toml::Value =
            toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        Self::default().merged(&override_value)
    }

    /// Deep-merges `override_value` over this config.
    pub fn merged(&self, override_value: &toml::Value) -> Result<Self, Error> {
        let defaults =
            toml::Value::try_from(self).map_err(|e| Error::Config(e.to_string()))?;
        let merged = merge(&defaults, override_value);
        merged.try_into().map_err(|e: toml::de::Error| Error::Config(e.to_string()))
    }
}

fn merge(defaults: &toml::Value, over: &toml::Value) -> toml::Value {
    match (defaults, over) {
        (toml::Value::Table(base), toml::Value::Table(top)) => {
            let mut out = toml::map::Map::new();
            for (k, v) in base {
                match top.get(k) {
                    Some(o) => out.insert(k.clone(), merge(v, o)),
                    None => out.insert(k.clone(), v.clone()),
                };
            }
            toml::Value::Table(out)
        }
        (_, o) => o.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_scalar_wins_nested_tables_recurse() {
        let over: toml::Value = toml::from_str(
            r#"
            [db]
            url = "sqlite::memory:"

            [session]
            secret = "s3cret"
            "#,
        )
        .unwrap();
        let cfg = Config::default().merged(&over).unwrap();
        assert_eq!(cfg.db.url, "sqlite::memory:");
        assert_eq!(cfg.session.secret, "s3cret");
        // untouched defaults survive the merge
        assert_eq!(cfg.db.max_connections, 10);
        assert_eq!(cfg.server.addr, "127.0.0.1:9000");
    }

    #[test]
    fn unknown_override_keys_are_ignored() {
        let over: toml::Value = toml::from_str("[cache]\nsize = 5\n").unwrap();
        let cfg = Config::default().merged(&over).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load("/definitely/not/here.toml").unwrap();
        assert_eq!(cfg, Config::default());
    }
}
