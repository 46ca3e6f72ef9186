//! Environment configuration (§6). Recognized keys only; anything else in
//! the environment is ignored.

use crate::error::{BimAtlasError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub graph_name: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Testable indirection over the environment lookup.
    pub fn from_source(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key).ok_or_else(|| {
                BimAtlasError::validation(format!("missing required environment key {key}"))
            })
        };

        let db_port: u16 = required("DB_PORT")?
            .parse()
            .map_err(|_| BimAtlasError::validation("DB_PORT must be a valid port number"))?;
        let port: u16 = required("PORT")?
            .parse()
            .map_err(|_| BimAtlasError::validation("PORT must be a valid port number"))?;

        Ok(Config {
            db_host: required("DB_HOST")?,
            db_port,
            db_name: required("DB_NAME")?,
            db_user: required("DB_USER")?,
            db_password: required("DB_PASSWORD")?,
            graph_name: lookup("GRAPH_NAME").unwrap_or_else(|| "bimatlas".to_string()),
            port,
        })
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}
