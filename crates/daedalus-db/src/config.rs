use crate::Result;
use ::config::{Config, Environment};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::fmt;

/// Connection parameters for the metadata database.
///
/// Read from `DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASS` and `DB_NAME`.
/// `DAEDALUS_DEV_HOST` and `DAEDALUS_DEV_PORT` are still honored when the
/// `DB_*` equivalent is unset.
#[derive(Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub user: String,

    #[serde(rename = "pass")]
    pub password: String,

    #[serde(rename = "name", default = "default_database")]
    pub database: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "daedalus_dev".to_string()
}

impl DbConfig {
    /// Build config from environment variables (load `.env` first if wanted).
    pub fn from_env() -> Result<Self> {
        Self::from_environment(
            Environment::with_prefix("DAEDALUS_DEV"),
            Environment::with_prefix("DB"),
        )
    }

    fn from_environment(legacy: Environment, environment: Environment) -> Result<Self> {
        let config = Config::builder()
            .add_source(legacy)
            .add_source(environment)
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"********")
            .field("database", &self.database)
            .finish()
    }
}
