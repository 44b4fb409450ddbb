use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Selects the Postgres store; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// JSON file seeding the in-memory store.
    pub seed_file: Option<String>,
    pub jwt_secret: String,
    pub jwt_expires_in_secs: i64,
    pub bcrypt_cost: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .set_default("server_port", 5000)?
            .set_default("database_max_connections", 8)?
            .set_default("jwt_expires_in_secs", 3600)?
            .set_default("bcrypt_cost", i64::from(bcrypt::DEFAULT_COST))?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;
        config.try_deserialize()
    }
}
