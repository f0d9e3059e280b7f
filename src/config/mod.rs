use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

const ENV_PREFIX: &str = "hub";

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// URL path the websocket upgrade is accepted on, e.g. `/ws`.
    pub endpoint: String,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Slots in the shared handoff queue between read loops and the dispatcher.
    pub handoff_capacity: usize,
    /// Upper bound on handler invocations running at the same time.
    pub max_in_flight_handlers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handoff_capacity: 1,
            max_in_flight_handlers: default_max_in_flight(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
}

fn default_max_in_flight() -> usize {
    num_cpus::get() * 64
}

fn with_defaults(environment: &str) -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Config::builder()
        .set_default("environment", environment)?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.endpoint", "/ws")?
        .set_default("dispatch.handoff_capacity", 1)?
        .set_default("dispatch.max_in_flight_handlers", default_max_in_flight() as i64)
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let settings: Settings = with_defaults(&run_mode)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // E.g., `HUB_SERVER__PORT=5001` would set `Settings.server.port`
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    #[cfg(test)]
    pub fn new_for_test() -> Result<Self, ConfigError> {
        let settings: Settings = with_defaults("test")?
            .set_override("server.port", 0)?
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.endpoint.starts_with('/') {
            return Err(ConfigError::Message(format!(
                "server.endpoint must start with '/', got {:?}",
                self.server.endpoint
            )));
        }
        if self.dispatch.handoff_capacity == 0 {
            return Err(ConfigError::Message("dispatch.handoff_capacity must be at least 1".into()));
        }
        if self.dispatch.max_in_flight_handlers == 0 {
            return Err(ConfigError::Message("dispatch.max_in_flight_handlers must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::new_for_test().expect("Failed to load settings");
        assert_eq!(settings.environment, "test");
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.server.endpoint, "/ws");
        assert_eq!(settings.dispatch.handoff_capacity, 1);
        assert_eq!(settings.dispatch.max_in_flight_handlers, num_cpus::get() * 64);
        assert_eq!(settings.server.address(), "127.0.0.1:0");
    }

    #[test]
    fn test_environment_override() {
        // prefix not shared with any other test
        env::set_var("HUBTEST_SERVER__PORT", "9000");
        env::set_var("HUBTEST_SERVER__ENDPOINT", "/socket");
        env::set_var("HUBTEST_DISPATCH__HANDOFF_CAPACITY", "16");

        let settings: Settings = with_defaults("test")
            .unwrap()
            .add_source(
                Environment::with_prefix("hubtest")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.endpoint, "/socket");
        assert_eq!(settings.dispatch.handoff_capacity, 16);
        assert!(settings.validate().is_ok());

        env::remove_var("HUBTEST_SERVER__PORT");
        env::remove_var("HUBTEST_SERVER__ENDPOINT");
        env::remove_var("HUBTEST_DISPATCH__HANDOFF_CAPACITY");
    }

    #[test]
    fn test_environment_follows_run_mode() {
        env::set_var("RUN_MODE", "staging");
        let settings = Settings::new();
        env::remove_var("RUN_MODE");

        assert_eq!(settings.expect("Failed to load settings").environment, "staging");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::new_for_test().unwrap();
        settings.server.endpoint = "ws".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::new_for_test().unwrap();
        settings.dispatch.handoff_capacity = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::new_for_test().unwrap();
        settings.dispatch.max_in_flight_handlers = 0;
        assert!(settings.validate().is_err());
    }
}
