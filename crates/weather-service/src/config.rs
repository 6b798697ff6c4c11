use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Layered configuration: built-in defaults, then an optional config file,
/// then `WEATHER_`-prefixed environment variables — grounded in the
/// teacher's `Settings::new()` (`config_ref.rs` was its starting point).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub port: u16,
    pub openweather_api_key: String,
    pub openweather_base_url: String,
    pub openweather_backoff_factor: f64,
    pub redis_url: String,
    pub proximity_precision: f64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("port", 8081)?
            .set_default("openweather_base_url", "https://api.openweathermap.org/data/2.5")?
            .set_default("openweather_backoff_factor", 0.5)?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("proximity_precision", 5.0)?
            .add_source(File::with_name("config/weather-service").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("WEATHER").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;

        if settings.openweather_api_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "openweather_api_key is required and cannot be empty".to_string(),
            ));
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_api_key() {
        std::env::remove_var("WEATHER_OPENWEATHER_API_KEY");
        let result = Settings::load();
        assert!(result.is_err());
    }
}
