use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Layered configuration, grounded in the weather service's own
/// `Settings::load()`, itself adapted from the teacher's `Settings::new()`.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub port: u16,
    pub weather_service_url: String,
    pub redis_url: String,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub assets_path: String,
    pub max_recommendations: usize,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("port", 8082)?
            .set_default("weather_service_url", "http://127.0.0.1:8081")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("llm_base_url", "https://api.openai.com/v1")?
            .set_default("llm_model", "gpt-4o-mini")?
            .set_default("assets_path", "sample_data/clothing_catalog.json")?
            .set_default("max_recommendations", 5)?
            .add_source(File::with_name("config/recommendation-service").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("RECOMMENDATION").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;

        if settings.llm_api_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "llm_api_key is required and cannot be empty".to_string(),
            ));
        }

        Ok(settings)
    }
}
