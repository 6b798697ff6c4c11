use wear_core::error::{AppError, AppResult};
use wear_core::types::WeatherSnapshot;

/// HTTP client for the weather service's own API, grounded in
/// `original_source`'s `services/weather_client.py::WeatherClient`.
pub struct WeatherServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl WeatherServiceClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn get_weather(&self, city: &str) -> AppResult<WeatherSnapshot> {
        let url = format!("{}/api/v1/weather/city/{}", self.base_url, city);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("no weather data for {city}")));
        }
        if !response.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "weather service returned status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::UpstreamSchema(e.to_string()))
    }
}
