use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::forecast::Forecast;
use crate::types::{WeatherGroup, WeatherSnapshot};

/// Weather data source (spec.md §4.2). One provider backs both the
/// current-conditions and forecast operations, mirroring the source's
/// single `OpenWeatherService`.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current_by_city(&self, city: &str, country: Option<&str>) -> AppResult<WeatherSnapshot>;
    async fn current_by_coords(&self, lat: f64, lon: f64) -> AppResult<WeatherSnapshot>;
    async fn forecast_by_city(&self, city: &str, country: Option<&str>) -> AppResult<Forecast>;
}

/// LLM-backed outfit recommender (spec.md §4.6). The wire format between
/// service and provider is an explicit out-of-scope boundary contract, so
/// this is a plain OpenAI-chat-compatible client rather than a vendor SDK
/// — the pack carries no `async-openai` dependency anywhere.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> AppResult<String>;
}

const MAX_RETRIES: u32 = 3;

fn retry_delay(attempt: u32, backoff_factor: f64) -> Duration {
    let base = backoff_factor * 2f64.powi(attempt as i32);
    let jitter = rand::thread_rng().gen_range(0.0..0.1);
    Duration::from_secs_f64(base + jitter)
}

/// OpenWeatherMap-shaped HTTP client, grounded in `original_source`'s
/// `services/openweather.py::_make_request` retry loop.
pub struct OpenWeatherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    backoff_factor: f64,
}

impl OpenWeatherClient {
    pub fn new(base_url: String, api_key: String, backoff_factor: f64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            backoff_factor,
        }
    }

    async fn get_with_retry(&self, path: &str, query: &[(&str, String)]) -> AppResult<serde_json::Value> {
        let mut query: Vec<(&str, String)> = query.to_vec();
        query.push(("appid", self.api_key.clone()));
        query.push(("units", "metric".to_string()));

        let url = format!("{}{}", self.base_url, path);
        let mut last_err = String::new();

        for attempt in 0..MAX_RETRIES {
            let response = self.http.get(&url).query(&query).send().await;
            match response {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(AppError::NotFound("weather data not found".to_string()));
                }
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| AppError::UpstreamSchema(e.to_string()));
                }
                Ok(resp) => {
                    last_err = format!("upstream returned status {}", resp.status());
                }
                Err(e) => {
                    last_err = e.to_string();
                }
            }
            if attempt + 1 < MAX_RETRIES {
                tokio::time::sleep(retry_delay(attempt, self.backoff_factor)).await;
            }
        }

        Err(AppError::UpstreamUnavailable(last_err))
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    pressure: i64,
    humidity: i64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    id: i64,
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
}

#[derive(Debug, Deserialize, Default)]
struct OwPrecip {
    #[serde(rename = "1h", default)]
    one_hour: f64,
}

#[derive(Debug, Deserialize)]
struct OwSys {
    country: Option<String>,
    sunrise: Option<i64>,
    sunset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwResponse {
    name: Option<String>,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
    #[serde(default)]
    rain: Option<OwPrecip>,
    #[serde(default)]
    snow: Option<OwPrecip>,
    sys: Option<OwSys>,
    dt: i64,
}

fn parse_weather_response(raw: serde_json::Value, fallback_location: &str) -> AppResult<WeatherSnapshot> {
    let parsed: OwResponse = serde_json::from_value(raw)
        .map_err(|e| AppError::UpstreamSchema(format!("unexpected weather payload: {e}")))?;

    let condition = parsed
        .weather
        .first()
        .ok_or_else(|| AppError::UpstreamSchema("weather array is empty".to_string()))?;

    let sys = parsed.sys.unwrap_or(OwSys {
        country: None,
        sunrise: None,
        sunset: None,
    });

    Ok(WeatherSnapshot {
        temperature: parsed.main.temp,
        feels_like: parsed.main.feels_like,
        temperature_min: parsed.main.temp_min,
        temperature_max: parsed.main.temp_max,
        humidity: parsed.main.humidity,
        pressure: parsed.main.pressure,
        description: condition.description.clone(),
        weather_group: WeatherGroup::from_upstream(&condition.main),
        wind_speed: parsed.wind.speed,
        rain: parsed.rain.map(|p| p.one_hour).unwrap_or(0.0),
        snow: parsed.snow.map(|p| p.one_hour).unwrap_or(0.0),
        weather_id: Some(condition.id),
        location: parsed.name.unwrap_or_else(|| fallback_location.to_string()),
        country: sys.country.unwrap_or_default(),
        timestamp: parsed.dt,
        sunrise: sys.sunrise.unwrap_or(0),
        sunset: sys.sunset.unwrap_or(0),
    })
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn current_by_city(&self, city: &str, country: Option<&str>) -> AppResult<WeatherSnapshot> {
        let q = match country {
            Some(cc) => format!("{city},{cc}"),
            None => city.to_string(),
        };
        let raw = self.get_with_retry("/weather", &[("q", q)]).await?;
        parse_weather_response(raw, city)
    }

    async fn current_by_coords(&self, lat: f64, lon: f64) -> AppResult<WeatherSnapshot> {
        let raw = self
            .get_with_retry(
                "/weather",
                &[("lat", lat.to_string()), ("lon", lon.to_string())],
            )
            .await?;
        parse_weather_response(raw, &format!("{lat:.2},{lon:.2}"))
    }

    async fn forecast_by_city(&self, city: &str, country: Option<&str>) -> AppResult<Forecast> {
        let q = match country {
            Some(cc) => format!("{city},{cc}"),
            None => city.to_string(),
        };
        let raw = self.get_with_retry("/forecast", &[("q", q)]).await?;
        serde_json::from_value(raw)
            .map_err(|e| AppError::UpstreamSchema(format!("unexpected forecast payload: {e}")))
    }
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-chat-shaped HTTP client (spec.md §4.6), grounded in
/// `original_source`'s `llm/openai_handler.py`.
pub struct ChatLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatLlmClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LLMProvider for ChatLlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> AppResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.7,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt = 0u32;
        loop {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    if attempt + 1 >= MAX_RETRIES {
                        return Err(AppError::LlmRateLimited);
                    }
                }
                Ok(resp) if resp.status().is_success() => {
                    let parsed: ChatResponse = resp
                        .json()
                        .await
                        .map_err(|e| AppError::LlmOutputMalformed(e.to_string()))?;
                    return parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| AppError::LlmOutputMalformed("empty choices array".to_string()));
                }
                Ok(resp) => {
                    return Err(AppError::UpstreamUnavailable(format!(
                        "llm provider returned status {}",
                        resp.status()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    if attempt + 1 >= MAX_RETRIES {
                        return Err(AppError::LlmTimeout);
                    }
                }
                Err(e) => return Err(AppError::UpstreamUnavailable(e.to_string())),
            }

            let delay = Duration::from_secs_f64((1u64 << attempt) as f64).min(Duration::from_secs(10));
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_weather_response_maps_fields_and_defaults_precipitation() {
        let raw = serde_json::json!({
            "name": "Warsaw",
            "main": {"temp": 10.0, "feels_like": 8.5, "temp_min": 9.0, "temp_max": 11.0, "pressure": 1012, "humidity": 70},
            "weather": [{"id": 800, "main": "Clear", "description": "clear sky"}],
            "wind": {"speed": 3.1},
            "sys": {"country": "PL", "sunrise": 100, "sunset": 200},
            "dt": 1000
        });
        let snapshot = parse_weather_response(raw, "fallback").unwrap();
        assert_eq!(snapshot.location, "Warsaw");
        assert_eq!(snapshot.country, "PL");
        assert_eq!(snapshot.rain, 0.0);
        assert_eq!(snapshot.snow, 0.0);
        assert!(matches!(snapshot.weather_group, WeatherGroup::Clear));
    }

    #[test]
    fn parse_weather_response_rejects_empty_weather_array() {
        let raw = serde_json::json!({
            "main": {"temp": 10.0, "feels_like": 8.5, "temp_min": null, "temp_max": null, "pressure": 1012, "humidity": 70},
            "weather": [],
            "wind": {"speed": 3.1},
            "dt": 1000
        });
        assert!(parse_weather_response(raw, "fallback").is_err());
    }

    #[test]
    fn retry_delay_grows_with_attempt() {
        let first = retry_delay(0, 0.5).as_secs_f64();
        let second = retry_delay(1, 0.5).as_secs_f64();
        assert!(second > first, "{second} should exceed {first}");
    }
}
