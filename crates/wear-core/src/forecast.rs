use serde::{Deserialize, Serialize};

/// 5-day/3-hour forecast, recovered from `original_source`'s
/// `schemas/forecast.py` — dropped from spec.md's data model section but
/// required by the `forecast_by_city` operation and the weather provider
/// contract (spec.md §4.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastMain {
    #[serde(rename = "temp")]
    pub temperature: f64,
    pub feels_like: f64,
    #[serde(rename = "temp_min")]
    pub temperature_min: f64,
    #[serde(rename = "temp_max")]
    pub temperature_max: f64,
    pub pressure: i64,
    pub sea_level: Option<i64>,
    #[serde(rename = "grnd_level")]
    pub ground_level: Option<i64>,
    pub humidity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherCondition {
    pub id: i64,
    pub main: String,
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudInfo {
    pub all: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindInfo {
    pub speed: f64,
    pub deg: i64,
    pub gust: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecipInfo {
    #[serde(rename = "3h")]
    pub three_hour: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaypartInfo {
    pub pod: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub dt: i64,
    pub main: ForecastMain,
    pub weather: Vec<WeatherCondition>,
    pub clouds: CloudInfo,
    pub wind: WindInfo,
    pub visibility: Option<i64>,
    pub pop: f64,
    pub rain: Option<PrecipInfo>,
    pub snow: Option<PrecipInfo>,
    pub sys: DaypartInfo,
    pub dt_txt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityInfo {
    pub id: i64,
    pub name: String,
    pub coord: Coordinates,
    pub country: String,
    pub population: i64,
    pub timezone: i64,
    pub sunrise: i64,
    pub sunset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    #[serde(rename = "cod")]
    pub code: String,
    pub message: i64,
    #[serde(rename = "cnt")]
    pub count: i64,
    #[serde(rename = "list")]
    pub points: Vec<ForecastPoint>,
    pub city: CityInfo,
}
