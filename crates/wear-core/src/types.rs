use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AppError, AppResult};

/// Closed set of outfit parts (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutfitPart {
    Head,
    Top,
    Bottom,
    Footwear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unisex,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    pub fn is_yes(self) -> bool {
        matches!(self, YesNo::Yes)
    }
}

/// Weather condition group, closed per spec.md §3. Any upstream value
/// outside this set is bucketed into `Extreme` — see DESIGN.md for why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherGroup {
    Clear,
    Clouds,
    Rain,
    Snow,
    Thunderstorm,
    Drizzle,
    Mist,
    Extreme,
}

impl WeatherGroup {
    pub fn from_upstream(main: &str) -> Self {
        match main.to_ascii_lowercase().as_str() {
            "clear" => WeatherGroup::Clear,
            "clouds" => WeatherGroup::Clouds,
            "rain" => WeatherGroup::Rain,
            "snow" => WeatherGroup::Snow,
            "thunderstorm" => WeatherGroup::Thunderstorm,
            "drizzle" => WeatherGroup::Drizzle,
            "mist" | "fog" | "haze" => WeatherGroup::Mist,
            _ => WeatherGroup::Extreme,
        }
    }
}

/// Inclusive temperature range. Missing bounds are treated as -inf / +inf
/// (spec.md §3). `min <= max` is enforced once both bounds are concrete.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempRange {
    pub min: f64,
    pub max: f64,
}

impl TempRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> AppResult<Self> {
        let min = min.unwrap_or(f64::NEG_INFINITY);
        let max = max.unwrap_or(f64::INFINITY);
        if min > max {
            return Err(AppError::InvalidRequest(format!(
                "temp_range.min ({min}) must be <= temp_range.max ({max})"
            )));
        }
        Ok(TempRange { min, max })
    }

    pub fn contains(&self, temperature: f64) -> bool {
        // Integer-truncated, inclusive-inclusive per spec.md §4.5 /
        // §9 (the spec adopts inclusive-inclusive over the source's
        // accidental upper-exclusive behaviour).
        let t = temperature.trunc();
        let lo = if self.min.is_finite() { self.min.trunc() } else { self.min };
        let hi = if self.max.is_finite() { self.max.trunc() } else { self.max };
        lo <= t && t <= hi
    }
}

fn deserialize_fit<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FitField {
        One(String),
        Many(Vec<String>),
    }

    Ok(match FitField::deserialize(deserializer)? {
        FitField::One(s) => BTreeSet::from([s]),
        FitField::Many(v) => v.into_iter().collect(),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct RawTempRange {
    #[serde(rename = "Min")]
    min: Option<f64>,
    #[serde(rename = "Max")]
    max: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct AssetItemRaw {
    #[serde(rename = "AssetName")]
    asset_name: String,
    #[serde(rename = "OutfitPart")]
    outfit_part: OutfitPart,
    #[serde(rename = "Color")]
    color: String,
    #[serde(rename = "Style")]
    style: Vec<String>,
    #[serde(rename = "Gender")]
    gender: Gender,
    #[serde(rename = "Fit", deserialize_with = "deserialize_fit")]
    fit: BTreeSet<String>,
    #[serde(rename = "Season")]
    season: Vec<String>,
    #[serde(rename = "Condition")]
    condition: Vec<String>,
    #[serde(rename = "TempRange")]
    temp_range: RawTempRange,
    #[serde(rename = "Wind")]
    wind: YesNo,
    #[serde(rename = "Rain")]
    rain: YesNo,
    #[serde(rename = "Snow")]
    snow: YesNo,
}

/// One immutable clothing catalog entry (spec.md §3).
#[derive(Debug, Clone, Serialize)]
pub struct AssetItem {
    pub asset_name: String,
    pub outfit_part: OutfitPart,
    pub color: String,
    pub style: BTreeSet<String>,
    pub gender: Gender,
    pub fit: BTreeSet<String>,
    pub season: BTreeSet<String>,
    pub condition: BTreeSet<String>,
    pub temp_range: TempRange,
    pub wind: YesNo,
    pub rain: YesNo,
    pub snow: YesNo,
}

impl<'de> Deserialize<'de> for AssetItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = AssetItemRaw::deserialize(deserializer)?;
        AssetItem::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<AssetItemRaw> for AssetItem {
    type Error = AppError;

    fn try_from(raw: AssetItemRaw) -> Result<Self, Self::Error> {
        Ok(AssetItem {
            asset_name: raw.asset_name,
            outfit_part: raw.outfit_part,
            color: raw.color,
            style: raw.style.into_iter().collect(),
            gender: raw.gender,
            fit: raw.fit,
            season: raw.season.into_iter().collect(),
            condition: raw.condition.into_iter().collect(),
            temp_range: TempRange::new(raw.temp_range.min, raw.temp_range.max)?,
            wind: raw.wind,
            rain: raw.rain,
            snow: raw.snow,
        })
    }
}

/// Normalized, cache-ready weather record (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub temperature: f64,
    pub feels_like: f64,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub humidity: i64,
    pub pressure: i64,
    pub description: String,
    pub weather_group: WeatherGroup,
    pub wind_speed: f64,
    #[serde(default)]
    pub rain: f64,
    #[serde(default)]
    pub snow: f64,
    pub weather_id: Option<i64>,
    pub location: String,
    pub country: String,
    pub timestamp: i64,
    pub sunrise: i64,
    pub sunset: i64,
}

impl WeatherSnapshot {
    /// Validates the rain/snow exclusivity invariant (spec.md §3).
    pub fn validate(&self) -> AppResult<()> {
        if self.rain > 0.0 && self.snow > 0.0 {
            return Err(AppError::InvalidRequest(
                "weather snapshot cannot report both rain and snow".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metadata sibling of a weather-value cache entry (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCacheEntry {
    pub location_key: String,
    pub last_updated: i64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub request_count: u64,
}

fn default_active() -> bool {
    true
}

/// A single outfit suggestion in the uncategorized response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutfitRecommendation {
    pub head: Option<String>,
    pub top: Option<String>,
    pub bottom: Option<String>,
    pub footwear: Option<String>,
    pub description: String,
    pub weather_appropriate_score: f64,
    pub style_score: f64,
    pub created_at: i64,
}

impl OutfitRecommendation {
    /// Enforces "at least one of top/bottom non-null and footwear non-null"
    /// (spec.md §3).
    pub fn validate(&self) -> AppResult<()> {
        if self.top.is_none() && self.bottom.is_none() {
            return Err(AppError::LlmOutputMalformed(
                "outfit recommendation has neither a top nor a bottom".to_string(),
            ));
        }
        if self.footwear.is_none() {
            return Err(AppError::LlmOutputMalformed(
                "outfit recommendation is missing footwear".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub location: Option<String>,
    pub recommendations: Vec<OutfitRecommendation>,
    pub weather_summary: String,
    pub style_notes: String,
    pub generated_at: i64,
}

/// Four ranked outfit-part lists (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CategorizedRecommendation {
    #[serde(default)]
    pub head: Vec<String>,
    #[serde(default)]
    pub top: Vec<String>,
    #[serde(default)]
    pub bottom: Vec<String>,
    #[serde(default)]
    pub footwear: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub additional_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizedRecommendationResponse {
    pub recommendations: CategorizedRecommendation,
    pub weather_summary: String,
    pub style_notes: String,
    pub generated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_range_boundary_inclusive() {
        let range = TempRange::new(Some(10.0), Some(20.0)).unwrap();
        for t in [10.0, 15.0, 20.0] {
            assert!(range.contains(t), "{t} should pass");
        }
        for t in [9.0, 21.0] {
            assert!(!range.contains(t), "{t} should fail");
        }
    }

    #[test]
    fn temp_range_missing_bounds_become_infinite() {
        let range = TempRange::new(None, Some(5.0)).unwrap();
        assert!(range.contains(-1000.0));
        assert!(!range.contains(6.0));
    }

    #[test]
    fn temp_range_rejects_inverted_bounds() {
        assert!(TempRange::new(Some(20.0), Some(10.0)).is_err());
    }

    #[test]
    fn weather_snapshot_rejects_simultaneous_precipitation() {
        let snapshot = WeatherSnapshot {
            temperature: 1.0,
            feels_like: 1.0,
            temperature_min: None,
            temperature_max: None,
            humidity: 50,
            pressure: 1000,
            description: "snow".to_string(),
            weather_group: WeatherGroup::Snow,
            wind_speed: 1.0,
            rain: 1.0,
            snow: 1.0,
            weather_id: None,
            location: "Warsaw".to_string(),
            country: "PL".to_string(),
            timestamp: 0,
            sunrise: 0,
            sunset: 0,
        };
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn asset_item_accepts_single_string_fit() {
        let json = serde_json::json!({
            "AssetName": "tshirt_001.png",
            "OutfitPart": "top",
            "Color": "black",
            "Style": ["casual"],
            "Gender": "male",
            "Fit": "normal",
            "Season": ["summer"],
            "Condition": ["clear"],
            "TempRange": {"Min": 20, "Max": 30},
            "Wind": "yes",
            "Rain": "no",
            "Snow": "no"
        });
        let asset: AssetItem = serde_json::from_value(json).unwrap();
        assert_eq!(asset.fit, BTreeSet::from(["normal".to_string()]));
    }

    #[test]
    fn asset_item_accepts_fit_list() {
        let json = serde_json::json!({
            "AssetName": "tshirt_002.png",
            "OutfitPart": "top",
            "Color": "black",
            "Style": ["casual"],
            "Gender": "male",
            "Fit": ["normal", "slim"],
            "Season": ["summer"],
            "Condition": ["clear"],
            "TempRange": {"Min": 20, "Max": 30},
            "Wind": "yes",
            "Rain": "no",
            "Snow": "no"
        });
        let asset: AssetItem = serde_json::from_value(json).unwrap();
        assert_eq!(asset.fit.len(), 2);
    }
}
