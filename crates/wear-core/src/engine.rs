use std::sync::Arc;

use serde::Deserialize;

use crate::catalog::AssetCatalog;
use crate::error::{AppError, AppResult};
use crate::filter::ParallelFilterSystem;
use crate::kv::{get_json, set_json_best_effort, KvStore};
use crate::preferences::Preferences;
use crate::types::{
    AssetItem, CategorizedRecommendation, CategorizedRecommendationResponse, OutfitRecommendation,
    RecommendationResponse, WeatherSnapshot,
};
use crate::upstream::LLMProvider;

const DEFAULT_MAX_RECOMMENDATIONS: usize = 5;
const RECOMMENDATION_CACHE_TTL_SECS: u64 = 1_800;
const NOT_AVAILABLE: &str = "N/A";

const STYLIST_PROMPT_TEMPLATE: &str = r#"You are a professional stylist. Given the current weather and a list of
available clothing assets, recommend complete outfits. Respond with JSON
only, shaped as {"recommendation_1": [{"head": ..., "top": ..., "bottom": ...,
"footwear": ..., "description": ...}], "recommendation_2": [...], ...}. Every
outfit must include a top or a bottom, and must always include footwear."#;

/// Orchestrates weather + catalog + LLM into ranked outfit recommendations
/// (spec.md §4.6), grounded in `original_source`'s
/// `recommendation_kernel/engine.py::RecommendationEngine`.
pub struct RecommendationEngine {
    catalog: Arc<AssetCatalog>,
    filter: ParallelFilterSystem,
    llm: Arc<dyn LLMProvider>,
    kv: Option<Arc<dyn KvStore>>,
    max_recommendations: usize,
}

impl RecommendationEngine {
    pub fn new(catalog: Arc<AssetCatalog>, llm: Arc<dyn LLMProvider>) -> Self {
        Self {
            catalog,
            filter: ParallelFilterSystem::default(),
            llm,
            kv: None,
            max_recommendations: DEFAULT_MAX_RECOMMENDATIONS,
        }
    }

    /// Enables recommendation-level response caching under `rec:{fingerprint}`
    /// (spec.md §4.6 step 3 — "when the KV store is available").
    pub fn with_cache(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Overrides the default cap on returned outfit recommendations
    /// (spec.md §4.6 step 9).
    pub fn with_max_recommendations(mut self, max_recommendations: usize) -> Self {
        self.max_recommendations = max_recommendations;
        self
    }

    /// Fingerprint used as a cache key for a given (location, weather,
    /// preferences) tuple (spec.md §4.6, "canonicalize before hashing").
    pub fn fingerprint(location: &str, temperature: f64, preferences: &Preferences) -> String {
        let digest = md5::compute(format!(
            "{location}_{temperature}_{}",
            preferences.canonical()
        ));
        format!("rec:{digest:x}")
    }

    /// Full recommendation path: filter the catalog by weather and
    /// preferences, then ask the LLM to compose outfits from what survives.
    pub async fn recommend(
        &self,
        location: Option<String>,
        weather: WeatherSnapshot,
        preferences: Preferences,
    ) -> AppResult<RecommendationResponse> {
        let cache_key = Self::fingerprint(
            location.as_deref().unwrap_or(""),
            weather.temperature,
            &preferences,
        );
        if let Some(kv) = &self.kv {
            if let Some(cached) = get_json::<RecommendationResponse>(kv.as_ref(), &cache_key).await {
                return Ok(cached);
            }
        }

        let snapshot = self.catalog.snapshot().await?;
        let filtered = self
            .filter
            .filter_assets(snapshot.assets.clone(), weather.clone(), preferences.clone())
            .await;

        if filtered.is_empty() {
            return Err(AppError::NoSuitableAssets);
        }

        let recommendations = self.generate_recommendations(&weather, &filtered, &preferences).await?;

        let response = RecommendationResponse {
            location,
            recommendations,
            weather_summary: weather_summary(&weather),
            style_notes: style_notes(&weather),
            generated_at: now(),
        };

        if let Some(kv) = &self.kv {
            set_json_best_effort(kv.as_ref(), &cache_key, &response, RECOMMENDATION_CACHE_TTL_SECS).await;
        }

        Ok(response)
    }

    /// Temperature-only retrieval path, used for the `/simple` endpoint
    /// (spec.md §4.5 `get_simple_recommendations`). Differs from
    /// `recommend` only in the filter step — it still runs the LLM
    /// composition steps 5-9 of the orchestration, with no preferences,
    /// matching `get_simple_recommendations` in `original_source`, which
    /// still calls `llm_handler.generate_recommendations(...)` after its
    /// own narrower asset retrieval.
    pub async fn recommend_simple(
        &self,
        location: Option<String>,
        weather: WeatherSnapshot,
    ) -> AppResult<RecommendationResponse> {
        let snapshot = self.catalog.snapshot().await?;
        let filtered = self
            .filter
            .filter_by_temperature(snapshot.assets.clone(), weather.temperature)
            .await;

        if filtered.is_empty() {
            return Err(AppError::NoSuitableAssets);
        }

        let preferences = Preferences::default();
        let recommendations = self
            .generate_recommendations(&weather, &filtered, &preferences)
            .await?;

        Ok(RecommendationResponse {
            location,
            recommendations,
            weather_summary: weather_summary(&weather),
            style_notes: style_notes(&weather),
            generated_at: now(),
        })
    }

    /// Custom/categorized path grouping suggestions by outfit part
    /// (spec.md §4.6 `CustomRecommendationRequest` / categorized shape).
    pub async fn recommend_categorized(
        &self,
        weather: WeatherSnapshot,
        preferences: Preferences,
    ) -> AppResult<CategorizedRecommendationResponse> {
        let snapshot = self.catalog.snapshot().await?;
        let filtered = self
            .filter
            .filter_assets(snapshot.assets.clone(), weather.clone(), preferences.clone())
            .await;

        if filtered.is_empty() {
            return Err(AppError::NoSuitableAssets);
        }

        let recommendations = categorize_by_outfit_part(&filtered);

        Ok(CategorizedRecommendationResponse {
            recommendations,
            weather_summary: weather_summary(&weather),
            style_notes: style_notes(&weather),
            generated_at: now(),
        })
    }

    async fn generate_recommendations(
        &self,
        weather: &WeatherSnapshot,
        assets: &[AssetItem],
        preferences: &Preferences,
    ) -> AppResult<Vec<OutfitRecommendation>> {
        let user_prompt = build_llm_prompt(weather, assets, preferences);
        let raw = self.llm.complete(STYLIST_PROMPT_TEMPLATE, &user_prompt).await?;
        let sanitized = sanitize_llm_json(&raw);

        let parsed: LlmRecommendationSet = serde_json::from_str(&sanitized)
            .map_err(|e| AppError::LlmOutputMalformed(format!("{e}: {sanitized}")))?;

        let mut recommendations = Vec::new();
        for (_, items) in parsed.0 {
            let Some(first) = items.into_iter().next() else {
                continue;
            };
            // Per spec.md §4.6 step 8, a missing piece becomes the literal
            // string "N/A" rather than being left null, except when both
            // top and bottom are absent — there is nothing to synthesize.
            if first.top.is_none() && first.bottom.is_none() {
                continue;
            }
            let rec = OutfitRecommendation {
                head: Some(first.head.unwrap_or_else(|| NOT_AVAILABLE.to_string())),
                top: first.top.or_else(|| Some(NOT_AVAILABLE.to_string())),
                bottom: first.bottom.or_else(|| Some(NOT_AVAILABLE.to_string())),
                footwear: Some(first.footwear.unwrap_or_else(|| NOT_AVAILABLE.to_string())),
                description: first.description.unwrap_or_default(),
                weather_appropriate_score: first.weather_appropriate_score.unwrap_or(1.0).clamp(0.0, 1.0),
                style_score: first.style_score.unwrap_or(1.0).clamp(0.0, 1.0),
                created_at: now(),
            };
            if rec.validate().is_ok() {
                recommendations.push(rec);
            }
            if recommendations.len() >= self.max_recommendations {
                break;
            }
        }

        if recommendations.is_empty() {
            return Err(AppError::LlmOutputMalformed(
                "no well-formed outfit recommendations survived validation".to_string(),
            ));
        }

        Ok(recommendations)
    }
}

#[derive(Debug, Deserialize)]
struct LlmOutfitItem {
    head: Option<String>,
    top: Option<String>,
    bottom: Option<String>,
    footwear: Option<String>,
    description: Option<String>,
    #[serde(default)]
    weather_appropriate_score: Option<f64>,
    #[serde(default)]
    style_score: Option<f64>,
}

/// The LLM's `{"recommendation_1": [...], "recommendation_2": [...]}` shape
/// is an unordered object whose insertion order we don't need to preserve
/// exactly, only iterate in the order serde_json hands back.
#[derive(Debug, Deserialize)]
struct LlmRecommendationSet(std::collections::BTreeMap<String, Vec<LlmOutfitItem>>);

/// Strips code fences, trailing commas and line comments from LLM output
/// before parsing, grounded in `original_source`'s
/// `llm/openai_handler.py::_fix_json` / `_parse_json_from_text`.
fn sanitize_llm_json(raw: &str) -> String {
    let without_fences = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let mut cleaned = String::with_capacity(without_fences.len());
    for line in without_fences.lines() {
        let mut in_string = false;
        let mut prev_char = '\0';
        let mut comment_start = None;
        for (i, c) in line.char_indices() {
            if c == '"' && prev_char != '\\' {
                in_string = !in_string;
            }
            if !in_string && ((c == '/' && prev_char == '/') || c == '#') {
                comment_start = Some(if c == '#' { i } else { i - 1 });
                break;
            }
            prev_char = c;
        }
        let line = match comment_start {
            Some(idx) => &line[..idx],
            None => line,
        };
        cleaned.push_str(line);
        cleaned.push('\n');
    }

    // Trailing commas before a closing bracket/brace.
    let mut result = String::with_capacity(cleaned.len());
    let chars: Vec<char> = cleaned.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        result.push(chars[i]);
        i += 1;
    }
    result
}

fn build_llm_prompt(weather: &WeatherSnapshot, assets: &[AssetItem], preferences: &Preferences) -> String {
    let asset_names: Vec<&str> = assets.iter().map(|a| a.asset_name.as_str()).collect();
    format!(
        "Weather: {:.1}C, {}, wind {:.1} m/s, rain {:.1}mm, snow {:.1}mm.\n\
         Available assets: {}\n\
         Style preferences: {}\n\
         Produce up to 5 complete outfit recommendations as instructed.",
        weather.temperature,
        weather.description,
        weather.wind_speed,
        weather.rain,
        weather.snow,
        asset_names.join(", "),
        preferences.canonical(),
    )
}

/// Generates the short weather summary line (spec.md §4.6), matching
/// `_generate_weather_summary`: `"Current weather in {location}: {temp}C,
/// {desc}. Wind speed: {wind} m/s"`.
fn weather_summary(weather: &WeatherSnapshot) -> String {
    format!(
        "Current weather in {}: {:.1}°C, {}. Wind speed: {:.1} m/s",
        weather.location, weather.temperature, weather.description, weather.wind_speed
    )
}

/// Generates the style notes line, matching `_generate_style_notes`'
/// rain/snow/wind/default branches.
fn style_notes(weather: &WeatherSnapshot) -> String {
    if weather.rain > 0.0 {
        "Don't forget an umbrella or waterproof layer today.".to_string()
    } else if weather.snow > 0.0 {
        "Bundle up — today's outfit favors warmth over style.".to_string()
    } else if weather.wind_speed > 5.0 {
        "It's windy out there — consider a more fitted silhouette.".to_string()
    } else {
        "Today's conditions are perfectly suited to your preferred style.".to_string()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn categorize_by_outfit_part(assets: &[AssetItem]) -> CategorizedRecommendation {
    use crate::types::OutfitPart;

    let mut result = CategorizedRecommendation::default();
    for asset in assets {
        let bucket = match asset.outfit_part {
            OutfitPart::Head => &mut result.head,
            OutfitPart::Top => &mut result.top,
            OutfitPart::Bottom => &mut result.bottom,
            OutfitPart::Footwear => &mut result.footwear,
        };
        bucket.push(asset.asset_name.clone());
    }
    result.description = "Assets grouped by outfit part for the given conditions.".to_string();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_code_fence() {
        let raw = "```json\n{\"recommendation_1\": []}\n```";
        assert_eq!(sanitize_llm_json(raw).trim(), "{\"recommendation_1\": []}");
    }

    #[test]
    fn sanitize_strips_trailing_commas() {
        let raw = "{\"a\": [1, 2,], \"b\": 3,}";
        let cleaned = sanitize_llm_json(raw);
        let parsed: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(parsed["a"][1], 2);
    }

    #[test]
    fn sanitize_strips_line_and_hash_comments() {
        let raw = "{\n  \"a\": 1, // trailing comment\n  \"b\": 2 # another\n}";
        let cleaned = sanitize_llm_json(raw);
        let parsed: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(parsed["a"], 1);
        assert_eq!(parsed["b"], 2);
    }

    #[test]
    fn sanitize_preserves_slashes_inside_strings() {
        let raw = "{\"a\": \"http://example.com\"}";
        let cleaned = sanitize_llm_json(raw);
        let parsed: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(parsed["a"], "http://example.com");
    }

    #[test]
    fn weather_summary_matches_expected_format() {
        let weather = WeatherSnapshot {
            temperature: 12.3,
            feels_like: 11.0,
            temperature_min: None,
            temperature_max: None,
            humidity: 50,
            pressure: 1000,
            description: "light rain".to_string(),
            weather_group: crate::types::WeatherGroup::Rain,
            wind_speed: 4.2,
            rain: 1.0,
            snow: 0.0,
            weather_id: Some(500),
            location: "Warsaw".to_string(),
            country: "PL".to_string(),
            timestamp: 0,
            sunrise: 0,
            sunset: 0,
        };
        assert_eq!(
            weather_summary(&weather),
            "Current weather in Warsaw: 12.3°C, light rain. Wind speed: 4.2 m/s"
        );
        assert_eq!(style_notes(&weather), "Don't forget an umbrella or waterproof layer today.");
    }

    #[test]
    fn fingerprint_is_stable_for_equivalent_preferences() {
        let a = Preferences {
            styles: vec!["casual".into(), "sporty".into()],
            ..Default::default()
        };
        let b = Preferences {
            styles: vec!["sporty".into(), "casual".into()],
            ..Default::default()
        };
        assert_eq!(
            RecommendationEngine::fingerprint("Warsaw", 12.0, &a),
            RecommendationEngine::fingerprint("Warsaw", 12.0, &b)
        );
    }
}
