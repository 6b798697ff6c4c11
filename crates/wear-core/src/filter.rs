use rayon::prelude::*;

use crate::preferences::Preferences;
use crate::types::{AssetItem, WeatherSnapshot};

/// CPU-bound parallel asset filter, grounded in `original_source`'s
/// `ParallelFilterSystem` (`recommendation_kernel/parallel_filter.py`):
/// chunk the catalog, filter each chunk independently, and run the whole
/// thing off the async executor via `spawn_blocking` so a large catalog
/// never stalls request handling.
pub struct ParallelFilterSystem {
    max_workers: usize,
}

impl Default for ParallelFilterSystem {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .min(32),
        }
    }
}

impl ParallelFilterSystem {
    pub fn new(max_workers: usize) -> Self {
        Self { max_workers: max_workers.min(32).max(1) }
    }

    /// Filters `assets` against `weather` and `preferences`, preserving
    /// catalog order. Runs the rayon fan-out on a blocking thread so the
    /// caller's async task is never parked on CPU work.
    pub async fn filter_assets(
        &self,
        assets: Vec<AssetItem>,
        weather: WeatherSnapshot,
        preferences: Preferences,
    ) -> Vec<AssetItem> {
        let max_workers = self.max_workers;
        tokio::task::spawn_blocking(move || {
            let chunk_size = (assets.len() / max_workers.max(1)).max(1);
            assets
                .par_chunks(chunk_size)
                .flat_map(|chunk| {
                    chunk
                        .iter()
                        .filter(|asset| matches_all_conditions(asset, &weather, &preferences))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .collect()
        })
        .await
        .unwrap_or_default()
    }

    /// Temperature-only retrieval used by the "simple" recommendation path
    /// (spec.md §4.5 — `retrieve_assets_without_filters`).
    pub async fn filter_by_temperature(&self, assets: Vec<AssetItem>, temperature: f64) -> Vec<AssetItem> {
        tokio::task::spawn_blocking(move || {
            assets
                .into_iter()
                .filter(|asset| asset.temp_range.contains(temperature))
                .collect()
        })
        .await
        .unwrap_or_default()
    }
}

/// Ordered predicate chain: temperature first (cheapest, most selective),
/// then wind/rain/snow, then preferences — matching the early-termination
/// order of `_matches_all_conditions` in the source.
fn matches_all_conditions(asset: &AssetItem, weather: &WeatherSnapshot, preferences: &Preferences) -> bool {
    matches_weather(asset, weather) && matches_preferences(asset, preferences)
}

fn matches_weather(asset: &AssetItem, weather: &WeatherSnapshot) -> bool {
    if !asset.temp_range.contains(weather.temperature) {
        return false;
    }
    if weather.wind_speed > 0.0 && !asset.wind.is_yes() {
        return false;
    }
    if weather.rain > 0.0 && !asset.rain.is_yes() {
        return false;
    }
    if weather.snow > 0.0 && !asset.snow.is_yes() {
        return false;
    }
    true
}

fn matches_preferences(asset: &AssetItem, preferences: &Preferences) -> bool {
    if let Some(gender) = preferences.gender {
        let unisex_preference = matches!(gender, crate::types::Gender::Unisex);
        if !unisex_preference
            && asset.gender != gender
            && !matches!(asset.gender, crate::types::Gender::Unisex)
        {
            return false;
        }
    }
    if !preferences.styles.is_empty()
        && !preferences.styles.iter().any(|s| asset.style.contains(s))
    {
        return false;
    }
    if !preferences.colors.is_empty()
        && !preferences.colors.iter().any(|c| asset.color.eq_ignore_ascii_case(c))
    {
        return false;
    }
    if let Some(fit) = &preferences.fit {
        if !asset.fit.contains(fit) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::types::{Gender, OutfitPart, TempRange, YesNo};

    fn asset(name: &str, min: f64, max: f64, gender: Gender, styles: &[&str]) -> AssetItem {
        AssetItem {
            asset_name: name.to_string(),
            outfit_part: OutfitPart::Top,
            color: "black".to_string(),
            style: styles.iter().map(|s| s.to_string()).collect(),
            gender,
            fit: BTreeSet::from(["normal".to_string()]),
            season: BTreeSet::from(["summer".to_string()]),
            condition: BTreeSet::from(["clear".to_string()]),
            temp_range: TempRange::new(Some(min), Some(max)).unwrap(),
            wind: YesNo::Yes,
            rain: YesNo::No,
            snow: YesNo::No,
        }
    }

    fn weather(temperature: f64) -> WeatherSnapshot {
        WeatherSnapshot {
            temperature,
            feels_like: temperature,
            temperature_min: None,
            temperature_max: None,
            humidity: 50,
            pressure: 1000,
            description: "clear sky".to_string(),
            weather_group: crate::types::WeatherGroup::Clear,
            wind_speed: 1.0,
            rain: 0.0,
            snow: 0.0,
            weather_id: Some(800),
            location: "Warsaw".to_string(),
            country: "PL".to_string(),
            timestamp: 0,
            sunrise: 0,
            sunset: 0,
        }
    }

    #[tokio::test]
    async fn filters_by_temperature_range_and_preserves_order() {
        let assets = vec![
            asset("a", 10.0, 20.0, Gender::Unisex, &["casual"]),
            asset("b", 30.0, 40.0, Gender::Unisex, &["casual"]),
            asset("c", 5.0, 15.0, Gender::Unisex, &["casual"]),
        ];
        let system = ParallelFilterSystem::new(2);
        let result = system
            .filter_assets(assets, weather(12.0), Preferences::default())
            .await;
        assert_eq!(result.iter().map(|a| a.asset_name.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn preference_style_filter_excludes_non_matching_assets() {
        let assets = vec![
            asset("a", 10.0, 20.0, Gender::Unisex, &["casual"]),
            asset("b", 10.0, 20.0, Gender::Unisex, &["formal"]),
        ];
        let prefs = Preferences {
            styles: vec!["formal".to_string()],
            ..Default::default()
        };
        let system = ParallelFilterSystem::new(2);
        let result = system.filter_assets(assets, weather(15.0), prefs).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].asset_name, "b");
    }

    #[tokio::test]
    async fn unisex_assets_pass_any_gender_preference() {
        let assets = vec![asset("a", 10.0, 20.0, Gender::Unisex, &["casual"])];
        let prefs = Preferences {
            gender: Some(Gender::Female),
            ..Default::default()
        };
        let system = ParallelFilterSystem::default();
        let result = system.filter_assets(assets, weather(15.0), prefs).await;
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn unisex_preference_bypasses_gender_gate_entirely() {
        let assets = vec![asset("a", 10.0, 20.0, Gender::Male, &["casual"])];
        let prefs = Preferences {
            gender: Some(Gender::Unisex),
            ..Default::default()
        };
        let system = ParallelFilterSystem::default();
        let result = system.filter_assets(assets, weather(15.0), prefs).await;
        assert_eq!(result.len(), 1);
    }
}
