use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AppResult;
use crate::forecast::Forecast;
use crate::kv::{get_json, set_json_best_effort, KvStore};
use crate::types::{LocationCacheEntry, WeatherSnapshot};
use crate::upstream::WeatherProvider;

const CACHE_DURATION_SECS: u64 = 14_400;
const REFRESH_THRESHOLD_SECS: i64 = 13_200;
const REFRESH_TICK: Duration = Duration::from_secs(300);
const REFRESH_INTER_FETCH_DELAY: Duration = Duration::from_millis(500);

mod keys {
    pub fn city(city: &str) -> String {
        format!("weather:city:{}", city.to_lowercase())
    }

    pub fn city_country(city: &str, country: &str) -> String {
        format!("weather:city:{}:{}", city.to_lowercase(), country.to_lowercase())
    }

    /// Floor-based binning, not round-to-nearest — see DESIGN.md's Open
    /// Question entry on spec.md §8 Scenario 5 for why.
    pub fn proximity(lat: f64, lon: f64, precision: f64) -> String {
        let bin = |v: f64| (v / precision).floor() * precision;
        format!("weather:proximity:{:.2}:{:.2}", bin(lat), bin(lon))
    }

    pub fn forecast_city(city: &str, country: Option<&str>) -> String {
        match country {
            Some(cc) => format!("forecast:city:{}:{}", city.to_lowercase(), cc.to_lowercase()),
            None => format!("forecast:city:{}", city.to_lowercase()),
        }
    }

    pub fn metadata(data_key: &str) -> String {
        format!("metadata:{data_key}")
    }
}

/// Tracks keys with an in-flight background refresh so at most one refresh
/// runs per key at a time (spec.md §4.3 "single-flight"). Grounded in the
/// `CleanupGuard` RAII-drop pattern from the pack's
/// `thichuong-multi-tier-cache` cache manager.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.key);
    }
}

fn try_claim(in_flight: &Arc<Mutex<HashSet<String>>>, key: &str) -> Option<InFlightGuard> {
    let mut guard = in_flight.lock().unwrap();
    if guard.contains(key) {
        return None;
    }
    guard.insert(key.to_string());
    drop(guard);
    Some(InFlightGuard {
        in_flight: in_flight.clone(),
        key: key.to_string(),
    })
}

/// Stale-while-revalidate weather cache (spec.md §4.3), grounded in
/// `original_source`'s `services/cache_service.py::WeatherCacheService`.
pub struct WeatherCacheService {
    kv: Arc<dyn KvStore>,
    provider: Arc<dyn WeatherProvider>,
    proximity_precision: f64,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl WeatherCacheService {
    pub fn new(kv: Arc<dyn KvStore>, provider: Arc<dyn WeatherProvider>, proximity_precision: f64) -> Self {
        Self {
            kv,
            provider,
            proximity_precision,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn by_city(&self, city: &str, country: Option<&str>) -> AppResult<WeatherSnapshot> {
        let key = match country {
            Some(cc) => keys::city_country(city, cc),
            None => keys::city(city),
        };
        self.get_or_fetch(&key, || {
            let provider = self.provider.clone();
            let city = city.to_string();
            let country = country.map(|c| c.to_string());
            async move { provider.current_by_city(&city, country.as_deref()).await }
        })
        .await
    }

    pub async fn by_proximity(&self, lat: f64, lon: f64) -> AppResult<WeatherSnapshot> {
        let key = keys::proximity(lat, lon, self.proximity_precision);
        self.get_or_fetch(&key, || {
            let provider = self.provider.clone();
            async move { provider.current_by_coords(lat, lon).await }
        })
        .await
    }

    pub async fn forecast_by_city(&self, city: &str, country: Option<&str>) -> AppResult<Forecast> {
        let key = keys::forecast_city(city, country);
        let metadata_key = keys::metadata(&key);

        if let Some(cached) = get_json::<Forecast>(self.kv.as_ref(), &key).await {
            self.maybe_schedule_refresh_forecast(
                &key,
                &metadata_key,
                city.to_string(),
                country.map(|c| c.to_string()),
            );
            return Ok(cached);
        }

        let forecast = self.provider.forecast_by_city(city, country).await?;
        self.store_forecast(&key, &metadata_key, &forecast).await;
        Ok(forecast)
    }

    async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> AppResult<WeatherSnapshot>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AppResult<WeatherSnapshot>>,
    {
        let metadata_key = keys::metadata(key);

        if let Some(cached) = get_json::<WeatherSnapshot>(self.kv.as_ref(), key).await {
            self.bump_request_count(&metadata_key).await;
            if self.is_stale(&metadata_key).await {
                self.schedule_refresh(key.to_string());
            }
            return Ok(cached);
        }

        let snapshot = fetch().await?;
        self.store_weather(key, &metadata_key, &snapshot).await;
        Ok(snapshot)
    }

    async fn is_stale(&self, metadata_key: &str) -> bool {
        match get_json::<LocationCacheEntry>(self.kv.as_ref(), metadata_key).await {
            Some(meta) => chrono::Utc::now().timestamp() - meta.last_updated > REFRESH_THRESHOLD_SECS,
            None => true,
        }
    }

    async fn bump_request_count(&self, metadata_key: &str) {
        if let Some(mut meta) = get_json::<LocationCacheEntry>(self.kv.as_ref(), metadata_key).await {
            meta.request_count += 1;
            set_json_best_effort(self.kv.as_ref(), metadata_key, &meta, CACHE_DURATION_SECS).await;
        }
    }

    async fn store_weather(&self, key: &str, metadata_key: &str, snapshot: &WeatherSnapshot) {
        set_json_best_effort(self.kv.as_ref(), key, snapshot, CACHE_DURATION_SECS).await;
        let meta = LocationCacheEntry {
            location_key: key.to_string(),
            last_updated: chrono::Utc::now().timestamp(),
            active: true,
            request_count: 0,
        };
        set_json_best_effort(self.kv.as_ref(), metadata_key, &meta, CACHE_DURATION_SECS).await;
    }

    async fn store_forecast(&self, key: &str, metadata_key: &str, forecast: &Forecast) {
        set_json_best_effort(self.kv.as_ref(), key, forecast, CACHE_DURATION_SECS).await;
        let meta = LocationCacheEntry {
            location_key: key.to_string(),
            last_updated: chrono::Utc::now().timestamp(),
            active: true,
            request_count: 0,
        };
        set_json_best_effort(self.kv.as_ref(), metadata_key, &meta, CACHE_DURATION_SECS).await;
    }

    fn maybe_schedule_refresh_forecast(
        &self,
        key: &str,
        metadata_key: &str,
        city: String,
        country: Option<String>,
    ) {
        let metadata_key = metadata_key.to_string();
        let kv = self.kv.clone();
        let key = key.to_string();
        let provider = self.provider.clone();
        let Some(guard) = try_claim(&self.in_flight, &key) else {
            return;
        };
        tokio::spawn(async move {
            let _guard = guard;
            let stale = match get_json::<LocationCacheEntry>(kv.as_ref(), &metadata_key).await {
                Some(meta) => chrono::Utc::now().timestamp() - meta.last_updated > REFRESH_THRESHOLD_SECS,
                None => true,
            };
            if !stale {
                return;
            }
            match provider.forecast_by_city(&city, country.as_deref()).await {
                Ok(forecast) => {
                    set_json_best_effort(kv.as_ref(), &key, &forecast, CACHE_DURATION_SECS).await;
                    let meta = LocationCacheEntry {
                        location_key: key.clone(),
                        last_updated: chrono::Utc::now().timestamp(),
                        active: true,
                        request_count: 0,
                    };
                    set_json_best_effort(kv.as_ref(), &metadata_key, &meta, CACHE_DURATION_SECS).await;
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "background forecast refresh failed");
                }
            }
        });
    }

    /// Spawns a single-flight background refresh of `key`, grounded in
    /// `original_source`'s `_refresh_cache`.
    fn schedule_refresh(&self, key: String) {
        let Some(guard) = try_claim(&self.in_flight, &key) else {
            return;
        };
        let kv = self.kv.clone();
        let provider = self.provider.clone();
        tokio::spawn(async move {
            let _guard = guard;
            refresh_one(kv.as_ref(), provider.as_ref(), &key).await;
        });
    }

    /// Background loop scanning `metadata:weather:*` every 5 minutes and
    /// refreshing any key stale past the threshold, grounded in
    /// `original_source`'s `_refresh_loop`. Exits promptly when `cancel` is
    /// triggered — resolves the cyclic-reference redesign flag (spec.md §9)
    /// via `tokio_util::sync::CancellationToken` instead of a task handle
    /// stored back on the struct it was spawned from.
    pub async fn run_background_refresh(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("weather cache refresh loop shutting down");
                    return;
                }
                _ = tokio::time::sleep(REFRESH_TICK) => {}
            }

            let metadata_keys = match self.kv.scan("metadata:weather:").await {
                Ok(keys) => keys,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to scan metadata keys for refresh sweep");
                    continue;
                }
            };

            for metadata_key in metadata_keys {
                if cancel.is_cancelled() {
                    return;
                }
                let Some(data_key) = metadata_key.strip_prefix("metadata:") else {
                    continue;
                };
                if self.is_stale(&metadata_key).await {
                    refresh_one(self.kv.as_ref(), self.provider.as_ref(), data_key).await;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(REFRESH_INTER_FETCH_DELAY) => {}
                }
            }
        }
    }
}

async fn refresh_one(kv: &dyn KvStore, provider: &dyn WeatherProvider, key: &str) {
    let metadata_key = keys::metadata(key);
    let fetched = if let Some((city, country)) = parse_city_country_key(key) {
        provider.current_by_city(&city, country.as_deref()).await
    } else if let Some((lat, lon)) = parse_proximity_key(key) {
        provider.current_by_coords(lat, lon).await
    } else {
        tracing::warn!(key, "unrecognized cache key shape, skipping refresh");
        return;
    };

    match fetched {
        Ok(snapshot) => {
            set_json_best_effort(kv, key, &snapshot, CACHE_DURATION_SECS).await;
            let meta = LocationCacheEntry {
                location_key: key.to_string(),
                last_updated: chrono::Utc::now().timestamp(),
                active: true,
                request_count: 0,
            };
            set_json_best_effort(kv, &metadata_key, &meta, CACHE_DURATION_SECS).await;
        }
        Err(err) => {
            tracing::warn!(key, error = %err, "background weather refresh failed");
        }
    }
}

fn parse_city_country_key(key: &str) -> Option<(String, Option<String>)> {
    let rest = key.strip_prefix("weather:city:")?;
    match rest.split_once(':') {
        Some((city, country)) => Some((city.to_string(), Some(country.to_string()))),
        None => Some((rest.to_string(), None)),
    }
}

fn parse_proximity_key(key: &str) -> Option<(f64, f64)> {
    let rest = key.strip_prefix("weather:proximity:")?;
    let (lat, lon) = rest.rsplit_once(':')?;
    Some((lat.parse().ok()?, lon.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::test_support::InMemoryKvStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    fn sample_snapshot() -> WeatherSnapshot {
        WeatherSnapshot {
            temperature: 10.0,
            feels_like: 9.0,
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

    #[async_trait]
    impl WeatherProvider for CountingProvider {
        async fn current_by_city(&self, _city: &str, _country: Option<&str>) -> AppResult<WeatherSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(sample_snapshot())
        }

        async fn current_by_coords(&self, _lat: f64, _lon: f64) -> AppResult<WeatherSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(sample_snapshot())
        }

        async fn forecast_by_city(&self, _city: &str, _country: Option<&str>) -> AppResult<Forecast> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn first_call_fetches_and_caches() {
        let kv = Arc::new(InMemoryKvStore::new());
        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0) });
        let service = WeatherCacheService::new(kv.clone(), provider.clone(), 5.0);

        let snapshot = service.by_city("Warsaw", None).await.unwrap();
        assert_eq!(snapshot.location, "Warsaw");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // second call within freshness window should be served from cache.
        service.by_city("Warsaw", None).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn proximity_key_rounds_to_precision_grid() {
        assert_eq!(keys::proximity(52.23, 21.01, 5.0), keys::proximity(51.9, 20.8, 5.0));
    }

    /// spec.md §8 Scenario 5's literal coordinates — see DESIGN.md's Open
    /// Question entry: round-to-nearest does not cluster these two points,
    /// floor-based binning does.
    #[test]
    fn proximity_key_clusters_scenario_5_coordinates() {
        assert_eq!(keys::proximity(52.23, 21.01, 5.0), keys::proximity(54.99, 23.99, 5.0));
    }

    #[test]
    fn city_key_is_case_insensitive() {
        assert_eq!(keys::city("Warsaw"), keys::city("warsaw"));
    }
}
