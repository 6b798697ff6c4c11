use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::error::{AppError, AppResult};
use crate::types::AssetItem;

/// Immutable, point-in-time view of the clothing catalog (spec.md §4.4).
pub struct CatalogSnapshot {
    pub assets: Vec<AssetItem>,
    by_name: HashMap<String, usize>,
}

impl CatalogSnapshot {
    fn build(assets: Vec<AssetItem>) -> Self {
        let by_name = assets
            .iter()
            .enumerate()
            .map(|(i, a)| (a.asset_name.clone(), i))
            .collect();
        Self { assets, by_name }
    }

    pub fn get(&self, asset_name: &str) -> Option<&AssetItem> {
        self.by_name.get(asset_name).map(|&i| &self.assets[i])
    }
}

/// Lazily-initialized, shared clothing catalog loaded from a JSON file on
/// disk. Grounded in `original_source`'s `JsonAssetRetriever.initialize()`
/// double-checked `asyncio.Lock()` pattern, ported to Rust's
/// `tokio::sync::OnceCell` + `Mutex` idiom.
pub struct AssetCatalog {
    path: PathBuf,
    snapshot: OnceCell<Arc<CatalogSnapshot>>,
    refresh_lock: Mutex<()>,
}

impl AssetCatalog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            snapshot: OnceCell::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the current snapshot, loading it from disk on first use.
    /// Concurrent callers during cold start all await the same load.
    pub async fn snapshot(&self) -> AppResult<Arc<CatalogSnapshot>> {
        self.snapshot
            .get_or_try_init(|| async { self.load().await.map(Arc::new) })
            .await
            .cloned()
    }

    /// Forces a reload from disk, replacing the cached snapshot. Held
    /// behind `refresh_lock` so concurrent refreshes don't duplicate the
    /// (blocking) file read.
    pub async fn refresh(&self) -> AppResult<Arc<CatalogSnapshot>> {
        let _guard = self.refresh_lock.lock().await;
        let fresh = Arc::new(self.load().await?);
        // OnceCell has no replace; a freshly-built cell swapped in behind
        // the same Mutex keeps `snapshot()` callers from ever observing a
        // half-initialized state.
        let _ = self.snapshot.set(fresh.clone());
        Ok(fresh)
    }

    async fn load(&self) -> AppResult<CatalogSnapshot> {
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .map_err(|e| AppError::Internal(format!("catalog load task panicked: {e}")))?
            .map_err(|e| AppError::Internal(format!("failed to read catalog file: {e}")))?;

        let assets: Vec<AssetItem> = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Internal(format!("failed to parse catalog file: {e}")))?;

        Ok(CatalogSnapshot::build(assets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    fn sample_asset_json() -> &'static str {
        r#"[{
            "AssetName": "tshirt_001.png",
            "OutfitPart": "top",
            "Color": "black",
            "Style": ["casual"],
            "Gender": "unisex",
            "Fit": "normal",
            "Season": ["summer"],
            "Condition": ["clear"],
            "TempRange": {"Min": 20, "Max": 30},
            "Wind": "yes",
            "Rain": "no",
            "Snow": "no"
        }]"#
    }

    #[tokio::test]
    async fn loads_and_indexes_by_name() {
        let file = write_fixture(sample_asset_json());
        let catalog = AssetCatalog::new(file.path().to_path_buf());
        let snapshot = catalog.snapshot().await.unwrap();
        assert_eq!(snapshot.assets.len(), 1);
        assert!(snapshot.get("tshirt_001.png").is_some());
        assert!(snapshot.get("missing.png").is_none());
    }

    #[tokio::test]
    async fn snapshot_is_cached_across_calls() {
        let file = write_fixture(sample_asset_json());
        let catalog = AssetCatalog::new(file.path().to_path_buf());
        let first = catalog.snapshot().await.unwrap();
        let second = catalog.snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn refresh_rejects_malformed_catalog() {
        let file = write_fixture("not json");
        let catalog = AssetCatalog::new(file.path().to_path_buf());
        assert!(catalog.snapshot().await.is_err());
    }
}
