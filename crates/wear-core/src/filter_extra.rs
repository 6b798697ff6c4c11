use std::collections::BTreeSet;

use crate::types::AssetItem;

/// Secondary scoring/compatibility helpers, grounded in `original_source`'s
/// `recommendation_kernel/filters.py` (`StyleFilter`, `SeasonFilter`,
/// `OutfitCompatibilityFilter`). Not on the primary filter pipeline path —
/// the engine uses these for ranking and pairing, not for exclusion.
pub fn style_match_score(asset: &AssetItem, preferred_styles: &[String]) -> f64 {
    if preferred_styles.is_empty() {
        return 1.0;
    }
    let matches = preferred_styles
        .iter()
        .filter(|s| asset.style.contains(*s))
        .count();
    matches as f64 / preferred_styles.len() as f64
}

/// Northern-hemisphere season for a given month (1-12), matching the
/// source's `_get_season`.
pub fn season_for_month(month: u32) -> &'static str {
    match month {
        12 | 1 | 2 => "winter",
        3 | 4 | 5 => "spring",
        6 | 7 | 8 => "summer",
        9 | 10 | 11 => "autumn",
        _ => "unknown",
    }
}

/// Two assets are compatible if their style sets intersect, matching the
/// source's `_is_compatible`.
pub fn is_compatible(a: &AssetItem, b: &AssetItem) -> bool {
    !a.style.is_disjoint(&b.style)
}

pub fn shared_styles(a: &AssetItem, b: &AssetItem) -> BTreeSet<String> {
    a.style.intersection(&b.style).cloned().collect()
}
