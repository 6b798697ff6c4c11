use serde::{Deserialize, Serialize};

use crate::types::Gender;

/// Typed, closed-field preference record. Replaces the source's dynamic
/// keyword-argument filters per the redesign flag in spec.md §9 — unknown
/// fields are rejected rather than silently ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Preferences {
    pub gender: Option<Gender>,
    pub styles: Vec<String>,
    pub colors: Vec<String>,
    pub fit: Option<String>,
}

impl Preferences {
    pub fn is_empty(&self) -> bool {
        self.gender.is_none() && self.styles.is_empty() && self.colors.is_empty() && self.fit.is_none()
    }

    /// Stable, sorted-key JSON serialization used for the recommendation
    /// fingerprint (spec.md §4.6, §9 — "canonicalize (sort keys, stable
    /// serialization) before hashing").
    pub fn canonical(&self) -> String {
        let mut styles = self.styles.clone();
        styles.sort();
        let mut colors = self.colors.clone();
        colors.sort();

        let gender = self
            .gender
            .map(|g| format!("{g:?}").to_lowercase())
            .unwrap_or_default();

        format!(
            "gender={gender}|styles={}|colors={}|fit={}",
            styles.join(","),
            colors.join(","),
            self.fit.clone().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_is_order_independent() {
        let a = Preferences {
            gender: None,
            styles: vec!["casual".into(), "sporty".into()],
            colors: vec!["red".into(), "blue".into()],
            fit: None,
        };
        let b = Preferences {
            gender: None,
            styles: vec!["sporty".into(), "casual".into()],
            colors: vec!["blue".into(), "red".into()],
            fit: None,
        };
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn rejects_unknown_fields() {
        let json = serde_json::json!({"gender": "male", "bogus": true});
        let result: Result<Preferences, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }
}
