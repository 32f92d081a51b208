//! Stratum Classification
//!
//! Maps a record's context to a discrete Mondrian stratum key of the form
//! `{property_type}_{age_bin}_{region}_{category}`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::PropertyContext;

pub const DEFAULT_PROPERTY_TYPE: &str = "residential";
pub const DEFAULT_PROPERTY_AGE: f64 = 50.0;
pub const DEFAULT_REGION: &str = "unknown";

/// Composite stratum key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StratumKey(String);

impl StratumKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StratumKey {
    fn from(value: &str) -> Self {
        StratumKey(value.to_string())
    }
}

impl From<String> for StratumKey {
    fn from(value: String) -> Self {
        StratumKey(value)
    }
}

impl fmt::Display for StratumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Property age bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgeBin {
    /// [0, 20)
    New,
    /// [20, 50)
    Established,
    /// [50, 100)
    Mature,
    /// [100, inf)
    Historic,
}

impl AgeBin {
    pub fn from_years(years: f64) -> Self {
        let years = if years.is_finite() { years } else { DEFAULT_PROPERTY_AGE };
        if years < 20.0 {
            AgeBin::New
        } else if years < 50.0 {
            AgeBin::Established
        } else if years < 100.0 {
            AgeBin::Mature
        } else {
            AgeBin::Historic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeBin::New => "0-20",
            AgeBin::Established => "20-50",
            AgeBin::Mature => "50-100",
            AgeBin::Historic => "100+",
        }
    }
}

/// Canonical damage category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageCategory {
    Structural,
    WaterDamage,
    Electrical,
    Mold,
    Pest,
    Fire,
    Exterior,
    Cosmetic,
}

/// Keyword groups in check order. The first group with a hit wins.
const CATEGORY_KEYWORDS: &[(DamageCategory, &[&str])] = &[
    (DamageCategory::Structural, &["structural", "foundation"]),
    (DamageCategory::WaterDamage, &["water", "leak", "flood"]),
    (DamageCategory::Electrical, &["electrical", "wiring"]),
    (DamageCategory::Mold, &["mold", "fungus"]),
    (DamageCategory::Pest, &["pest", "termite", "rodent"]),
    (DamageCategory::Fire, &["fire", "smoke"]),
    (DamageCategory::Exterior, &["roof", "siding", "exterior"]),
];

impl DamageCategory {
    /// Normalize a free-text label. Unknown labels resolve to `Cosmetic`.
    pub fn normalize(label: &str) -> Self {
        let lower = label.to_lowercase();
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(category, _)| *category)
            .unwrap_or(DamageCategory::Cosmetic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DamageCategory::Structural => "structural",
            DamageCategory::WaterDamage => "water_damage",
            DamageCategory::Electrical => "electrical",
            DamageCategory::Mold => "mold",
            DamageCategory::Pest => "pest",
            DamageCategory::Fire => "fire",
            DamageCategory::Exterior => "exterior",
            DamageCategory::Cosmetic => "cosmetic",
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Classify a context into its stratum. Pure and total.
pub fn classify(context: &PropertyContext) -> StratumKey {
    let property_type = non_empty(context.property_type.as_deref()).unwrap_or(DEFAULT_PROPERTY_TYPE);
    let age_bin = AgeBin::from_years(context.property_age.unwrap_or(DEFAULT_PROPERTY_AGE));
    let region = non_empty(context.region.as_deref()).unwrap_or(DEFAULT_REGION);
    let category = non_empty(context.damage_type.as_deref())
        .map(DamageCategory::normalize)
        .unwrap_or(DamageCategory::Cosmetic);

    StratumKey(format!(
        "{}_{}_{}_{}",
        property_type,
        age_bin.as_str(),
        region,
        category.as_str()
    ))
}
