//! Weight/volume extraction from Hebrew product labels, for price-per-unit
//! comparison between package sizes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Price normalized to a base unit (gram, milliliter, or piece).
#[derive(Debug, Clone, Serialize)]
pub struct UnitPrice {
    pub price_per_unit: f64,
    pub unit: String,
    pub value: f64,
}

/// (label token, base unit, factor to base). Longer tokens first so the
/// alternation never matches "ג" inside "גרם".
const UNIT_TOKENS: &[(&str, &str, f64)] = &[
    ("יחידות", "unit", 1.0),
    ("קילו", "g", 1000.0),
    ("ליטר", "ml", 1000.0),
    ("ק\"ג", "g", 1000.0),
    ("מ\"ל", "ml", 1.0),
    ("גרם", "g", 1.0),
    ("גר", "g", 1.0),
    ("קג", "g", 1000.0),
    ("מל", "ml", 1.0),
    ("ג'", "g", 1.0),
    ("ג", "g", 1.0),
    ("ל", "ml", 1000.0),
];

static UNIT_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = UNIT_TOKENS
        .iter()
        .map(|(token, _, _)| regex::escape(token))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(\d+(?:\.\d+)?)\s*({alternation})")).expect("unit regex")
});

/// Extract the package size from a product name, normalized to a base unit.
/// `"חלב טרי 3% 1 ליטר"` → `(1000.0, "ml")`; `"קפה 200 גרם"` → `(200.0, "g")`.
pub fn extract_unit(name: &str) -> Option<(f64, &'static str)> {
    let captures = UNIT_RE.captures(name)?;
    let amount: f64 = captures.get(1)?.as_str().parse().ok()?;
    let token = captures.get(2)?.as_str();

    let (_, base_unit, factor) = UNIT_TOKENS.iter().find(|(t, _, _)| *t == token)?;
    Some((amount * factor, base_unit))
}

/// Price per base unit for a product, when its label names a package size.
pub fn price_per_unit(name: &str, price: f64) -> Option<UnitPrice> {
    let (value, unit) = extract_unit(name)?;
    if value <= 0.0 {
        return None;
    }

    Some(UnitPrice {
        price_per_unit: price / value,
        unit: unit.to_string(),
        value,
    })
}
