use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Selector};

use crate::error::Result;
use crate::fetch::Fetcher;

mod shufersal;
mod victory;

pub use shufersal::Shufersal;
pub use victory::Victory;

// ============================================================================
// RECORDS & TRAIT
// ============================================================================

/// Chain-agnostic store row as parsed from a stores file.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRecord {
    pub store_id: String,
    pub name: String,
    pub address: String,
    pub city: String,
}

/// Chain-agnostic price row as parsed from a price file.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    pub store_id: String,
    pub barcode: String,
    pub name: String,
    pub price: f64,
}

/// One adapter per chain. URL discovery plus XML parsing; everything the
/// rest of the system knows about a chain goes through this trait.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Lowercase short tag, e.g. "shufersal".
    fn name(&self) -> &'static str;
    /// Hebrew display name, seeded into the chains table.
    fn display_name(&self) -> &'static str;

    async fn list_store_file_urls(&self, fetcher: &Fetcher) -> Result<Vec<String>>;
    async fn list_price_file_urls(&self, fetcher: &Fetcher) -> Result<Vec<String>>;

    fn parse_stores(&self, content: &[u8]) -> Vec<StoreRecord>;
    fn parse_prices(&self, content: &[u8]) -> Vec<PriceRecord>;
}

static REGISTRY: Lazy<Vec<Arc<dyn ChainAdapter>>> = Lazy::new(|| {
    vec![
        Arc::new(Shufersal::new()) as Arc<dyn ChainAdapter>,
        Arc::new(Victory::new()) as Arc<dyn ChainAdapter>,
    ]
});

/// The supported chains. Immutable after process start, shared everywhere.
pub fn registry() -> &'static [Arc<dyn ChainAdapter>] {
    &REGISTRY
}

pub fn adapter_for(name: &str) -> Option<Arc<dyn ChainAdapter>> {
    REGISTRY.iter().find(|a| a.name() == name).cloned()
}

// ============================================================================
// SHARED HTML SCRAPING
// ============================================================================

/// Hrefs of `<a>` elements whose trimmed text equals `anchor_text`.
pub(crate) fn extract_anchor_hrefs(html: &str, anchor_text: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a").expect("anchor selector");

    document
        .select(&selector)
        .filter(|a| a.text().collect::<String>().trim() == anchor_text)
        .filter_map(|a| a.value().attr("href").map(str::to_string))
        .collect()
}

/// Last path segment with any query string stripped; used to deduplicate
/// file links across index pages.
pub(crate) fn file_name_of(url: &str) -> String {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .unwrap_or(without_query)
        .to_string()
}

// ============================================================================
// SHARED TOLERANT XML PARSING
// ============================================================================

/// Per-chain field naming for price files. The two dialects differ only in
/// these tables; the walking logic is shared.
pub(crate) struct PriceDialect {
    pub store_id_fields: &'static [&'static str],
    pub product_containers: &'static [&'static str],
    pub barcode_fields: &'static [&'static str],
    pub name_fields: &'static [&'static str],
    pub price_fields: &'static [&'static str],
    /// Shufersal pads store ids with leading zeros; Victory does not.
    pub strip_store_id_zeros: bool,
}

pub(crate) fn parse_price_xml(content: &[u8], dialect: &PriceDialect) -> Vec<PriceRecord> {
    let Some(xml) = decode_utf8(content) else {
        tracing::warn!("Price file is not valid UTF-8; skipping");
        return Vec::new();
    };

    let store_id = match first_text_by_names(xml, dialect.store_id_fields) {
        Some(raw) if dialect.strip_store_id_zeros => match strip_leading_zeros(&raw) {
            Some(id) => id,
            None => {
                tracing::warn!("Non-numeric store id '{}' in price file", raw);
                return Vec::new();
            }
        },
        Some(raw) => raw,
        None => {
            tracing::warn!("No store id found in price file");
            return Vec::new();
        }
    };

    // First non-empty container wins: Product, then the fallbacks.
    let mut products = Vec::new();
    for container in dialect.product_containers {
        products = collect_elements(xml, container);
        if !products.is_empty() {
            break;
        }
    }

    let mut prices = Vec::new();
    for fields in &products {
        let Some(barcode) = first_field(fields, dialect.barcode_fields) else {
            continue;
        };

        let name = first_field(fields, dialect.name_fields)
            .unwrap_or_else(|| format!("Product {barcode}"));

        // First candidate field that parses as a number; non-positive values
        // drop the product, not the file.
        let Some(price) = first_price(fields, dialect.price_fields) else {
            continue;
        };
        if price <= 0.0 {
            continue;
        }

        prices.push(PriceRecord {
            store_id: store_id.clone(),
            barcode,
            name,
            price,
        });
    }

    tracing::debug!("Parsed {} prices for store {}", prices.len(), store_id);
    prices
}

/// Decode bytes as UTF-8, tolerating a BOM.
pub(crate) fn decode_utf8(content: &[u8]) -> Option<&str> {
    std::str::from_utf8(content)
        .ok()
        .map(|s| s.trim_start_matches('\u{feff}'))
}

/// Strip leading zeros from a numeric store id ("012" → "12").
/// Returns None when the id is not numeric.
pub(crate) fn strip_leading_zeros(raw: &str) -> Option<String> {
    raw.trim().parse::<u64>().ok().map(|n| n.to_string())
}

/// All elements named `container` anywhere in the document, each flattened
/// to its direct children as `(tag, text)` pairs. A malformed document
/// yields nothing — whole-file parse failures skip the file.
pub(crate) fn collect_elements(xml: &str, container: &str) -> Vec<Vec<(String, String)>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records: Vec<Vec<(String, String)>> = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<Vec<(String, String)>> = None;
    let mut container_depth = 0usize;
    let mut pending: Option<(String, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                stack.push(name.clone());

                if current.is_none() && name == container {
                    current = Some(Vec::new());
                    container_depth = stack.len();
                } else if current.is_some() && stack.len() == container_depth + 1 {
                    pending = Some((name, String::new()));
                }
            }
            Ok(Event::Text(t)) => {
                if stack.len() == container_depth + 1 {
                    if let (Some((_, buf)), Ok(text)) = (pending.as_mut(), t.unescape()) {
                        buf.push_str(&text);
                    }
                }
            }
            Ok(Event::End(_)) => {
                if current.is_some() {
                    if stack.len() == container_depth + 1 {
                        if let Some((name, buf)) = pending.take() {
                            let text = buf.trim().to_string();
                            if !text.is_empty() {
                                current.as_mut().unwrap().push((name, text));
                            }
                        }
                    } else if stack.len() == container_depth {
                        records.push(current.take().unwrap());
                    }
                }
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Malformed XML, skipping file: {}", e);
                return Vec::new();
            }
        }
    }

    records
}

/// Direct text of the first element matching any of `names`, anywhere in the
/// document, resolved in `names` priority order.
pub(crate) fn first_text_by_names(xml: &str, names: &[&str]) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut found: HashMap<String, String> = HashMap::new();
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last() {
                    if names.contains(&top.as_str()) && !found.contains_key(top) {
                        if let Ok(text) = t.unescape() {
                            let text = text.trim().to_string();
                            if !text.is_empty() {
                                found.insert(top.clone(), text);
                            }
                        }
                    }
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return None,
        }
    }

    names.iter().find_map(|n| found.get(*n).cloned())
}

/// First non-empty field matching any of `names`, in `names` priority order.
pub(crate) fn first_field(fields: &[(String, String)], names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| fields.iter().find(|(tag, _)| tag == n).map(|(_, v)| v.clone()))
}

/// First candidate price field whose value parses as a number.
pub(crate) fn first_price(fields: &[(String, String)], names: &[&str]) -> Option<f64> {
    names.iter().find_map(|n| {
        fields
            .iter()
            .find(|(tag, _)| tag == n)
            .and_then(|(_, v)| v.trim().parse::<f64>().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn registry_has_both_chains() {
        let names: Vec<_> = registry().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["shufersal", "victory"]);
        assert!(adapter_for("shufersal").is_some());
        assert!(adapter_for("rami-levy").is_none());
    }

    #[test]
    fn anchor_extraction_matches_exact_text() {
        let html = r#"
            <html><body>
                <a href="/files/a.gz">לחץ להורדה</a>
                <a href="/files/b.gz"> לחץ להורדה </a>
                <a href="/other">something else</a>
            </body></html>
        "#;
        let hrefs = extract_anchor_hrefs(html, "לחץ להורדה");
        assert_eq!(hrefs, vec!["/files/a.gz", "/files/b.gz"]);
    }

    #[test]
    fn file_name_strips_path_and_query() {
        assert_eq!(file_name_of("http://x/a/b/Price123.gz?sig=abc"), "Price123.gz");
        assert_eq!(file_name_of("Price123.gz"), "Price123.gz");
    }

    #[rstest]
    #[case("012", Some("12"))]
    #[case("0000", Some("0"))]
    #[case(" 7 ", Some("7"))]
    #[case("abc", None)]
    #[case("", None)]
    fn leading_zeros_are_stripped(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(strip_leading_zeros(raw), expected.map(str::to_string));
    }

    #[test]
    fn collect_elements_flattens_direct_children() {
        let xml = r#"<Root>
            <Product><ItemCode>123</ItemCode><ItemPrice>5.90</ItemPrice></Product>
            <Product><ItemCode>456</ItemCode><Nested><Deep>x</Deep></Nested></Product>
        </Root>"#;
        let products = collect_elements(xml, "Product");
        assert_eq!(products.len(), 2);
        assert_eq!(
            products[0],
            vec![
                ("ItemCode".to_string(), "123".to_string()),
                ("ItemPrice".to_string(), "5.90".to_string()),
            ]
        );
        // Grandchild text is not attributed to the product
        assert_eq!(products[1], vec![("ItemCode".to_string(), "456".to_string())]);
    }

    #[test]
    fn malformed_xml_yields_nothing() {
        let products = collect_elements("<Root><Product><ItemCode>1</Root>", "Product");
        assert!(products.is_empty());
    }

    #[test]
    fn field_priority_follows_name_order() {
        let fields = vec![
            ("Barcode".to_string(), "999".to_string()),
            ("ItemCode".to_string(), "111".to_string()),
        ];
        assert_eq!(
            first_field(&fields, &["ItemCode", "Barcode"]),
            Some("111".to_string())
        );
    }

    #[test]
    fn price_fallback_skips_unparseable_candidates() {
        let fields = vec![
            ("ItemPrice".to_string(), "N/A".to_string()),
            ("Price".to_string(), "7.50".to_string()),
        ];
        assert_eq!(first_price(&fields, &["ItemPrice", "Price"]), Some(7.5));
    }
}
