use async_trait::async_trait;

use crate::error::Result;
use crate::fetch::Fetcher;

use super::{
    collect_elements, decode_utf8, extract_anchor_hrefs, first_field, parse_price_xml,
    ChainAdapter, PriceDialect, PriceRecord, StoreRecord,
};

const DOWNLOAD_ANCHOR: &str = "לחץ כאן להורדה";
const CHAIN_CODE: &str = "7290696200003";

const PRICE_DIALECT: PriceDialect = PriceDialect {
    store_id_fields: &["StoreID", "StoreId", "STOREID"],
    product_containers: &["Product", "Item"],
    barcode_fields: &["ItemCode", "Barcode", "ProductCode"],
    name_fields: &["ItemName", "ProductName", "Name"],
    price_fields: &["ItemPrice", "Price", "UnitPrice"],
    // Victory store ids are persisted verbatim
    strip_store_id_zeros: false,
};

/// Victory publishes one index page per file type. Hrefs on those pages may
/// use backslashes and may be relative to the catalog host.
pub struct Victory {
    base_url: String,
}

impl Victory {
    pub fn new() -> Self {
        Self::with_base_url("https://laibcatalog.co.il")
    }

    /// Tests point this at a mock server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn index_url(&self, file_type: &str) -> String {
        format!(
            "{}/NBCompetitionRegulations.aspx?code={}&fileType={}",
            self.base_url, CHAIN_CODE, file_type
        )
    }

    /// Fix mixed slashes and resolve relative hrefs against the chain host.
    fn normalize_href(&self, href: &str) -> String {
        let href = href.replace('\\', "/");
        if href.starts_with("http") {
            href
        } else {
            format!("{}/{}", self.base_url, href.trim_start_matches('/'))
        }
    }

    async fn list_file_urls(
        &self,
        fetcher: &Fetcher,
        file_type: &str,
        href_marker: &str,
    ) -> Result<Vec<String>> {
        let html = fetcher.get_text(&self.index_url(file_type)).await?;

        let urls: Vec<String> = extract_anchor_hrefs(&html, DOWNLOAD_ANCHOR)
            .into_iter()
            .filter(|href| href.to_lowercase().contains(href_marker))
            .map(|href| self.normalize_href(&href))
            .collect();

        tracing::info!("Found {} Victory {} files", urls.len(), href_marker);
        Ok(urls)
    }
}

impl Default for Victory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainAdapter for Victory {
    fn name(&self) -> &'static str {
        "victory"
    }

    fn display_name(&self) -> &'static str {
        "ויקטורי"
    }

    async fn list_store_file_urls(&self, fetcher: &Fetcher) -> Result<Vec<String>> {
        self.list_file_urls(fetcher, "storesfull", "stores").await
    }

    async fn list_price_file_urls(&self, fetcher: &Fetcher) -> Result<Vec<String>> {
        self.list_file_urls(fetcher, "pricefull", "price").await
    }

    fn parse_stores(&self, content: &[u8]) -> Vec<StoreRecord> {
        let Some(xml) = decode_utf8(content) else {
            tracing::warn!("Victory store file is not valid UTF-8; skipping");
            return Vec::new();
        };

        let mut stores = Vec::new();
        for fields in collect_elements(xml, "Branch") {
            let Some(store_id) = first_field(&fields, &["StoreID"]) else {
                continue;
            };

            stores.push(StoreRecord {
                name: first_field(&fields, &["StoreName"])
                    .unwrap_or_else(|| format!("Store {store_id}")),
                address: first_field(&fields, &["Address"])
                    .unwrap_or_else(|| "Unknown".to_string()),
                city: first_field(&fields, &["City"]).unwrap_or_else(|| "Unknown".to_string()),
                store_id,
            });
        }

        tracing::info!("Parsed {} Victory stores", stores.len());
        stores
    }

    fn parse_prices(&self, content: &[u8]) -> Vec<PriceRecord> {
        parse_price_xml(content, &PRICE_DIALECT)
    }
}
