use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::fetch::Fetcher;

use super::{
    collect_elements, decode_utf8, extract_anchor_hrefs, file_name_of, first_field,
    parse_price_xml, strip_leading_zeros, ChainAdapter, PriceDialect, PriceRecord, StoreRecord,
};

const DOWNLOAD_ANCHOR: &str = "לחץ להורדה";
const LAST_PAGE_ANCHOR: &str = ">>";

static PAGE_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"page=(\d+)").expect("page regex"));

const PRICE_DIALECT: PriceDialect = PriceDialect {
    store_id_fields: &["StoreId", "StoreID", "STOREID"],
    product_containers: &["Product", "Item", "PRODUCT"],
    barcode_fields: &["ItemCode", "Barcode", "ITEMCODE"],
    name_fields: &["ItemName", "ProductName", "ITEMNAME"],
    price_fields: &["ItemPrice", "Price", "ITEMPRICE"],
    strip_store_id_zeros: true,
};

/// Shufersal publishes category-indexed file lists; category 2 (prices) is
/// paginated, category 5 (stores) is a single page.
pub struct Shufersal {
    base_url: String,
}

impl Shufersal {
    pub fn new() -> Self {
        Self::with_base_url("https://prices.shufersal.co.il")
    }

    /// Tests point this at a mock server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn stores_index_url(&self) -> String {
        format!("{}/FileObject/UpdateCategory?catID=5", self.base_url)
    }

    fn prices_page_url(&self, page: u32) -> String {
        format!(
            "{}/FileObject/UpdateCategory?catID=2&storeId=0&page={}",
            self.base_url, page
        )
    }

    fn absolutize(&self, href: String) -> String {
        if href.starts_with("http") {
            href
        } else {
            format!("{}{}", self.base_url, href)
        }
    }
}

impl Default for Shufersal {
    fn default() -> Self {
        Self::new()
    }
}

/// The terminal page number, read from the ">>" anchor's page= parameter.
fn find_last_page(html: &str) -> Option<u32> {
    extract_anchor_hrefs(html, LAST_PAGE_ANCHOR)
        .into_iter()
        .find_map(|href| {
            PAGE_PARAM_RE
                .captures(&href)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
}

#[async_trait]
impl ChainAdapter for Shufersal {
    fn name(&self) -> &'static str {
        "shufersal"
    }

    fn display_name(&self) -> &'static str {
        "שופרסל"
    }

    async fn list_store_file_urls(&self, fetcher: &Fetcher) -> Result<Vec<String>> {
        let html = fetcher.get_text(&self.stores_index_url()).await?;
        let urls: Vec<String> = extract_anchor_hrefs(&html, DOWNLOAD_ANCHOR)
            .into_iter()
            .map(|href| self.absolutize(href))
            .collect();

        tracing::info!("Found {} Shufersal store files", urls.len());
        Ok(urls)
    }

    async fn list_price_file_urls(&self, fetcher: &Fetcher) -> Result<Vec<String>> {
        tracing::info!("Getting Shufersal price file URLs...");

        let first_page = fetcher.get_text(&self.prices_page_url(1)).await?;
        let last_page = match find_last_page(&first_page) {
            Some(n) => n,
            None => {
                // If the upstream site drops the ">>" marker, discovery
                // silently caps at page 1 — make the silence audible.
                tracing::warn!("No '>>' anchor on Shufersal page 1; assuming a single page");
                1
            }
        };
        tracing::info!("Found {} pages of price files", last_page);

        let mut urls = Vec::new();
        let mut seen_files = std::collections::HashSet::new();

        for page in 1..=last_page {
            let html = if page == 1 {
                first_page.clone()
            } else {
                match fetcher.get_text(&self.prices_page_url(page)).await {
                    Ok(html) => html,
                    Err(e) => {
                        tracing::error!("Failed to fetch Shufersal page {}: {}", page, e);
                        continue;
                    }
                }
            };

            for href in extract_anchor_hrefs(&html, DOWNLOAD_ANCHOR) {
                if seen_files.insert(file_name_of(&href)) {
                    urls.push(self.absolutize(href));
                }
            }
        }

        tracing::info!("Found {} unique Shufersal price files", urls.len());
        Ok(urls)
    }

    fn parse_stores(&self, content: &[u8]) -> Vec<StoreRecord> {
        let Some(xml) = decode_utf8(content) else {
            tracing::warn!("Shufersal store file is not valid UTF-8; skipping");
            return Vec::new();
        };

        let mut stores = Vec::new();
        for fields in collect_elements(xml, "STORE") {
            // A store without a numeric id is skipped; its siblings proceed.
            let Some(store_id) =
                first_field(&fields, &["STOREID"]).and_then(|raw| strip_leading_zeros(&raw))
            else {
                continue;
            };

            stores.push(StoreRecord {
                name: first_field(&fields, &["STORENAME"])
                    .unwrap_or_else(|| format!("Store {store_id}")),
                address: first_field(&fields, &["ADDRESS"]).unwrap_or_default(),
                city: first_field(&fields, &["CITY"]).unwrap_or_default(),
                store_id,
            });
        }

        tracing::info!("Parsed {} Shufersal stores", stores.len());
        stores
    }

    fn parse_prices(&self, content: &[u8]) -> Vec<PriceRecord> {
        parse_price_xml(content, &PRICE_DIALECT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const STORES_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Root>
  <STORE>
    <STOREID>012</STOREID>
    <STORENAME>שופרסל דיל תל אביב</STORENAME>
    <ADDRESS>דרך נמיר 12</ADDRESS>
    <CITY>תל אביב</CITY>
  </STORE>
  <STORE>
    <STOREID>not-a-number</STOREID>
    <STORENAME>broken</STORENAME>
  </STORE>
  <STORE>
    <STOREID>7</STOREID>
  </STORE>
</Root>"#;

    #[test]
    fn parses_stores_and_strips_leading_zeros() {
        let stores = Shufersal::new().parse_stores(STORES_XML.as_bytes());
        assert_eq!(stores.len(), 2);
        assert_eq!(stores[0].store_id, "12");
        assert_eq!(stores[0].name, "שופרסל דיל תל אביב");
        assert_eq!(stores[0].city, "תל אביב");
        // Missing name falls back, missing address/city default empty
        assert_eq!(stores[1].store_id, "7");
        assert_eq!(stores[1].name, "Store 7");
        assert_eq!(stores[1].city, "");
    }

    #[test]
    fn parses_prices_with_field_fallbacks() {
        let xml = r#"<Prices>
  <StoreId>005</StoreId>
  <Items>
    <Product>
      <ItemCode>7290000000001</ItemCode>
      <ItemName>חלב 3% 1 ליטר</ItemName>
      <ItemPrice>5.90</ItemPrice>
    </Product>
    <Product>
      <Barcode>7290000000002</Barcode>
      <ProductName>לחם אחיד</ProductName>
      <Price>7.50</Price>
    </Product>
    <Product>
      <ItemCode>7290000000003</ItemCode>
      <ItemName>מחיר שבור</ItemName>
      <ItemPrice>free</ItemPrice>
    </Product>
    <Product>
      <ItemCode>7290000000004</ItemCode>
      <ItemPrice>-2.00</ItemPrice>
    </Product>
  </Items>
</Prices>"#;

        let prices = Shufersal::new().parse_prices(xml.as_bytes());
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].store_id, "5");
        assert_eq!(prices[0].barcode, "7290000000001");
        assert_eq!(prices[0].price, 5.90);
        assert_eq!(prices[1].name, "לחם אחיד");
        assert_eq!(prices[1].price, 7.50);
    }

    #[test]
    fn falls_back_to_item_container() {
        let xml = r#"<Prices>
  <STOREID>9</STOREID>
  <Item><ItemCode>111</ItemCode><ItemPrice>3.20</ItemPrice></Item>
</Prices>"#;
        let prices = Shufersal::new().parse_prices(xml.as_bytes());
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].name, "Product 111");
    }

    #[test]
    fn price_file_without_store_id_yields_nothing() {
        let xml = "<Prices><Product><ItemCode>1</ItemCode><ItemPrice>2</ItemPrice></Product></Prices>";
        assert!(Shufersal::new().parse_prices(xml.as_bytes()).is_empty());
    }

    fn price_page(links: &[&str], with_last: Option<u32>) -> String {
        let mut body = String::from("<html><body>");
        for link in links {
            body.push_str(&format!("<a href=\"{link}\">לחץ להורדה</a>"));
        }
        if let Some(n) = with_last {
            body.push_str(&format!("<a href=\"/FileObject/UpdateCategory?catID=2&storeId=0&page={n}\">&gt;&gt;</a>"));
        }
        body.push_str("</body></html>");
        body
    }

    #[tokio::test]
    async fn pagination_fetches_exactly_the_discovered_pages() {
        let server = MockServer::start();

        let page1 = server.mock(|when, then| {
            when.method(GET)
                .path("/FileObject/UpdateCategory")
                .query_param("page", "1");
            then.status(200)
                .body(price_page(&["/files/Price1.gz"], Some(3)));
        });
        let page2 = server.mock(|when, then| {
            when.method(GET)
                .path("/FileObject/UpdateCategory")
                .query_param("page", "2");
            then.status(200).body(price_page(&["/files/Price2.gz"], Some(3)));
        });
        let page3 = server.mock(|when, then| {
            when.method(GET)
                .path("/FileObject/UpdateCategory")
                .query_param("page", "3");
            then.status(200)
                // Page 3 repeats a file from page 1; dedup drops it
                .body(price_page(&["/files/Price3.gz", "/files/Price1.gz"], Some(3)));
        });
        let page4 = server.mock(|when, then| {
            when.method(GET)
                .path("/FileObject/UpdateCategory")
                .query_param("page", "4");
            then.status(200).body(price_page(&["/files/Price4.gz"], None));
        });

        let adapter = Shufersal::with_base_url(server.base_url());
        let urls = adapter.list_price_file_urls(&Fetcher::new()).await.unwrap();

        page1.assert();
        page2.assert();
        page3.assert();
        page4.assert_hits(0);

        let files: Vec<_> = urls.iter().map(|u| file_name_of(u)).collect();
        assert_eq!(files, vec!["Price1.gz", "Price2.gz", "Price3.gz"]);
        assert!(urls[0].starts_with(&server.base_url()));
    }

    #[tokio::test]
    async fn missing_last_page_anchor_caps_at_page_one() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/FileObject/UpdateCategory")
                .query_param("page", "1");
            then.status(200).body(price_page(&["/files/PriceOnly.gz"], None));
        });

        let adapter = Shufersal::with_base_url(server.base_url());
        let urls = adapter.list_price_file_urls(&Fetcher::new()).await.unwrap();
        assert_eq!(urls.len(), 1);
    }

    #[tokio::test]
    async fn store_index_is_a_single_page() {
        let server = MockServer::start();
        let stores = server.mock(|when, then| {
            when.method(GET)
                .path("/FileObject/UpdateCategory")
                .query_param("catID", "5");
            then.status(200)
                .body("<a href=\"/files/Stores1.gz\">לחץ להורדה</a>");
        });

        let adapter = Shufersal::with_base_url(server.base_url());
        let urls = adapter.list_store_file_urls(&Fetcher::new()).await.unwrap();

        stores.assert();
        assert_eq!(urls, vec![format!("{}/files/Stores1.gz", server.base_url())]);
    }
}
