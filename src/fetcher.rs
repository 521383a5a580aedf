use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::{
    Config, ENTRIES_PER_PAGE, HTTP_TIMEOUT_SECS, OAUTH_SCOPE, SHOPPING_API_VERSION,
};
use crate::error::{AppError, Result};
use crate::types::{child, walk, RawValue};
use crate::xml::xml_to_value;

/// One page of raw search results.
#[derive(Debug, Default)]
pub struct SearchPage {
    /// Raw listing records. Empty when nothing matched; that is not an error.
    pub items: Vec<Value>,
    /// Pages available for this query, as reported upstream.
    pub total_pages: u32,
}

/// The two upstream calls a fetch cycle needs.
#[allow(async_fn_in_trait)]
pub trait Marketplace {
    /// Listings in `category_id` started at or after `since`, newest first.
    async fn search_page(&self, category_id: &str, since: &str, page: u32) -> Result<SearchPage>;

    /// Detail response for one batch of item ids, converted from XML.
    async fn item_details(&self, item_ids: &[String]) -> Result<Value>;
}

/// Counts detail calls against the daily ceiling.
#[derive(Debug)]
pub struct CallBudget {
    limit: u32,
    used: AtomicU32,
}

impl CallBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    /// Reserve one call, or fail once the ceiling is reached.
    pub fn spend(&self) -> Result<()> {
        let used = self.used.fetch_add(1, Ordering::Relaxed);
        if used >= self.limit {
            self.used.fetch_sub(1, Ordering::Relaxed);
            return Err(AppError::QuotaExhausted { limit: self.limit });
        }
        Ok(())
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Relaxed)
    }
}

/// HTTP client for the Finding (search) and Shopping (detail) APIs.
pub struct EbayClient {
    http: reqwest::Client,
    finding_api_url: String,
    shopping_api_url: String,
    app_id: String,
    access_token: String,
    budget: CallBudget,
}

impl EbayClient {
    /// Build the client and exchange the developer keys for an access token.
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        let access_token = fetch_access_token(&http, cfg).await?;
        info!("Authenticated against {}", cfg.oauth_token_url);

        Ok(Self {
            http,
            finding_api_url: cfg.finding_api_url.clone(),
            shopping_api_url: cfg.shopping_api_url.clone(),
            app_id: cfg.credentials.app_id.clone(),
            access_token,
            budget: CallBudget::new(cfg.daily_call_limit),
        })
    }

    pub fn calls_used(&self) -> u32 {
        self.budget.used()
    }
}

impl Marketplace for EbayClient {
    async fn search_page(&self, category_id: &str, since: &str, page: u32) -> Result<SearchPage> {
        let per_page = ENTRIES_PER_PAGE.to_string();
        let page_number = page.to_string();

        let body: Value = self
            .http
            .get(&self.finding_api_url)
            .header("X-EBAY-SOA-SECURITY-APPNAME", &self.app_id)
            .header("X-EBAY-SOA-OPERATION-NAME", "findItemsByCategory")
            .query(&[
                ("categoryId", category_id),
                ("RESPONSE-DATA-FORMAT", "JSON"),
                ("paginationInput.entriesPerPage", per_page.as_str()),
                ("paginationInput.pageNumber", page_number.as_str()),
                ("sortOrder", "StartTimeNewest"),
                ("itemFilter(0).name", "StartTimeFrom"),
                ("itemFilter(0).value", since),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let parsed = parse_search_page(&body)?;
        debug!(category = category_id, page, items = parsed.items.len(), "search page fetched");
        Ok(parsed)
    }

    async fn item_details(&self, item_ids: &[String]) -> Result<Value> {
        self.budget.spend()?;
        let joined = item_ids.join(",");

        let text = self
            .http
            .get(&self.shopping_api_url)
            .header("X-EBAY-API-IAF-TOKEN", format!("Bearer {}", self.access_token))
            .header("Version", SHOPPING_API_VERSION)
            .query(&[
                ("callname", "GetMultipleItems"),
                ("ItemID", joined.as_str()),
                ("IncludeSelector", "Variations,Details,ItemSpecifics"),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        xml_to_value(&text)
    }
}

/// OAuth2 client-credentials exchange.
async fn fetch_access_token(http: &reqwest::Client, cfg: &Config) -> Result<String> {
    let resp = http
        .post(&cfg.oauth_token_url)
        .basic_auth(&cfg.credentials.app_id, Some(&cfg.credentials.cert_id))
        .form(&[("grant_type", "client_credentials"), ("scope", OAUTH_SCOPE)])
        .send()
        .await?;

    let status = resp.status();
    let body: Value = resp.json().await?;
    if !status.is_success() {
        let reason = body
            .get("error_description")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("no reason given");
        return Err(AppError::Auth(format!("token endpoint returned {status}: {reason}")));
    }

    body.get("access_token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::Auth("token response has no access_token".to_string()))
}

/// Pull the listing records and page count out of a Finding API response.
pub fn parse_search_page(body: &Value) -> Result<SearchPage> {
    let resp = child(body, "findItemsByCategoryResponse").ok_or_else(|| {
        AppError::Upstream("search response has no findItemsByCategoryResponse".to_string())
    })?;

    if child(resp, "ack").and_then(Value::as_str) == Some("Failure") {
        let message = walk(resp, &["errorMessage", "error", "message"])
            .and_then(Value::as_str)
            .unwrap_or("no error message");
        return Err(AppError::Upstream(format!("search call failed: {message}")));
    }

    let items = child(resp, "searchResult")
        .and_then(|r| r.get("item"))
        .map(|v| RawValue::classify(v).items().to_vec())
        .unwrap_or_default();

    let total_pages = walk(resp, &["paginationOutput", "totalPages"])
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(|n| n as u32)
        .unwrap_or(1);

    Ok(SearchPage { items, total_pages })
}
