use std::error::Error as _;
use std::fmt::Write as _;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use crate::batch::batches;
use crate::config::Config;
use crate::db::SqliteSink;
use crate::error::{AppError, Result};
use crate::extract::{extract_details, ListingTable};
use crate::fetcher::{EbayClient, Marketplace};
use crate::merge::{joinable_listings, merge};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Start of the search window: `lookback_hours` before `now`.
pub fn lower_time_bound(now: DateTime<Utc>, lookback_hours: i64) -> Result<String> {
    let lookback = TimeDelta::try_hours(lookback_hours)
        .ok_or_else(|| AppError::Config(format!("LOOKBACK_HOURS {lookback_hours} is out of range")))?;
    let since = now
        .checked_sub_signed(lookback)
        .ok_or_else(|| AppError::Config(format!("LOOKBACK_HOURS {lookback_hours} is out of range")))?;
    Ok(format_timestamp(since))
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryOutcome {
    pub category: String,
    pub rows: u64,
    /// Listings left out of the join for lacking an id or repeating one.
    pub dropped: usize,
}

#[derive(Debug)]
pub struct CycleFailure {
    /// None when the cycle failed before reaching any category.
    pub category: Option<String>,
    pub error: AppError,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub committed: Vec<CategoryOutcome>,
    pub failure: Option<CycleFailure>,
}

impl CycleReport {
    fn aborted(category: Option<String>, error: AppError) -> Self {
        Self {
            committed: Vec::new(),
            failure: Some(CycleFailure { category, error }),
        }
    }

    pub fn rows_written(&self) -> u64 {
        self.committed.iter().map(|c| c.rows).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

/// One full cycle: open the sink, authenticate, process every category,
/// apply the failure policy, close the sink.
pub async fn run_cycle(cfg: &Config) -> CycleReport {
    let now = Utc::now();

    let sink = match SqliteSink::open(&cfg.db_path).await {
        Ok(sink) => sink,
        Err(e) => {
            let report = CycleReport::aborted(None, e);
            handle_failure(cfg, &report, now).await;
            return report;
        }
    };

    let report = match EbayClient::connect(cfg).await {
        Ok(client) => {
            let report = process_categories(&client, &sink, cfg, now).await;
            info!(detail_calls = client.calls_used(), "detail call budget used");
            report
        }
        Err(e) => CycleReport::aborted(None, e),
    };

    handle_failure(cfg, &report, now).await;
    sink.close().await;
    report
}

/// Process categories in configured order, committing each one before
/// moving on. Stops at the first failing category.
pub async fn process_categories<M: Marketplace>(
    market: &M,
    sink: &SqliteSink,
    cfg: &Config,
    now: DateTime<Utc>,
) -> CycleReport {
    let since = match lower_time_bound(now, cfg.lookback_hours) {
        Ok(s) => s,
        Err(e) => return CycleReport::aborted(None, e),
    };
    let fetched_at = format_timestamp(now);
    let mut report = CycleReport::default();

    for category in &cfg.categories {
        match process_category(market, sink, cfg, category, &since, &fetched_at).await {
            Ok(outcome) => {
                info!(category = %category, rows = outcome.rows, dropped = outcome.dropped, "category committed");
                report.committed.push(outcome);
            }
            Err(e) => {
                report.failure = Some(CycleFailure {
                    category: Some(category.clone()),
                    error: e,
                });
                break;
            }
        }
    }

    report
}

async fn process_category<M: Marketplace>(
    market: &M,
    sink: &SqliteSink,
    cfg: &Config,
    category: &str,
    since: &str,
    fetched_at: &str,
) -> Result<CategoryOutcome> {
    let mut table = ListingTable::new();
    for page in 1..=cfg.search_max_pages {
        let result = market.search_page(category, since, page).await?;
        if result.items.is_empty() {
            break;
        }
        table.append(ListingTable::from_page(&result.items));
        if page >= result.total_pages {
            break;
        }
    }

    let (listings, dropped) = joinable_listings(table.records());
    if dropped > 0 {
        warn!(category, dropped, "dropped listings without a usable item id");
    }
    if listings.is_empty() {
        info!(category, "no new listings");
        return Ok(CategoryOutcome {
            category: category.to_string(),
            rows: 0,
            dropped,
        });
    }

    let ids: Vec<String> = listings
        .iter()
        .filter_map(|l| l.item_id.as_text().map(str::to_string))
        .collect();

    let mut responses = Vec::new();
    for (batch, group) in batches(&ids, cfg.detail_batch_size).enumerate() {
        responses.push(market.item_details(group).await?);
        debug!(category, batch, ids = group.len(), "detail batch fetched");
    }

    let details = extract_details(&responses)?;
    let rows = merge(&listings, &details, fetched_at)?;
    let written = sink.append(&cfg.table_name, &rows).await?;

    Ok(CategoryOutcome {
        category: category.to_string(),
        rows: written,
        dropped,
    })
}

// ---------------------------------------------------------------------------
// Failure policy
// ---------------------------------------------------------------------------

/// Connectivity failures are logged only. Anything else also overwrites the
/// failure log with the category, the error and its source chain.
pub async fn handle_failure(cfg: &Config, report: &CycleReport, at: DateTime<Utc>) {
    let Some(failure) = &report.failure else {
        return;
    };
    let category = failure.category.as_deref().unwrap_or("<none>");

    if failure.error.is_connectivity() {
        error!(category, error = %failure.error, "upstream unreachable, cycle aborted");
        return;
    }

    error!(category, error = %failure.error, "cycle failed");
    let body = failure_report(failure, at);
    if let Err(e) = tokio::fs::write(&cfg.failure_log_path, body).await {
        error!(path = %cfg.failure_log_path, "could not write failure log: {e}");
    }
}

fn failure_report(failure: &CycleFailure, at: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "time: {}", format_timestamp(at));
    let _ = writeln!(out, "category: {}", failure.category.as_deref().unwrap_or("<none>"));
    let _ = writeln!(out, "error: {}", failure.error);
    let mut source = failure.error.source();
    while let Some(cause) = source {
        let _ = writeln!(out, "caused by: {cause}");
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::fetcher::SearchPage;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-process marketplace: fixed listings per category, details derived from ids.
    #[derive(Default)]
    struct FakeMarketplace {
        listings: HashMap<String, Vec<Value>>,
        page_size: usize,
        /// Category whose detail items come back without a category id.
        broken: Option<String>,
        /// Category whose last detail batch is rejected upstream.
        rejected: Option<String>,
        detail_batches: Mutex<Vec<usize>>,
    }

    impl FakeMarketplace {
        fn with_listings(page_size: usize, categories: &[(&str, usize)]) -> Self {
            let listings = categories
                .iter()
                .map(|&(cat, n)| (cat.to_string(), (0..n).map(|i| listing(cat, i)).collect()))
                .collect();
            Self {
                listings,
                page_size,
                ..Default::default()
            }
        }
    }

    fn listing(category: &str, i: usize) -> Value {
        json!({
            "itemId": [format!("{category}-{i}")],
            "title": [format!("Item {i}")],
            "viewItemURL": [format!("https://www.ebay.com/itm/{category}-{i}")],
            "country": ["US"],
            "sellingStatus": [{"convertedCurrentPrice": [{"@currencyId": "USD", "__value__": "12.5"}]}],
            "listingInfo": [{"startTime": ["2022-02-27T04:00:00.000Z"]}],
            "primaryCategory": [{"categoryId": [category]}]
        })
    }

    impl Marketplace for FakeMarketplace {
        async fn search_page(&self, category_id: &str, _since: &str, page: u32) -> Result<SearchPage> {
            let all = self.listings.get(category_id).cloned().unwrap_or_default();
            let total_pages = all.len().div_ceil(self.page_size) as u32;
            let items = all
                .chunks(self.page_size)
                .nth(page as usize - 1)
                .map(<[Value]>::to_vec)
                .unwrap_or_default();
            Ok(SearchPage { items, total_pages })
        }

        async fn item_details(&self, item_ids: &[String]) -> Result<Value> {
            self.detail_batches.lock().unwrap().push(item_ids.len());
            let category = item_ids[0].split('-').next().unwrap_or_default();
            if self.rejected.as_deref() == Some(category) && item_ids.len() < 2 {
                return Ok(json!({"GetMultipleItemsResponse": {
                    "Ack": "Failure",
                    "Errors": {"ShortMessage": "Invalid item ID.", "ErrorCode": "10.12"}
                }}));
            }
            let items: Vec<Value> = item_ids
                .iter()
                .map(|id| {
                    let category = id.split('-').next().unwrap_or_default();
                    if self.broken.as_deref() == Some(category) {
                        json!({"ItemID": id})
                    } else {
                        json!({
                            "ItemID": id,
                            "PrimaryCategoryID": category,
                            "Seller": {"UserID": format!("seller-{id}")},
                            "PictureURL": [format!("https://i.ebayimg.com/{id}/1.jpg"), "https://i.ebayimg.com/2.jpg"]
                        })
                    }
                })
                .collect();
            Ok(json!({"GetMultipleItemsResponse": {"Ack": "Success", "Item": items}}))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 2, 27, 0, 5, 0).unwrap()
    }

    fn config(categories: &[&str]) -> Config {
        let mut cfg = test_config();
        cfg.categories = categories.iter().map(|c| c.to_string()).collect();
        cfg.search_max_pages = 5;
        cfg.detail_batch_size = 2;
        cfg
    }

    #[test]
    fn time_bound_looks_back_from_now() {
        assert_eq!(lower_time_bound(now(), 24).unwrap(), "2022-02-26T00:05:00.000Z");
        assert_eq!(format_timestamp(now()), "2022-02-27T00:05:00.000Z");
        assert!(lower_time_bound(now(), i64::MAX).is_err());
        // Fits in a TimeDelta but lands before the earliest representable date.
        assert!(matches!(lower_time_bound(now(), 3_000_000_000), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn all_categories_are_committed() {
        let market = FakeMarketplace::with_listings(3, &[("37908", 7), ("20081", 2)]);
        let sink = SqliteSink::open(":memory:").await.unwrap();
        let cfg = config(&["37908", "20081"]);

        let report = process_categories(&market, &sink, &cfg, now()).await;
        assert!(report.is_success());
        assert_eq!(report.rows_written(), 9);
        assert_eq!(*market.detail_batches.lock().unwrap(), vec![2, 2, 2, 1, 2]);

        let stored = sink.stored_items("item_specs").await.unwrap();
        assert_eq!(stored.len(), 9);
        assert_eq!(stored[0].item_id, "37908-0");
        assert_eq!(stored[0].fetched_at, "2022-02-27T00:05:00.000Z");
        assert_eq!(stored[0].image_url.as_deref(), Some("https://i.ebayimg.com/37908-0/1.jpg"));
        let seller = stored[0].seller_id.as_deref().unwrap();
        assert_eq!(seller.len(), 64);
        assert!(!seller.contains("seller-"));
    }

    #[tokio::test]
    async fn page_limit_caps_the_search() {
        let market = FakeMarketplace::with_listings(3, &[("37908", 7)]);
        let sink = SqliteSink::open(":memory:").await.unwrap();
        let mut cfg = config(&["37908"]);
        cfg.search_max_pages = 1;

        let report = process_categories(&market, &sink, &cfg, now()).await;
        assert_eq!(report.rows_written(), 3);
    }

    #[tokio::test]
    async fn empty_category_makes_no_detail_calls() {
        let market = FakeMarketplace::with_listings(3, &[]);
        let sink = SqliteSink::open(":memory:").await.unwrap();
        let report = process_categories(&market, &sink, &config(&["37908"]), now()).await;

        assert!(report.is_success());
        assert_eq!(report.committed[0].rows, 0);
        assert!(market.detail_batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn listings_without_ids_are_dropped_before_batching() {
        let mut market = FakeMarketplace::with_listings(10, &[("37908", 3)]);
        let page = market.listings.get_mut("37908").unwrap();
        page.push(json!({"title": ["no id"]}));
        page.push(listing("37908", 0));

        let sink = SqliteSink::open(":memory:").await.unwrap();
        let report = process_categories(&market, &sink, &config(&["37908"]), now()).await;

        assert!(report.is_success());
        assert_eq!(report.committed[0].rows, 3);
        assert_eq!(report.committed[0].dropped, 2);
    }

    #[tokio::test]
    async fn failing_category_keeps_earlier_commits_and_writes_log() {
        let mut market = FakeMarketplace::with_listings(5, &[("37908", 4), ("20081", 3), ("11116", 2)]);
        market.broken = Some("20081".to_string());
        let sink = SqliteSink::open(":memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&["37908", "20081", "11116"]);
        cfg.failure_log_path = dir.path().join("failure.log").to_string_lossy().into_owned();

        let report = process_categories(&market, &sink, &cfg, now()).await;
        assert_eq!(report.committed.len(), 1);
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.category.as_deref(), Some("20081"));
        assert!(matches!(
            failure.error,
            AppError::MissingKey { field: "PrimaryCategoryID", group: 0, index: 0 }
        ));

        let stored = sink.stored_items("item_specs").await.unwrap();
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|r| r.category_id == "37908"));

        handle_failure(&cfg, &report, now()).await;
        let log = std::fs::read_to_string(&cfg.failure_log_path).unwrap();
        assert!(log.contains("category: 20081"));
        assert!(log.contains("PrimaryCategoryID"));
        assert!(log.starts_with("time: 2022-02-27T00:05:00.000Z"));
    }

    #[tokio::test]
    async fn rejected_detail_batch_fails_category_without_writing() {
        // 3 listings with batches of 2: the second batch (1 id) is rejected.
        let mut market = FakeMarketplace::with_listings(5, &[("37908", 2), ("20081", 3), ("11116", 2)]);
        market.rejected = Some("20081".to_string());
        let sink = SqliteSink::open(":memory:").await.unwrap();
        let cfg = config(&["37908", "20081", "11116"]);

        let report = process_categories(&market, &sink, &cfg, now()).await;
        assert_eq!(report.committed.len(), 1);
        assert_eq!(report.committed[0].category, "37908");
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.category.as_deref(), Some("20081"));
        assert!(matches!(
            failure.error,
            AppError::Alignment { listings: 3, details: 2 }
        ));

        let stored = sink.stored_items("item_specs").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|r| r.category_id == "37908"));
    }

    #[tokio::test]
    async fn fifty_listings_with_forty_nine_details_appends_nothing() {
        let mut market = FakeMarketplace::with_listings(100, &[("37908", 50)]);
        market.rejected = Some("37908".to_string());
        let sink = SqliteSink::open(":memory:").await.unwrap();
        let mut cfg = config(&["37908"]);
        cfg.detail_batch_size = 7;

        // Seven full batches, then a single id that is rejected upstream.
        let report = process_categories(&market, &sink, &cfg, now()).await;
        assert_eq!(*market.detail_batches.lock().unwrap(), vec![7, 7, 7, 7, 7, 7, 7, 1]);
        assert!(report.committed.is_empty());
        assert!(matches!(
            report.failure.as_ref().map(|f| &f.error),
            Some(AppError::Alignment { listings: 50, details: 49 })
        ));
        assert!(sink.stored_items("item_specs").await.unwrap().is_empty());
    }

    #[test]
    fn failure_report_lists_source_chain() {
        let failure = CycleFailure {
            category: Some("37908".to_string()),
            error: AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")),
        };
        let report = failure_report(&failure, now());
        assert!(report.contains("error: IO error: disk full"));
        assert!(report.contains("caused by: disk full"));
    }

    #[tokio::test]
    async fn failure_log_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config();
        cfg.failure_log_path = dir.path().join("failure.log").to_string_lossy().into_owned();

        let first = CycleReport::aborted(Some("37908".to_string()), AppError::Upstream("first".to_string()));
        let second = CycleReport::aborted(None, AppError::Auth("second".to_string()));
        handle_failure(&cfg, &first, now()).await;
        handle_failure(&cfg, &second, now()).await;

        let log = std::fs::read_to_string(&cfg.failure_log_path).unwrap();
        assert!(!log.contains("first"));
        assert!(log.contains("category: <none>"));
        assert!(log.contains("Authentication error: second"));
    }

    #[tokio::test]
    async fn connectivity_failure_is_not_written() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = reqwest::get(format!("http://{addr}/")).await.unwrap_err();

        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config();
        cfg.failure_log_path = dir.path().join("failure.log").to_string_lossy().into_owned();

        let report = CycleReport::aborted(Some("37908".to_string()), AppError::Http(err));
        handle_failure(&cfg, &report, now()).await;
        assert!(!std::path::Path::new(&cfg.failure_log_path).exists());
    }

    #[tokio::test]
    async fn unreachable_database_directory_aborts_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config();
        cfg.db_path = dir.path().join("missing/dir/ebay.db").to_string_lossy().into_owned();
        cfg.failure_log_path = dir.path().join("failure.log").to_string_lossy().into_owned();

        let report = run_cycle(&cfg).await;
        assert!(!report.is_success());
        assert!(report.committed.is_empty());
        assert!(matches!(
            report.failure.as_ref().map(|f| &f.error),
            Some(AppError::Database(_))
        ));
        assert!(std::path::Path::new(&cfg.failure_log_path).exists());
    }
}
