//! Saved-submission tables and their model-generated aggregations.
//!
//! A table holds the rows returned by a date-range query. Two aggregations
//! stream back over the duplex channel: a recommendation ordering keyed by
//! the fingerprint of the current rows, and a combined text of the selected
//! rows. Recommendations are cached per fingerprint for the whole session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;

use quill_channel::api::Backend;
use quill_channel::frame::{CorrelationKey, END_SENTINEL, error_detail, is_completion};

use crate::config::QuillCfg;
use crate::fingerprint;
use crate::partial_json::{clean_json_string, parse_partial};
use crate::types::{Recommendation, TableItem};
use crate::ui::{AlertKind, GENERIC_ERROR, UiStore};
use crate::watchdog::Watchdog;

pub const ASSOCIATE_TABLE: &str = "associate";
pub const MANAGER_TABLE_PREFIX: &str = "manager-";
/// Months searched when no month filter is set.
const ALL_MONTHS_BACK: u32 = 120;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    #[error("no outstanding request for fingerprint {0}")]
    NotPending(u32),
    #[error("recommendation payload: {0}")]
    Decode(String),
}

// ── Aggregation cache ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(Recommendation),
    /// A request for this fingerprint is already outstanding.
    Pending,
    /// Now marked outstanding; the caller must issue the request.
    Miss,
}

#[derive(Debug, Deserialize)]
struct RecommendationPayload {
    submission_nos: Vec<u32>,
    #[serde(default)]
    preamble: String,
    #[serde(default)]
    explanations: Vec<String>,
}

/// Completed recommendations plus the raw streams of outstanding ones.
#[derive(Debug, Default)]
pub struct AggregationCache {
    done: HashMap<u32, Recommendation>,
    streams: HashMap<u32, String>,
    partial: HashMap<u32, Recommendation>,
}

impl AggregationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, fingerprint: u32) -> Lookup {
        if let Some(hit) = self.done.get(&fingerprint) {
            return Lookup::Hit(hit.clone());
        }
        if self.streams.contains_key(&fingerprint) {
            return Lookup::Pending;
        }
        self.streams.insert(fingerprint, String::new());
        Lookup::Miss
    }

    pub fn is_pending(&self, fingerprint: u32) -> bool {
        self.streams.contains_key(&fingerprint)
    }

    /// Add a fragment and return the best partial result so far.
    /// Fragments for fingerprints that are not outstanding are dropped.
    pub fn append(&mut self, fingerprint: u32, fragment: &str) -> Option<&Recommendation> {
        let stream = self.streams.get_mut(&fingerprint)?;
        stream.push_str(fragment);
        if let Some(value) = parse_partial(&clean_json_string(stream)) {
            self.partial.insert(fingerprint, partial_recommendation(&value));
        }
        self.partial.get(&fingerprint)
    }

    /// Parse the finished stream and cache it.
    pub fn complete(&mut self, fingerprint: u32) -> Result<Recommendation, AggregationError> {
        self.partial.remove(&fingerprint);
        let stream = self
            .streams
            .remove(&fingerprint)
            .ok_or(AggregationError::NotPending(fingerprint))?;
        let payload: RecommendationPayload = serde_json::from_str(&clean_json_string(&stream))
            .map_err(|e| AggregationError::Decode(e.to_string()))?;
        let rec = Recommendation {
            row_nums: payload.submission_nos,
            preamble: payload.preamble,
            explanations: payload.explanations,
        };
        self.done.insert(fingerprint, rec.clone());
        Ok(rec)
    }

    /// Forget an outstanding request so it can be issued again.
    pub fn abandon(&mut self, fingerprint: u32) {
        self.streams.remove(&fingerprint);
        self.partial.remove(&fingerprint);
    }

    pub fn get(&self, fingerprint: u32) -> Option<&Recommendation> {
        self.done.get(&fingerprint)
    }

    pub fn partial(&self, fingerprint: u32) -> Option<&Recommendation> {
        self.partial.get(&fingerprint)
    }
}

fn partial_recommendation(value: &Value) -> Recommendation {
    Recommendation {
        row_nums: value["submission_nos"]
            .as_array()
            .map(|a| a.iter().filter_map(|n| n.as_u64()).filter_map(|n| u32::try_from(n).ok()).collect())
            .unwrap_or_default(),
        preamble: value["preamble"].as_str().unwrap_or_default().to_owned(),
        explanations: value["explanations"]
            .as_array()
            .map(|a| a.iter().filter_map(|s| s.as_str().map(str::to_owned)).collect())
            .unwrap_or_default(),
    }
}

// ── Item helpers ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRow {
    submission_ts: String,
    name: String,
    customer: String,
    category: String,
    text: String,
}

/// Number rows from 1 in the order the backend returned them.
fn with_row_nums(rows: Vec<RawRow>) -> Vec<TableItem> {
    rows.into_iter()
        .zip(1..)
        .map(|(r, row_num)| TableItem {
            row_num,
            submission_ts: r.submission_ts,
            name: r.name,
            customer: r.customer,
            category: r.category,
            text: r.text,
        })
        .collect()
}

fn parse_ts(ts: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Newest first. Unparsable timestamps sort last.
pub fn sort_by_date(items: &mut [TableItem]) {
    items.sort_by(|a, b| parse_ts(&b.submission_ts).cmp(&parse_ts(&a.submission_ts)));
}

/// Recommended rows first, in recommendation order, then everything else.
pub fn sorted_by_recommendation(items: &[TableItem], rec: &Recommendation) -> Vec<TableItem> {
    let mut sorted: Vec<TableItem> = rec
        .row_nums
        .iter()
        .flat_map(|n| items.iter().filter(move |i| i.row_num == *n))
        .cloned()
        .collect();
    sorted.extend(items.iter().filter(|i| !rec.row_nums.contains(&i.row_num)).cloned());
    sorted
}

/// First and last day of the month `months_back` months before `today`.
pub fn month_range(months_back: u32, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let index = today.year() * 12 + today.month0() as i32 - months_back as i32;
    let (year, month0) = (index.div_euclid(12), index.rem_euclid(12) as u32);
    let start = NaiveDate::from_ymd_opt(year, month0 + 1, 1)?;
    let next = if month0 == 11 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month0 + 2, 1)?
    };
    Some((start, next.pred_opt()?))
}

// ── Controller ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFilters {
    /// Months back from the current month; `None` searches everything.
    pub month: Option<u32>,
    pub category: Option<String>,
    pub name: String,
    pub customer: String,
}

/// Everything a view renders for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableView {
    pub table: String,
    pub items: Vec<TableItem>,
    pub selected: Vec<u32>,
    pub items_hash: u32,
    pub total_pages: usize,
    pub current_page: usize,
    pub filters: TableFilters,
    pub is_loading_items: bool,
    pub is_loading_recommendations: bool,
    /// Complete recommendation for the current rows, else the streaming partial.
    pub recommendation: Option<Recommendation>,
    pub combined_text: String,
    pub is_loading_combined: bool,
}

struct TableState {
    view: TableView,
    cache: AggregationCache,
    recommendation_timers: HashMap<u32, Watchdog>,
}

struct Inner {
    table: String,
    cfg: Arc<QuillCfg>,
    backend: Arc<dyn Backend>,
    ui: UiStore,
    combine_timer: Watchdog,
    state: Mutex<TableState>,
    view_tx: watch::Sender<TableView>,
}

/// Controller for one table (`associate` or `manager-<category>`).
#[derive(Clone)]
pub struct TableController {
    inner: Arc<Inner>,
}

impl TableController {
    pub fn new(table: impl Into<String>, cfg: Arc<QuillCfg>, backend: Arc<dyn Backend>, ui: UiStore) -> Self {
        let table = table.into();
        let view = TableView {
            table: table.clone(),
            total_pages: 1,
            current_page: 1,
            ..TableView::default()
        };
        let (view_tx, _) = watch::channel(view.clone());
        let combine_timer = Watchdog::new(cfg.watchdog());
        Self {
            inner: Arc::new(Inner {
                table,
                cfg,
                backend,
                ui,
                combine_timer,
                state: Mutex::new(TableState {
                    view,
                    cache: AggregationCache::new(),
                    recommendation_timers: HashMap::new(),
                }),
                view_tx,
            }),
        }
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    pub fn snapshot(&self) -> TableView {
        self.lock().view.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TableView> {
        self.inner.view_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the state and publish the resulting view.
    fn update<R>(&self, f: impl FnOnce(&mut TableState) -> R) -> R {
        let mut guard = self.lock();
        let s = &mut *guard;
        let out = f(s);
        let hash = s.view.items_hash;
        s.view.recommendation = s.cache.get(hash).or_else(|| s.cache.partial(hash)).cloned();
        self.inner.view_tx.send_replace(s.view.clone());
        out
    }

    fn alert(&self) {
        self.inner.ui.add_alert(AlertKind::Error, GENERIC_ERROR);
    }

    // ── filters, selection, paging ──

    pub fn set_month(&self, month: Option<u32>) {
        self.update(|s| s.view.filters.month = month);
    }

    pub fn set_category(&self, category: Option<String>) {
        self.update(|s| s.view.filters.category = category.filter(|c| !c.is_empty()));
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.update(|s| s.view.filters.name = name);
    }

    pub fn set_customer(&self, customer: impl Into<String>) {
        let customer = customer.into();
        self.update(|s| s.view.filters.customer = customer);
    }

    /// Replace the selection; unknown row numbers are dropped.
    pub fn select(&self, rows: &[u32]) {
        self.update(|s| {
            s.view.selected = rows
                .iter()
                .copied()
                .filter(|r| s.view.items.iter().any(|i| i.row_num == *r))
                .collect();
        });
    }

    pub fn set_page(&self, page: usize) {
        self.update(|s| s.view.current_page = page.clamp(1, s.view.total_pages.max(1)));
    }

    /// Rows on the current page.
    pub fn page_items(&self) -> Vec<TableItem> {
        let per_page = self.inner.cfg.items_per_page;
        let s = self.lock();
        s.view
            .items
            .iter()
            .skip((s.view.current_page.max(1) - 1) * per_page)
            .take(per_page)
            .cloned()
            .collect()
    }

    // ── items ──

    pub fn clear_items(&self) {
        self.update(|s| {
            s.view.items.clear();
            s.view.selected.clear();
            s.view.items_hash = 0;
            s.view.total_pages = 1;
            s.view.current_page = 1;
        });
    }

    /// Install rows: newest first, fingerprinted, back on page one.
    pub fn set_items(&self, mut items: Vec<TableItem>) {
        sort_by_date(&mut items);
        let hash = fingerprint::of(&items);
        let per_page = self.inner.cfg.items_per_page;
        self.update(|s| {
            s.view.total_pages = items.len().div_ceil(per_page).max(1);
            s.view.items = items;
            s.view.items_hash = hash;
            s.view.current_page = 1;
            s.view.selected.clear();
        });
    }

    pub fn sort_by_date(&self) {
        self.update(|s| sort_by_date(&mut s.view.items));
    }

    /// Reorder rows by the cached recommendation for the current rows, if any.
    pub fn sort_by_recommendation(&self) {
        self.update(|s| {
            if let Some(rec) = s.cache.get(s.view.items_hash) {
                s.view.items = sorted_by_recommendation(&s.view.items, rec);
            }
        });
    }

    pub fn current_recommendation(&self) -> Option<Recommendation> {
        let s = self.lock();
        s.cache.get(s.view.items_hash).cloned()
    }

    pub fn items_sorted_by_recommendation(&self) -> Vec<TableItem> {
        let s = self.lock();
        match s.cache.get(s.view.items_hash) {
            Some(rec) => sorted_by_recommendation(&s.view.items, rec),
            None => s.view.items.clone(),
        }
    }

    /// Query parameters for the current filters.
    pub fn query_params(&self, today: NaiveDate) -> Vec<(String, String)> {
        let filters = self.lock().view.filters.clone();
        let (start, end) = match filters.month {
            Some(m) => month_range(m, today),
            None => month_range(ALL_MONTHS_BACK, today)
                .zip(month_range(0, today))
                .map(|((start, _), (_, end))| (start, end)),
        }
        .unwrap_or((today, today));

        let mut params = Vec::new();
        match self.inner.table.strip_prefix(MANAGER_TABLE_PREFIX) {
            Some(category) => {
                params.push(("category".to_owned(), category.to_owned()));
                params.push(("name".to_owned(), filters.name));
                params.push(("customer".to_owned(), filters.customer));
            }
            None => {
                params.push(("name".to_owned(), filters.name));
                if let Some(category) = filters.category {
                    params.push(("category".to_owned(), category));
                }
            }
        }
        params.push(("start_date".to_owned(), start.to_string()));
        params.push(("end_date".to_owned(), end.to_string()));
        params
    }

    fn query_resource(&self) -> &'static str {
        if self.inner.table == ASSOCIATE_TABLE {
            "view_submission_associates"
        } else {
            "view_submission_managers"
        }
    }

    /// Load rows for the current filters, then recommendations if insights are shown.
    pub async fn fetch_items(&self) {
        if self.inner.table == ASSOCIATE_TABLE {
            match self.inner.backend.user_name().await {
                Ok(name) => self.set_name(name),
                Err(e) => {
                    tracing::error!(table = %self.inner.table, error = %e, "user name unavailable");
                    self.alert();
                    return;
                }
            }
        }

        let params = self.query_params(chrono::Local::now().date_naive());
        self.clear_items();
        self.update(|s| s.view.is_loading_items = true);

        let fetched = match self.inner.backend.query(self.query_resource(), params).await {
            Ok(reply) => {
                let rows: Vec<RawRow> = reply["data"]
                    .as_array()
                    .map(|rows| {
                        rows.iter()
                            .filter_map(|r| serde_json::from_value(r.clone()).ok())
                            .collect()
                    })
                    .unwrap_or_default();
                tracing::info!(table = %self.inner.table, rows = rows.len(), "table rows fetched");
                if rows.is_empty() {
                    false
                } else {
                    self.set_items(with_row_nums(rows));
                    true
                }
            }
            Err(e) => {
                tracing::error!(table = %self.inner.table, error = %e, "table query failed");
                self.alert();
                false
            }
        };
        self.update(|s| s.view.is_loading_items = false);

        if fetched && self.inner.ui.show_genai_insights() {
            self.request_recommendations().await;
        }
    }

    /// Recommendation ordering for the current rows; served from cache when possible.
    pub async fn request_recommendations(&self) {
        let (lookup, fingerprint, items) = self.update(|s| {
            let fp = s.view.items_hash;
            let lookup = s.cache.begin(fp);
            if lookup == Lookup::Miss {
                s.view.is_loading_recommendations = true;
            }
            (lookup, fp, s.view.items.clone())
        });

        match lookup {
            Lookup::Hit(_) => {
                tracing::debug!(table = %self.inner.table, fingerprint, "recommendation cache hit");
                self.sort_by_recommendation();
                return;
            }
            Lookup::Pending => {
                tracing::debug!(table = %self.inner.table, fingerprint, "recommendation already requested");
                return;
            }
            Lookup::Miss => {}
        }

        tracing::info!(table = %self.inner.table, fingerprint, rows = items.len(), "requesting recommendations");
        let timer = Watchdog::new(self.inner.cfg.watchdog());
        let this = self.clone();
        timer.start(move || this.recommendation_timed_out(fingerprint));
        self.lock().recommendation_timers.insert(fingerprint, timer);

        let key = CorrelationKey::Recommendation { table: self.inner.table.clone(), fingerprint };
        let query: Vec<Value> = items
            .iter()
            .map(|i| json!({"number": i.row_num, "category": i.category, "submission": i.text}))
            .collect();
        let payload = json!({"query": query, "action": key.action(), "message_id": key.message_id()});

        if let Err(e) = self.inner.backend.dispatch("recommend_submissions", payload).await {
            tracing::error!(table = %self.inner.table, fingerprint, error = %e, "recommendation request failed");
            self.finish_recommendation(fingerprint);
            self.update(|s| s.cache.abandon(fingerprint));
            self.alert();
        }
    }

    fn finish_recommendation(&self, fingerprint: u32) {
        self.update(|s| {
            if let Some(timer) = s.recommendation_timers.remove(&fingerprint) {
                timer.clear();
            }
            s.view.is_loading_recommendations = !s.recommendation_timers.is_empty();
        });
    }

    fn recommendation_timed_out(&self, fingerprint: u32) {
        let pending = self.update(|s| {
            let pending = s.cache.is_pending(fingerprint);
            s.cache.abandon(fingerprint);
            s.recommendation_timers.remove(&fingerprint);
            s.view.is_loading_recommendations = !s.recommendation_timers.is_empty();
            pending
        });
        if pending {
            tracing::error!(table = %self.inner.table, fingerprint, "recommendation response timeout");
            self.inner.ui.set_show_genai_insights(false);
            self.alert();
        }
    }

    /// Combined text of the selected rows, in selection order.
    pub async fn request_combined(&self) {
        let texts: Vec<String> = self.update(|s| {
            s.view.is_loading_combined = true;
            s.view.combined_text.clear();
            s.view
                .selected
                .iter()
                .filter_map(|r| s.view.items.iter().find(|i| i.row_num == *r))
                .map(|i| i.text.clone())
                .collect()
        });

        let this = self.clone();
        self.inner.combine_timer.clear();
        self.inner.combine_timer.start(move || {
            if this.lock().view.is_loading_combined {
                tracing::error!(table = %this.inner.table, "combined text response timeout");
                this.fail_combined();
            }
        });

        let key = CorrelationKey::CombinedText { table: self.inner.table.clone() };
        let payload = json!({"query": texts, "action": key.action(), "message_id": key.message_id()});
        if let Err(e) = self.inner.backend.dispatch("combine_submissions", payload).await {
            tracing::error!(table = %self.inner.table, error = %e, "combine request failed");
            self.inner.combine_timer.clear();
            self.fail_combined();
        }
    }

    fn fail_combined(&self) {
        self.update(|s| s.view.is_loading_combined = false);
        self.inner.ui.set_show_combined_dialog(false);
        self.alert();
    }

    /// Route one streamed fragment.
    pub fn receive(&self, key: &CorrelationKey, text: &str) {
        match key {
            CorrelationKey::Recommendation { fingerprint, .. } => self.receive_recommendation(*fingerprint, text),
            CorrelationKey::CombinedText { .. } => self.receive_combined(text),
            CorrelationKey::Chat { .. } => {
                tracing::debug!(table = %self.inner.table, "chat fragment sent to a table");
            }
        }
    }

    fn receive_recommendation(&self, fingerprint: u32, text: &str) {
        if !self.lock().cache.is_pending(fingerprint) {
            tracing::debug!(table = %self.inner.table, fingerprint, "late recommendation fragment ignored");
            return;
        }

        if let Some(detail) = error_detail(text) {
            tracing::error!(table = %self.inner.table, fingerprint, detail, "recommendation failed");
            self.finish_recommendation(fingerprint);
            self.update(|s| s.cache.abandon(fingerprint));
            self.alert();
            return;
        }

        if !is_completion(text) {
            self.update(|s| {
                s.cache.append(fingerprint, text);
            });
            return;
        }

        self.finish_recommendation(fingerprint);
        let (result, is_current) = self.update(|s| {
            s.cache.append(fingerprint, &text.replace(END_SENTINEL, ""));
            (s.cache.complete(fingerprint), s.view.items_hash == fingerprint)
        });
        match result {
            Ok(rec) => {
                tracing::info!(table = %self.inner.table, fingerprint, rows = rec.row_nums.len(), "recommendation cached");
                if is_current {
                    self.sort_by_recommendation();
                }
            }
            Err(e) => {
                tracing::error!(table = %self.inner.table, fingerprint, error = %e, "recommendation unparsable");
                self.alert();
            }
        }
    }

    fn receive_combined(&self, text: &str) {
        if !self.lock().view.is_loading_combined {
            tracing::debug!(table = %self.inner.table, "late combined-text fragment ignored");
            return;
        }
        if let Some(detail) = error_detail(text) {
            tracing::error!(table = %self.inner.table, detail, "combine failed");
            self.inner.combine_timer.clear();
            self.fail_combined();
        } else if is_completion(text) {
            self.inner.combine_timer.clear();
            self.update(|s| {
                s.view.combined_text.push_str(&text.replace(END_SENTINEL, ""));
                s.view.is_loading_combined = false;
            });
        } else {
            self.update(|s| s.view.combined_text.push_str(text));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(row_num: u32, ts: &str) -> TableItem {
        TableItem {
            row_num,
            submission_ts: ts.into(),
            name: "Dana".into(),
            customer: "Acme".into(),
            category: "achievement".into(),
            text: format!("submission {row_num}"),
        }
    }

    #[test]
    fn cache_tracks_outstanding_requests() {
        let mut cache = AggregationCache::new();
        assert_eq!(cache.begin(7), Lookup::Miss);
        assert_eq!(cache.begin(7), Lookup::Pending);

        let partial = cache.append(7, "Here you go: {\"submission_nos\": [2,").cloned();
        assert_eq!(partial.map(|p| p.row_nums), Some(vec![2]));
        assert!(cache.get(7).is_none());

        cache.append(7, " 1], \"preamble\": \"Top picks\", \"explanations\": [\"a\", \"b\"]}");
        let rec = cache.complete(7).unwrap();
        assert_eq!(rec.row_nums, vec![2, 1]);
        assert_eq!(rec.preamble, "Top picks");
        assert_eq!(cache.begin(7), Lookup::Hit(rec));
        assert!(cache.partial(7).is_none());
    }

    #[test]
    fn cache_rejects_unknown_and_malformed() {
        let mut cache = AggregationCache::new();
        assert_eq!(cache.complete(1), Err(AggregationError::NotPending(1)));
        assert!(cache.append(1, "{}").is_none());

        cache.begin(2);
        cache.append(2, "{\"preamble\": \"no rows\"}");
        assert!(matches!(cache.complete(2), Err(AggregationError::Decode(_))));
        assert_eq!(cache.begin(2), Lookup::Miss);

        cache.abandon(2);
        assert!(!cache.is_pending(2));
    }

    #[test]
    fn newest_first() {
        let mut items = vec![
            item(1, "2024-01-05T10:00:00.000000"),
            item(2, "garbage"),
            item(3, "2024-03-01T09:00:00.000000"),
        ];
        sort_by_date(&mut items);
        let order: Vec<u32> = items.iter().map(|i| i.row_num).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn recommendation_order_then_rest() {
        let items: Vec<TableItem> = (1..=4).map(|n| item(n, "")).collect();
        let rec = Recommendation { row_nums: vec![3, 9, 1], ..Recommendation::default() };
        let order: Vec<u32> = sorted_by_recommendation(&items, &rec).iter().map(|i| i.row_num).collect();
        assert_eq!(order, vec![3, 1, 2, 4]);
    }

    #[test]
    fn month_ranges() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let (start, end) = month_range(0, today).unwrap();
        assert_eq!((start.to_string(), end.to_string()), ("2024-03-01".into(), "2024-03-31".into()));
        let (start, end) = month_range(2, today).unwrap();
        assert_eq!((start.to_string(), end.to_string()), ("2024-01-01".into(), "2024-01-31".into()));
        let (start, end) = month_range(3, today).unwrap();
        assert_eq!((start.to_string(), end.to_string()), ("2023-12-01".into(), "2023-12-31".into()));
        let (_, end) = month_range(1, today).unwrap();
        assert_eq!(end.to_string(), "2024-02-29");
    }

    #[test]
    fn row_numbers_start_at_one() {
        let rows = vec![RawRow { text: "a".into(), ..RawRow::default() }, RawRow::default()];
        let items = with_row_nums(rows);
        assert_eq!(items[0].row_num, 1);
        assert_eq!(items[1].row_num, 2);
    }
}
