//! Dashboard state: the filter store, the result slots and the dispatch policy.
//!
//! Widgets hand [`FilterPatch`]es to [`Dashboard::apply_patch`]. The store
//! merges the patch once, then returns a [`Dispatch`] describing which fetches
//! to run against that single snapshot. Every dispatch takes a fresh token and
//! a slot only accepts the completion carrying its latest token, so a slow,
//! superseded response can never overwrite a newer one.

use crate::api::{DashboardApi, MetricsResult, RankingResult, SeriesResult};
use crate::error::FetchError;
use crate::filters::{merge, DateRange, FilterPatch, FilterSet, FilterSnapshot, PnlType, ReferenceData};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type Token = u64;

/// Display state of one fetched result. `Loading` and `Failed` keep the last
/// value so the view can go on drawing it.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchState<T> {
    Idle,
    Loading { stale: Option<T> },
    Loaded(T),
    Empty,
    Failed { error: String, stale: Option<T> },
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        FetchState::Idle
    }
}

impl<T> FetchState<T> {
    /// The value to display, fresh or stale.
    pub fn value(&self) -> Option<&T> {
        match self {
            FetchState::Loaded(value) => Some(value),
            FetchState::Loading { stale } | FetchState::Failed { stale, .. } => stale.as_ref(),
            FetchState::Idle | FetchState::Empty => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, FetchState::Loading { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            FetchState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    fn into_value(self) -> Option<T> {
        match self {
            FetchState::Loaded(value) => Some(value),
            FetchState::Loading { stale } | FetchState::Failed { stale, .. } => stale,
            FetchState::Idle | FetchState::Empty => None,
        }
    }
}

#[derive(Debug, Default)]
struct ResultSlot<T> {
    state: FetchState<T>,
    token: Token,
}

impl<T> ResultSlot<T> {
    fn begin(&mut self, token: Token) {
        self.token = token;
        let previous = std::mem::take(&mut self.state);
        self.state = FetchState::Loading {
            stale: previous.into_value(),
        };
    }

    fn settle(&mut self, kind: FetchKind, token: Token, result: Result<Option<T>, String>) -> bool {
        if token != self.token {
            tracing::debug!(
                "Discarding stale {} response (token {token}, latest {})",
                kind.as_str(),
                self.token
            );
            return false;
        }
        let previous = std::mem::take(&mut self.state);
        self.state = match result {
            Ok(Some(value)) => FetchState::Loaded(value),
            Ok(None) => FetchState::Empty,
            Err(error) => FetchState::Failed {
                error,
                stale: previous.into_value(),
            },
        };
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Metrics,
    Series,
    Rankings,
}

impl FetchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchKind::Metrics => "card data",
            FetchKind::Series => "graph data",
            FetchKind::Rankings => "top-down/bottom-up data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchScope {
    /// Metrics, series and rankings.
    Full,
    /// Series only, used for P/L type switches.
    SeriesOnly,
}

impl DispatchScope {
    pub fn kinds(self) -> &'static [FetchKind] {
        match self {
            DispatchScope::Full => &[FetchKind::Metrics, FetchKind::Series, FetchKind::Rankings],
            DispatchScope::SeriesOnly => &[FetchKind::Series],
        }
    }
}

/// A set of fetches sharing one token and one filter snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub token: Token,
    pub scope: DispatchScope,
    pub filters: FilterSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Metrics {
        token: Token,
        result: Result<Option<MetricsResult>, String>,
    },
    Series {
        token: Token,
        result: Result<Option<SeriesResult>, String>,
    },
    Rankings {
        token: Token,
        result: Result<Option<RankingResult>, String>,
    },
}

/// The single owner of filters and results for one dashboard view.
#[derive(Debug)]
pub struct Dashboard {
    filters: FilterSet,
    reference: ReferenceData,
    bootstrapped: bool,
    date_range: DateRange,
    metrics: ResultSlot<MetricsResult>,
    series: ResultSlot<SeriesResult>,
    rankings: ResultSlot<RankingResult>,
    last_token: Token,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new(DateRange::default())
    }
}

impl Dashboard {
    /// `date_range` is the default range applied at bootstrap.
    pub fn new(date_range: DateRange) -> Self {
        Dashboard {
            filters: FilterSet::default(),
            reference: ReferenceData::default(),
            bootstrapped: false,
            date_range,
            metrics: ResultSlot::default(),
            series: ResultSlot::default(),
            rankings: ResultSlot::default(),
            last_token: 0,
        }
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn metrics(&self) -> &FetchState<MetricsResult> {
        &self.metrics.state
    }

    pub fn series(&self) -> &FetchState<SeriesResult> {
        &self.series.state
    }

    pub fn rankings(&self) -> &FetchState<RankingResult> {
        &self.rankings.state
    }

    pub fn is_loading(&self) -> bool {
        self.metrics.state.is_loading()
            || self.series.state.is_loading()
            || self.rankings.state.is_loading()
    }

    /// Stores the reference lists and performs the one bootstrap merge,
    /// returning the first full dispatch. Returns `None` when the lists are
    /// missing or bootstrap already happened.
    pub fn load_reference(&mut self, reference: ReferenceData) -> Option<Dispatch> {
        if self.bootstrapped {
            tracing::warn!("Reference data already loaded, ignoring reload");
            return None;
        }
        let patch = reference.bootstrap_patch(self.date_range);
        self.reference = reference;

        let Some(patch) = patch else {
            tracing::warn!(
                "Cannot populate default filters: {} accounts, {} securities available",
                self.reference.accounts.len(),
                self.reference.securities.len()
            );
            return None;
        };

        self.filters = merge(&self.filters, &patch);
        self.bootstrapped = true;
        tracing::info!(
            "Bootstrapped filters: {} accounts, security {:?}",
            self.filters.accounts.len(),
            self.filters.security
        );
        self.dispatch(DispatchScope::Full)
    }

    /// Routes a widget patch: a P/L type change re-fetches the series only,
    /// anything else re-fetches everything.
    pub fn apply_patch(&mut self, patch: FilterPatch) -> Option<Dispatch> {
        match patch.pnl_type {
            Some(pnl_type) if patch.only_pnl_type() => self.refresh_series(pnl_type),
            _ => self.fetch_all(patch),
        }
    }

    pub fn fetch_all(&mut self, patch: FilterPatch) -> Option<Dispatch> {
        self.filters = merge(&self.filters, &patch);
        self.dispatch(DispatchScope::Full)
    }

    pub fn refresh_series(&mut self, pnl_type: PnlType) -> Option<Dispatch> {
        self.filters = merge(&self.filters, &FilterPatch::pnl_type(pnl_type));
        self.dispatch(DispatchScope::SeriesOnly)
    }

    fn dispatch(&mut self, scope: DispatchScope) -> Option<Dispatch> {
        if !self.bootstrapped {
            tracing::warn!("Skipping {scope:?} dispatch before bootstrap");
            return None;
        }
        let Some(filters) = self.filters.snapshot() else {
            tracing::warn!("Skipping {scope:?} dispatch: filters incomplete");
            return None;
        };

        self.last_token += 1;
        let token = self.last_token;
        for kind in scope.kinds() {
            match kind {
                FetchKind::Metrics => self.metrics.begin(token),
                FetchKind::Series => self.series.begin(token),
                FetchKind::Rankings => self.rankings.begin(token),
            }
        }
        tracing::info!(
            "Dispatch #{token} ({scope:?}): {} accounts, {} {}..{} {}",
            filters.accounts.len(),
            filters.security,
            filters.start_date,
            filters.end_date,
            filters.pnl_type
        );
        Some(Dispatch {
            token,
            scope,
            filters,
        })
    }

    /// Applies a completed fetch. Returns `false` if it was superseded.
    pub fn apply(&mut self, outcome: FetchOutcome) -> bool {
        match outcome {
            FetchOutcome::Metrics { token, result } => {
                self.metrics.settle(FetchKind::Metrics, token, result)
            }
            FetchOutcome::Series { token, result } => {
                self.series.settle(FetchKind::Series, token, result)
            }
            FetchOutcome::Rankings { token, result } => {
                self.rankings.settle(FetchKind::Rankings, token, result)
            }
        }
    }
}

/// Fetch boundary: errors are logged here and never travel further than a
/// `Failed` slot.
fn settle<T>(what: &str, result: Result<Option<T>, FetchError>) -> Result<Option<T>, String> {
    result.map_err(|e| {
        tracing::error!("Error fetching {what}: {e}");
        e.to_string()
    })
}

/// Runs one fetch of a dispatch.
pub async fn fetch_one(
    api: &dyn DashboardApi,
    kind: FetchKind,
    token: Token,
    filters: &FilterSnapshot,
) -> FetchOutcome {
    match kind {
        FetchKind::Metrics => FetchOutcome::Metrics {
            token,
            result: settle(kind.as_str(), api.card_data(filters).await),
        },
        FetchKind::Series => FetchOutcome::Series {
            token,
            result: settle(kind.as_str(), api.graph_data(filters).await),
        },
        FetchKind::Rankings => FetchOutcome::Rankings {
            token,
            result: settle(kind.as_str(), api.rankings(filters).await),
        },
    }
}

/// Runs every fetch of a dispatch concurrently and waits for all of them.
pub async fn execute(api: &dyn DashboardApi, dispatch: &Dispatch) -> Vec<FetchOutcome> {
    let fetches = dispatch
        .scope
        .kinds()
        .iter()
        .map(|kind| fetch_one(api, *kind, dispatch.token, &dispatch.filters));
    join_all(fetches).await
}

/// Spawns one task per fetch; each reports back on `sender` when it settles.
pub fn spawn_dispatch<M>(
    api: Arc<dyn DashboardApi>,
    dispatch: Dispatch,
    sender: mpsc::UnboundedSender<M>,
) where
    M: From<FetchOutcome> + Send + 'static,
{
    for kind in dispatch.scope.kinds() {
        let api = Arc::clone(&api);
        let sender = sender.clone();
        let filters = dispatch.filters.clone();
        let kind = *kind;
        let token = dispatch.token;
        tokio::spawn(async move {
            let outcome = fetch_one(api.as_ref(), kind, token, &filters).await;
            // the view is gone if the channel is closed
            let _ = sender.send(M::from(outcome));
        });
    }
}

/// Loads the account and security lists. A failed list is logged and left
/// empty.
pub async fn load_reference_data(api: &dyn DashboardApi) -> ReferenceData {
    let (accounts, securities) = futures::join!(api.accounts(), api.securities());
    let accounts = settle("accounts", accounts).ok().flatten().unwrap_or_default();
    let securities = settle("security tickers", securities)
        .ok()
        .flatten()
        .unwrap_or_default();
    ReferenceData::new(accounts, securities)
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingApi;
    use super::*;
    use crate::api::RankedSecurity;
    use chrono::NaiveDate;
    use std::io::Write;
    use std::sync::Mutex;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn metrics(total: f64) -> MetricsResult {
        MetricsResult {
            total_gains: Some(total),
            ..Default::default()
        }
    }

    fn bootstrapped() -> (Dashboard, Dispatch) {
        let mut dashboard = Dashboard::default();
        let dispatch = dashboard
            .load_reference(ReferenceData::new(
                vec!["A1".into(), "A2".into()],
                vec!["S1".into(), "S2".into()],
            ))
            .unwrap();
        (dashboard, dispatch)
    }

    #[tokio::test]
    async fn test_bootstrap_end_to_end() {
        let api = RecordingApi {
            metrics: Some(metrics(10.0)),
            ..RecordingApi::with_reference(&["A1", "A2"], &["S1", "S2"])
        };
        let mut dashboard = Dashboard::default();

        let reference = load_reference_data(&api).await;
        let dispatch = dashboard.load_reference(reference).unwrap();
        for outcome in execute(&api, &dispatch).await {
            assert!(dashboard.apply(outcome));
        }

        let expected = FilterSnapshot {
            accounts: vec!["A1".into(), "A2".into()],
            security: "S1".into(),
            start_date: date(2024, 1, 1),
            end_date: date(2024, 12, 20),
            pnl_type: PnlType::Total,
        };
        assert_eq!(dispatch.scope, DispatchScope::Full);
        assert_eq!(dispatch.filters, expected);

        let calls = api.calls();
        let data_calls: Vec<_> = calls.iter().filter(|(_, f)| f.is_some()).collect();
        assert_eq!(data_calls.len(), 3);
        for (_, filters) in data_calls {
            assert_eq!(filters.as_ref(), Some(&expected));
        }
        assert_eq!(calls.iter().filter(|(n, _)| *n == "accounts").count(), 1);
        assert_eq!(calls.iter().filter(|(n, _)| *n == "securities").count(), 1);
        assert_eq!(dashboard.metrics().value(), Some(&metrics(10.0)));
        assert_eq!(dashboard.series(), &FetchState::Empty);
    }

    #[test]
    fn test_bootstrap_happens_once() {
        let (mut dashboard, _) = bootstrapped();
        let again = dashboard.load_reference(ReferenceData::new(vec!["X".into()], vec!["Y".into()]));
        assert!(again.is_none());
        assert_eq!(dashboard.filters().security.as_deref(), Some("S1"));
    }

    #[test]
    fn test_missing_reference_data_skips_dispatch() {
        let mut dashboard = Dashboard::default();
        assert!(dashboard
            .load_reference(ReferenceData::new(vec!["A1".into()], vec![]))
            .is_none());
        assert!(!dashboard.is_bootstrapped());
        assert_eq!(dashboard.reference().accounts, vec!["A1"]);
    }

    #[test]
    fn test_no_dispatch_before_bootstrap() {
        let mut dashboard = Dashboard::default();
        assert!(dashboard.apply_patch(FilterPatch::security("S1")).is_none());
        assert!(dashboard.refresh_series(PnlType::RealizedTotal).is_none());
        assert_eq!(dashboard.metrics(), &FetchState::Idle);
    }

    #[test]
    fn test_tab_change_only_touches_pnl_type_and_series() {
        let (mut dashboard, first) = bootstrapped();
        let before = dashboard.filters().clone();

        let dispatch = dashboard
            .apply_patch(FilterPatch::pnl_type(PnlType::UnrealizedTotal))
            .unwrap();

        assert_eq!(dispatch.scope, DispatchScope::SeriesOnly);
        assert_eq!(dispatch.scope.kinds(), &[FetchKind::Series]);
        let after = dashboard.filters();
        assert_eq!(after.accounts, before.accounts);
        assert_eq!(after.security, before.security);
        assert_eq!(after.start_date, before.start_date);
        assert_eq!(after.end_date, before.end_date);
        assert_eq!(after.pnl_type, Some(PnlType::UnrealizedTotal));

        // metrics still wait on the bootstrap dispatch
        assert!(dashboard.apply(FetchOutcome::Metrics {
            token: first.token,
            result: Ok(Some(metrics(1.0))),
        }));
    }

    #[tokio::test]
    async fn test_filter_change_runs_all_fetches_with_one_snapshot() {
        let api = RecordingApi::with_reference(&["A1", "A2"], &["S1", "S2"]);
        let (mut dashboard, _) = bootstrapped();

        for patch in [
            FilterPatch::accounts(vec!["A2".into()]),
            FilterPatch::security("S2"),
            FilterPatch::date_range(date(2024, 2, 1), date(2024, 3, 1)),
        ] {
            let dispatch = dashboard.apply_patch(patch).unwrap();
            assert_eq!(dispatch.scope, DispatchScope::Full);
            assert_eq!(Some(&dispatch.filters), dashboard.filters().snapshot().as_ref());
            execute(&api, &dispatch).await;
        }

        let calls = api.calls();
        assert_eq!(calls.len(), 9);
        for batch in calls.chunks(3) {
            let mut names: Vec<_> = batch.iter().map(|(n, _)| *n).collect();
            names.sort();
            assert_eq!(names, vec!["card_data", "graph_data", "rankings"]);
            assert!(batch.iter().all(|(_, f)| f == &batch[0].1));
        }
        let last = calls[8].1.as_ref().unwrap();
        assert_eq!(last.accounts, vec!["A2"]);
        assert_eq!(last.security, "S2");
        assert_eq!(last.start_date, date(2024, 2, 1));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_results() {
        let api = RecordingApi {
            metrics: Some(metrics(42.0)),
            series: Some(SeriesResult {
                dates: vec![date(2024, 1, 31)],
                values: vec![5.0],
            }),
            rankings: Some(RankingResult {
                top_down: vec![RankedSecurity {
                    security: "S1".into(),
                    value: 3.0,
                }],
                bottom_up: vec![],
            }),
            ..RecordingApi::with_reference(&["A1"], &["S1"])
        };
        let (mut dashboard, dispatch) = bootstrapped();
        for outcome in execute(&api, &dispatch).await {
            dashboard.apply(outcome);
        }
        let metrics_before = dashboard.metrics().value().cloned();
        let series_before = dashboard.series().value().cloned();
        let rankings_before = dashboard.rankings().value().cloned();

        api.set_failing(true);
        let dispatch = dashboard.apply_patch(FilterPatch::security("S2")).unwrap();
        assert!(dashboard.metrics().is_loading());
        assert_eq!(dashboard.metrics().value().cloned(), metrics_before);
        for outcome in execute(&api, &dispatch).await {
            dashboard.apply(outcome);
        }

        assert!(dashboard.metrics().error().is_some());
        assert_eq!(dashboard.metrics().value().cloned(), metrics_before);
        assert_eq!(dashboard.series().value().cloned(), series_before);
        assert_eq!(dashboard.rankings().value().cloned(), rankings_before);
    }

    #[test]
    fn test_stale_response_is_discarded() {
        let (mut dashboard, first) = bootstrapped();
        let second = dashboard.apply_patch(FilterPatch::security("S2")).unwrap();
        assert!(second.token > first.token);

        assert!(dashboard.apply(FetchOutcome::Metrics {
            token: second.token,
            result: Ok(Some(metrics(2.0))),
        }));
        // the older request resolves last and must not win
        assert!(!dashboard.apply(FetchOutcome::Metrics {
            token: first.token,
            result: Ok(Some(metrics(1.0))),
        }));
        assert_eq!(dashboard.metrics(), &FetchState::Loaded(metrics(2.0)));
    }

    #[test]
    fn test_null_data_becomes_empty() {
        let (mut dashboard, dispatch) = bootstrapped();
        dashboard.apply(FetchOutcome::Rankings {
            token: dispatch.token,
            result: Ok(None),
        });
        assert_eq!(dashboard.rankings(), &FetchState::Empty);
        assert!(dashboard.rankings().value().is_none());
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fetch_failure_is_logged() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let result = tracing::subscriber::with_default(subscriber, || {
            settle::<MetricsResult>(
                "card data",
                Err(FetchError::Network("connection refused".into())),
            )
        });

        assert!(result.is_err());
        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("ERROR"));
        assert!(output.contains("Error fetching card data"));
    }

    #[tokio::test]
    async fn test_spawn_dispatch_reports_on_channel() {
        let api: Arc<dyn DashboardApi> = Arc::new(RecordingApi {
            metrics: Some(metrics(7.0)),
            ..RecordingApi::with_reference(&["A1"], &["S1"])
        });
        let (mut dashboard, dispatch) = bootstrapped();
        let (sender, mut receiver) = mpsc::unbounded_channel::<FetchOutcome>();

        spawn_dispatch(api, dispatch, sender);
        for _ in 0..3 {
            let outcome = receiver.recv().await.unwrap();
            assert!(dashboard.apply(outcome));
        }
        assert_eq!(dashboard.metrics().value(), Some(&metrics(7.0)));
        assert!(!dashboard.is_loading());
    }
}
