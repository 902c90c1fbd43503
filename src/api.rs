//! HTTP client for the P/L analytics backend.
//!
//! Every response is wrapped in an envelope `{ status, message, data }`.
//! A non-2xx envelope status is a [`FetchError::Backend`]; a `null` `data`
//! is an empty result.

use crate::error::FetchError;
use crate::filters::{AccountId, FilterSnapshot, SecurityId};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    CardData,
    GraphData,
    TopDownBottomUp,
    Accounts,
    SecurityTickers,
    DatabaseRefresh,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::CardData => "/api/card-data",
            Endpoint::GraphData => "/api/graph-data",
            Endpoint::TopDownBottomUp => "/api/top-down-bottom-up",
            Endpoint::Accounts => "/api/accounts",
            Endpoint::SecurityTickers => "/api/security-tickers",
            Endpoint::DatabaseRefresh => "/api/database/refresh",
        }
    }

    pub fn method(self) -> reqwest::Method {
        match self {
            Endpoint::CardData | Endpoint::GraphData | Endpoint::TopDownBottomUp => {
                reqwest::Method::POST
            }
            Endpoint::Accounts | Endpoint::SecurityTickers | Endpoint::DatabaseRefresh => {
                reqwest::Method::GET
            }
        }
    }
}

/// Aggregate P/L figures shown on the metric cards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub total_gains: Option<f64>,
    pub realized_gains: Option<f64>,
    pub unrealized_gains: Option<f64>,
    pub interest: Option<f64>,
    pub dividends: Option<f64>,
}

/// Date-indexed values for the selected P/L type, in backend order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesResult {
    #[serde(rename = "date", deserialize_with = "iso_dates")]
    pub dates: Vec<NaiveDate>,
    #[serde(rename = "value")]
    pub values: Vec<f64>,
}

impl SeriesResult {
    /// Pairs `dates[i]` with `values[i]`; extra entries on the longer side are dropped.
    pub fn points(&self) -> Vec<(NaiveDate, f64)> {
        self.dates
            .iter()
            .copied()
            .zip(self.values.iter().copied())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSecurity {
    pub security: SecurityId,
    pub value: f64,
}

/// Securities ranked by the backend; order is display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    #[serde(default)]
    pub top_down: Vec<RankedSecurity>,
    #[serde(default)]
    pub bottom_up: Vec<RankedSecurity>,
}

// Accepts plain dates as well as timestamps ("2024-01-31T00:00:00").
fn iso_dates<'de, D>(deserializer: D) -> Result<Vec<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    raw.iter()
        .map(|s| {
            let day = s.get(..10).unwrap_or(s);
            NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(serde::de::Error::custom)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: Option<i64>,
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<Option<T>, FetchError> {
        match self.status {
            Some(status) if !(200..300).contains(&status) => Err(FetchError::Backend {
                status,
                message: self.message.unwrap_or_default(),
            }),
            _ => Ok(self.data),
        }
    }
}

/// The backend operations the dashboard depends on.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn accounts(&self) -> Result<Option<Vec<AccountId>>, FetchError>;

    async fn securities(&self) -> Result<Option<Vec<SecurityId>>, FetchError>;

    async fn card_data(&self, filters: &FilterSnapshot)
        -> Result<Option<MetricsResult>, FetchError>;

    async fn graph_data(&self, filters: &FilterSnapshot)
        -> Result<Option<SeriesResult>, FetchError>;

    async fn rankings(&self, filters: &FilterSnapshot)
        -> Result<Option<RankingResult>, FetchError>;

    /// Asks the backend to rebuild its dataset. The reply is returned as-is.
    async fn refresh_dataset(&self) -> Result<serde_json::Value, FetchError>;
}

pub struct HttpApi {
    client: Client,
    base_url: String,
}

impl HttpApi {
    /// `timeout` of `None` means requests may wait forever.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| FetchError::InvalidBaseUrl {
            url: base_url.clone(),
            message: e.to_string(),
        })?;

        let builder = Client::builder();
        let builder = match timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        };
        Ok(Self {
            client: builder.build().unwrap_or_else(|_| Client::new()),
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        body: Option<&FilterSnapshot>,
    ) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}{}", self.base_url, endpoint.path());
        let mut request = self.client.request(endpoint.method(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                endpoint: endpoint.path().to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        body: Option<&FilterSnapshot>,
    ) -> Result<Option<T>, FetchError> {
        let body = self.send(endpoint, body).await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)?;
        envelope.into_data()
    }
}

#[async_trait]
impl DashboardApi for HttpApi {
    async fn accounts(&self) -> Result<Option<Vec<AccountId>>, FetchError> {
        self.fetch(Endpoint::Accounts, None).await
    }

    async fn securities(&self) -> Result<Option<Vec<SecurityId>>, FetchError> {
        self.fetch(Endpoint::SecurityTickers, None).await
    }

    async fn card_data(
        &self,
        filters: &FilterSnapshot,
    ) -> Result<Option<MetricsResult>, FetchError> {
        self.fetch(Endpoint::CardData, Some(filters)).await
    }

    async fn graph_data(
        &self,
        filters: &FilterSnapshot,
    ) -> Result<Option<SeriesResult>, FetchError> {
        self.fetch(Endpoint::GraphData, Some(filters)).await
    }

    async fn rankings(
        &self,
        filters: &FilterSnapshot,
    ) -> Result<Option<RankingResult>, FetchError> {
        self.fetch(Endpoint::TopDownBottomUp, Some(filters)).await
    }

    async fn refresh_dataset(&self) -> Result<serde_json::Value, FetchError> {
        let body = self.send(Endpoint::DatabaseRefresh, None).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::PnlType;
    use httpmock::prelude::*;
    use serde_json::json;

    fn snapshot() -> FilterSnapshot {
        FilterSnapshot {
            accounts: vec!["A1".into(), "A2".into()],
            security: "S1".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 20).unwrap(),
            pnl_type: PnlType::Total,
        }
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpApi::new("not a url", None),
            Err(FetchError::InvalidBaseUrl { .. })
        ));
        let api = HttpApi::new("http://localhost:8000/", None).unwrap();
        assert_eq!(api.base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_series_points_pair_by_index() {
        let series: SeriesResult = serde_json::from_value(json!({
            "date": ["2024-01-31", "2024-02-29T00:00:00", "2024-03-31"],
            "value": [10.5, -3.0]
        }))
        .unwrap();
        let points = series.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].0, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(points[1].1, -3.0);
    }

    #[tokio::test]
    async fn test_card_data_posts_filter_snapshot() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/card-data").json_body(json!({
                    "accounts": ["A1", "A2"],
                    "security": "S1",
                    "start_date": "2024-01-01",
                    "end_date": "2024-12-20",
                    "pnl_type": "total"
                }));
                then.status(200).json_body(json!({
                    "status": 200,
                    "message": "card data retrieved successfully",
                    "data": {
                        "total_gains": 1500.75,
                        "realized_gains": 0,
                        "unrealized_gains": 1500.75,
                        "interest": null,
                        "dividends": 12.0
                    }
                }));
            })
            .await;

        let api = HttpApi::new(&server.base_url(), None).unwrap();
        let metrics = api.card_data(&snapshot()).await.unwrap().unwrap();
        mock.assert_async().await;
        assert_eq!(metrics.total_gains, Some(1500.75));
        assert_eq!(metrics.realized_gains, Some(0.0));
        assert_eq!(metrics.interest, None);
    }

    #[tokio::test]
    async fn test_graph_data_and_rankings() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/graph-data");
                then.status(200).json_body(json!({
                    "status": 200,
                    "message": "ok",
                    "data": { "date": ["2024-01-31", "2024-02-29"], "value": [1.0, 2.0] }
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/top-down-bottom-up");
                then.status(200).json_body(json!({
                    "status": 200,
                    "message": "ok",
                    "data": {
                        "top_down": [{ "security": "AAPL", "value": 900.0 }, { "security": "MSFT", "value": 10.0 }],
                        "bottom_up": [{ "security": "MSFT", "value": 10.0 }, { "security": "AAPL", "value": 900.0 }]
                    }
                }));
            })
            .await;

        let api = HttpApi::new(&server.base_url(), None).unwrap();
        let series = api.graph_data(&snapshot()).await.unwrap().unwrap();
        assert_eq!(series.values, vec![1.0, 2.0]);

        let rankings = api.rankings(&snapshot()).await.unwrap().unwrap();
        assert_eq!(rankings.top_down[0].security, "AAPL");
        assert_eq!(rankings.bottom_up[0].security, "MSFT");
    }

    #[tokio::test]
    async fn test_reference_lists() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/accounts");
                then.status(200)
                    .json_body(json!({ "status": 200, "message": "ok", "data": ["A1", "A2"] }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/security-tickers");
                then.status(200)
                    .json_body(json!({ "status": 200, "message": "ok", "data": ["S1"] }));
            })
            .await;

        let api = HttpApi::new(&server.base_url(), None).unwrap();
        assert_eq!(
            api.accounts().await.unwrap(),
            Some(vec!["A1".to_string(), "A2".to_string()])
        );
        assert_eq!(api.securities().await.unwrap(), Some(vec!["S1".to_string()]));
    }

    #[tokio::test]
    async fn test_envelope_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/card-data");
                then.status(200).json_body(json!({
                    "status": 500,
                    "message": "Error retrieving card data: boom",
                    "data": null
                }));
            })
            .await;

        let api = HttpApi::new(&server.base_url(), None).unwrap();
        match api.card_data(&snapshot()).await {
            Err(FetchError::Backend { status, message }) => {
                assert_eq!(status, 500);
                assert!(message.contains("boom"));
            }
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_null_data_is_empty_result() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/accounts");
                then.status(200).json_body(json!({ "status": 200, "data": null }));
            })
            .await;

        let api = HttpApi::new(&server.base_url(), None).unwrap();
        assert_eq!(api.accounts().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_http_status_and_decode_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/graph-data");
                then.status(502);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/top-down-bottom-up");
                then.status(200).body("<html>not json</html>");
            })
            .await;

        let api = HttpApi::new(&server.base_url(), None).unwrap();
        assert!(matches!(
            api.graph_data(&snapshot()).await,
            Err(FetchError::Status { status: 502, .. })
        ));
        assert!(matches!(
            api.rankings(&snapshot()).await,
            Err(FetchError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_dataset() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/database/refresh");
                then.status(200)
                    .json_body(json!({ "status": 200, "message": "database refreshed" }));
            })
            .await;

        let api = HttpApi::new(&server.base_url(), None).unwrap();
        let reply = api.refresh_dataset().await.unwrap();
        mock.assert_async().await;
        assert_eq!(reply["message"], "database refreshed");
    }
}
