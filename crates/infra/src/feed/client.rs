//! HTTP client for the external trade-feed data API.
//!
//! Implements [`TradeFeedSource`] against a Polymarket-style `/trades`
//! endpoint. Every request runs through the feed's [`ProtectedGateway`];
//! a circuit-open rejection surfaces as a network error naming the guard,
//! never as an empty batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use tradewatch_common::{GatewayError, ProtectedGateway};
use tradewatch_core::TradeFeedSource;
use tradewatch_domain::{FeedConfig, Result, TradeEvent, TradewatchError};

/// Raw record shape on the `/trades` endpoint. Unknown fields ride along
/// in the retained payload snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedTradeRecord {
    transaction_hash: String,
    #[serde(default)]
    proxy_wallet: Option<String>,
    #[serde(default)]
    condition_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    size: f64,
    timestamp: i64,
}

/// [`TradeFeedSource`] backed by the data API.
pub struct HttpTradeFeed {
    client: reqwest::Client,
    base_url: String,
    min_trade_usd: f64,
    page_limit: u32,
    gateway: Arc<ProtectedGateway>,
}

impl HttpTradeFeed {
    pub fn new(config: &FeedConfig, gateway: Arc<ProtectedGateway>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| TradewatchError::Network(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            min_trade_usd: config.min_trade_usd,
            page_limit: config.page_limit,
            gateway,
        })
    }

    async fn request_window(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/trades", self.base_url);

        let result = self
            .gateway
            .call(|| {
                let request = self.client.get(&url).query(&[
                    ("limit", self.page_limit.to_string()),
                    ("start_time", since.timestamp().to_string()),
                    ("end_time", until.timestamp().to_string()),
                ]);
                async move {
                    let response = request
                        .send()
                        .await
                        .map_err(|e| TradewatchError::Network(format!("feed request: {e}")))?;

                    let status = response.status();
                    if !status.is_success() {
                        return Err(TradewatchError::Network(format!(
                            "feed returned HTTP {status}"
                        )));
                    }

                    response
                        .json::<Vec<serde_json::Value>>()
                        .await
                        .map_err(|e| TradewatchError::Network(format!("feed response body: {e}")))
                }
            })
            .await;

        result.map_err(map_gateway_error)
    }
}

#[async_trait]
impl TradeFeedSource for HttpTradeFeed {
    async fn fetch(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TradeEvent>> {
        let raw = self.request_window(since, until).await?;
        let total = raw.len();

        let mut events: Vec<TradeEvent> = Vec::new();
        for value in raw {
            let record: FeedTradeRecord = match serde_json::from_value(value.clone()) {
                Ok(record) => record,
                Err(err) => {
                    // A malformed record is the feed's bug, not a cycle
                    // failure; skip it rather than poison the batch.
                    warn!(error = %err, "skipping unparsable feed record");
                    continue;
                }
            };

            let Some(occurred_at) = Utc.timestamp_opt(record.timestamp, 0).single() else {
                warn!(
                    trade_key = %record.transaction_hash,
                    timestamp = record.timestamp,
                    "skipping feed record with out-of-range timestamp"
                );
                continue;
            };

            // The endpoint's window filtering is advisory; clip locally so
            // the checkpoint contract sees exactly [since, until].
            if occurred_at < since || occurred_at > until {
                continue;
            }

            let notional_usd = record.price * record.size;
            if notional_usd < self.min_trade_usd {
                continue;
            }

            events.push(TradeEvent {
                trade_key: record.transaction_hash,
                wallet: record.proxy_wallet,
                market_id: record.condition_id,
                market_title: record.title,
                side: record.side,
                price: record.price,
                size: record.size,
                notional_usd,
                occurred_at,
                payload: value,
            });
        }

        events.sort_by_key(|e| e.occurred_at);
        debug!(
            fetched = total,
            kept = events.len(),
            min_trade_usd = self.min_trade_usd,
            "feed window fetched"
        );
        Ok(events)
    }
}

fn map_gateway_error(err: GatewayError<TradewatchError>) -> TradewatchError {
    match err {
        GatewayError::Unavailable(open) => {
            TradewatchError::Network(format!("trade feed unavailable: {open}"))
        }
        GatewayError::RateLimitTimeout(timeout) => {
            TradewatchError::Network(format!("trade feed rate limited: {timeout}"))
        }
        GatewayError::Exhausted { source, .. } => source,
    }
}

#[cfg(test)]
mod tests {
    use tradewatch_common::{ProtectionConfig, RateLimiterConfig, RetryConfig};
    use tradewatch_domain::FeedConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fast_protection() -> ProtectionConfig {
        ProtectionConfig {
            rate_limiter: RateLimiterConfig { calls_per_second: 1000.0, burst_size: 100 },
            retry: RetryConfig {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..ProtectionConfig::default()
        }
    }

    fn feed(server_url: &str) -> HttpTradeFeed {
        let config = FeedConfig {
            base_url: server_url.to_string(),
            min_trade_usd: 10_000.0,
            request_timeout_seconds: 5,
            page_limit: 1000,
            protection: Default::default(),
        };
        let gateway = Arc::new(ProtectedGateway::new("feed", fast_protection()).unwrap());
        HttpTradeFeed::new(&config, gateway).unwrap()
    }

    fn record(hash: &str, timestamp: i64, price: f64, size: f64) -> serde_json::Value {
        serde_json::json!({
            "transactionHash": hash,
            "proxyWallet": "0x1111111111111111111111111111111111111111",
            "conditionId": "0xcond",
            "title": "Will the election be contested?",
            "side": "BUY",
            "price": price,
            "size": size,
            "timestamp": timestamp,
        })
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn fetch_maps_filters_and_orders_records() {
        let server = MockServer::start().await;
        let since = ts(1_700_000_000);
        let until = ts(1_700_000_060);

        Mock::given(method("GET"))
            .and(path("/trades"))
            .and(query_param("limit", "1000"))
            .and(query_param("start_time", "1700000000"))
            .and(query_param("end_time", "1700000060"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                record("0xnewer", 1_700_000_050, 0.5, 40_000.0),
                record("0xsmall", 1_700_000_020, 0.5, 100.0),
                record("0xolder", 1_700_000_010, 0.25, 80_000.0),
                record("0xoutside", 1_699_999_000, 0.5, 40_000.0),
            ])))
            .mount(&server)
            .await;

        let events = feed(&server.uri()).fetch(since, until).await.unwrap();

        // Small notional and out-of-window records are dropped; the rest
        // come back oldest first.
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].trade_key, "0xolder");
        assert_eq!(events[1].trade_key, "0xnewer");
        assert_eq!(events[0].notional_usd, 20_000.0);
        assert_eq!(events[0].occurred_at, ts(1_700_000_010));
        assert_eq!(events[0].market_title.as_deref(), Some("Will the election be contested?"));
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_not_fatal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/trades"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "garbage": true },
                record("0xok", 1_700_000_030, 0.5, 50_000.0),
            ])))
            .mount(&server)
            .await;

        let events =
            feed(&server.uri()).fetch(ts(1_700_000_000), ts(1_700_000_060)).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trade_key, "0xok");
    }

    #[tokio::test]
    async fn server_errors_surface_as_network_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/trades"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = feed(&server.uri()).fetch(ts(1_700_000_000), ts(1_700_000_060)).await;

        match result {
            Err(TradewatchError::Network(msg)) => assert!(msg.contains("503")),
            other => panic!("expected network error, got {other:?}"),
        }
    }
}
