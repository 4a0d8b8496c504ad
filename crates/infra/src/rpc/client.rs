//! JSON-RPC 2.0 client for the blockchain endpoint.
//!
//! Wallet lookups (`eth_getBalance`, `eth_getTransactionCount`) used by
//! downstream forensics. Every call runs through the RPC
//! [`ProtectedGateway`]; an open circuit surfaces as the distinguished
//! unavailable error, never as a fabricated zero balance.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use tradewatch_common::{GatewayError, ProtectedGateway};
use tradewatch_domain::{Result, RpcConfig, TradewatchError};

const WEI_PER_NATIVE: f64 = 1e18;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Minimal JSON-RPC client for wallet verification calls.
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    gateway: Arc<ProtectedGateway>,
}

impl JsonRpcClient {
    pub fn new(config: &RpcConfig, gateway: Arc<ProtectedGateway>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| TradewatchError::Network(format!("failed to build http client: {e}")))?;

        Ok(Self { client, url: config.url.clone(), gateway })
    }

    /// Native-token balance of `address`, in whole tokens.
    pub async fn get_balance(&self, address: &str) -> Result<f64> {
        let address = validate_address(address)?;
        let result = self.call_method("eth_getBalance", json!([address, "latest"])).await?;
        let wei = parse_hex_quantity(&result)?;
        Ok(wei as f64 / WEI_PER_NATIVE)
    }

    /// Outgoing transaction count (nonce) of `address`.
    pub async fn get_transaction_count(&self, address: &str) -> Result<u64> {
        let address = validate_address(address)?;
        let result =
            self.call_method("eth_getTransactionCount", json!([address, "latest"])).await?;
        let count = parse_hex_quantity(&result)?;
        u64::try_from(count)
            .map_err(|_| TradewatchError::Network("transaction count out of range".into()))
    }

    async fn call_method(&self, rpc_method: &str, params: serde_json::Value) -> Result<String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": rpc_method,
            "params": params,
        });
        debug!(method = rpc_method, "issuing rpc call");

        let outcome = self
            .gateway
            .call(|| {
                let request = self.client.post(&self.url).json(&body);
                let rpc_method = rpc_method.to_string();
                async move {
                    let response = request
                        .send()
                        .await
                        .map_err(|e| TradewatchError::Network(format!("rpc request: {e}")))?;

                    let status = response.status();
                    if !status.is_success() {
                        return Err(TradewatchError::Network(format!(
                            "rpc endpoint returned HTTP {status}"
                        )));
                    }

                    let parsed: RpcResponse = response
                        .json()
                        .await
                        .map_err(|e| TradewatchError::Network(format!("rpc response body: {e}")))?;

                    if let Some(error) = parsed.error {
                        return Err(TradewatchError::Network(format!(
                            "rpc error {} on {rpc_method}: {}",
                            error.code, error.message
                        )));
                    }

                    match parsed.result {
                        Some(serde_json::Value::String(hex)) => Ok(hex),
                        other => Err(TradewatchError::Network(format!(
                            "unexpected rpc result for {rpc_method}: {other:?}"
                        ))),
                    }
                }
            })
            .await;

        outcome.map_err(map_gateway_error)
    }
}

/// Reject malformed addresses before spending a rate-limit token.
fn validate_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    if !trimmed.starts_with("0x") || trimmed.len() != 42 {
        return Err(TradewatchError::InvalidInput(format!(
            "invalid wallet address format: {trimmed}"
        )));
    }
    if !trimmed[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TradewatchError::InvalidInput(format!(
            "wallet address contains non-hex characters: {trimmed}"
        )));
    }
    Ok(trimmed.to_lowercase())
}

fn parse_hex_quantity(hex: &str) -> Result<u128> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    u128::from_str_radix(digits, 16)
        .map_err(|e| TradewatchError::Network(format!("invalid hex quantity {hex}: {e}")))
}

fn map_gateway_error(err: GatewayError<TradewatchError>) -> TradewatchError {
    match err {
        GatewayError::Unavailable(open) => {
            TradewatchError::Network(format!("rpc endpoint unavailable: {open}"))
        }
        GatewayError::RateLimitTimeout(timeout) => {
            TradewatchError::Network(format!("rpc endpoint rate limited: {timeout}"))
        }
        GatewayError::Exhausted { source, .. } => source,
    }
}

#[cfg(test)]
mod tests {
    use tradewatch_common::{ProtectionConfig, RateLimiterConfig, RetryConfig};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const ADDRESS: &str = "0x1111111111111111111111111111111111111111";

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

    fn client(url: &str) -> JsonRpcClient {
        let config = RpcConfig {
            url: url.to_string(),
            request_timeout_seconds: 5,
            protection: Default::default(),
        };
        let gateway = Arc::new(ProtectedGateway::new("rpc", fast_protection()).unwrap());
        JsonRpcClient::new(&config, gateway).unwrap()
    }

    #[tokio::test]
    async fn get_balance_parses_hex_wei_into_native_units() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(serde_json::json!({ "method": "eth_getBalance" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "0xde0b6b3a7640000",
            })))
            .mount(&server)
            .await;

        let balance = client(&server.uri()).get_balance(ADDRESS).await.unwrap();
        assert!((balance - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn get_transaction_count_parses_nonce() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "method": "eth_getTransactionCount" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "0x2a",
            })))
            .mount(&server)
            .await;

        let count = client(&server.uri()).get_transaction_count(ADDRESS).await.unwrap();
        assert_eq!(count, 42);
    }

    #[tokio::test]
    async fn invalid_addresses_are_rejected_without_a_request() {
        let server = MockServer::start().await;
        // No mock mounted: a request would 404 and fail differently.

        let result = client(&server.uri()).get_balance("not-an-address").await;
        assert!(matches!(result, Err(TradewatchError::InvalidInput(_))));

        let result = client(&server.uri()).get_balance("0x123").await;
        assert!(matches!(result, Err(TradewatchError::InvalidInput(_))));

        let result =
            client(&server.uri()).get_balance("0xzzzz111111111111111111111111111111111111").await;
        assert!(matches!(result, Err(TradewatchError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn rpc_error_objects_surface_as_network_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32005, "message": "over rate limit" },
            })))
            .mount(&server)
            .await;

        let result = client(&server.uri()).get_balance(ADDRESS).await;
        match result {
            Err(TradewatchError::Network(msg)) => assert!(msg.contains("-32005")),
            other => panic!("expected network error, got {other:?}"),
        }
    }
}
