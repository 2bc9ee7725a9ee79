//! Kalshi REST client

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{
    CancelStatus, ExchangeApi, MarketQuote, OrderRequest, OrderResponse, OrderStatus, Side,
};
use crate::config::Config;
use crate::market::Cents;

/// Produces authentication headers for a signed request.
///
/// Kalshi signs `timestamp + method + path` with the account's RSA key; the
/// signing scheme lives behind this seam so the client itself stays testable.
pub trait RequestSigner: Send + Sync {
    fn headers(&self, method: &str, path: &str) -> anyhow::Result<Vec<(String, String)>>;
}

/// Signer carrying only the API key identifier.
///
/// Sufficient for the demo environment; production deployments swap in a
/// signer that loads the RSA private key from `private_key_path`.
pub struct ApiKeySigner {
    api_key: String,
}

impl ApiKeySigner {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl RequestSigner for ApiKeySigner {
    fn headers(&self, _method: &str, _path: &str) -> anyhow::Result<Vec<(String, String)>> {
        Ok(vec![(
            "KALSHI-ACCESS-KEY".to_string(),
            self.api_key.clone(),
        )])
    }
}

/// REST API client for Kalshi
pub struct KalshiRestClient {
    http: reqwest::Client,
    base_url: String,
    signer: Arc<dyn RequestSigner>,
}

// Wire formats. Kalshi reports prices in integer cents already.

#[derive(Debug, Deserialize)]
struct BalanceEnvelope {
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct MarketsEnvelope {
    markets: Vec<WireMarket>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMarket {
    ticker: String,
    yes_bid: Option<Cents>,
    yes_ask: Option<Cents>,
    no_bid: Option<Cents>,
    no_ask: Option<Cents>,
    #[serde(default)]
    volume: i64,
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    order: WireOrder,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    order_id: String,
    status: String,
    #[serde(default)]
    taker_fill_count: u32,
    #[serde(default)]
    taker_fill_cost: i64,
}

impl KalshiRestClient {
    pub fn new(config: &Config, signer: Arc<dyn RequestSigner>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.rest_url().to_string(),
            signer,
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> anyhow::Result<reqwest::Response> {
        let path = format!("/trade-api/v2{endpoint}");
        let url = format!("{}{endpoint}", self.base_url);

        let mut req = self.http.request(method.clone(), &url).query(query);
        for (name, value) in self.signer.headers(method.as_str(), &path)? {
            req = req.header(name, value);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("kalshi api {endpoint} returned {status}: {text}");
        }
        Ok(resp)
    }

    fn map_order(order: WireOrder, requested: u32) -> OrderResponse {
        let status = match order.status.as_str() {
            "executed" => {
                if order.taker_fill_count >= requested {
                    OrderStatus::Filled
                } else {
                    OrderStatus::PartiallyFilled
                }
            }
            "resting" | "pending" => {
                if order.taker_fill_count > 0 {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::Resting
                }
            }
            _ => OrderStatus::Rejected,
        };
        let avg_fill_price = if order.taker_fill_count > 0 {
            order.taker_fill_cost / order.taker_fill_count as i64
        } else {
            0
        };
        OrderResponse {
            order_id: order.order_id,
            status,
            filled_qty: order.taker_fill_count,
            avg_fill_price,
        }
    }
}

#[async_trait]
impl ExchangeApi for KalshiRestClient {
    async fn place_order(&self, req: &OrderRequest) -> anyhow::Result<OrderResponse> {
        let price_field = match req.side {
            Side::Yes => "yes_price",
            Side::No => "no_price",
        };
        let mut body = serde_json::json!({
            "ticker": req.ticker,
            "side": req.side.to_string(),
            "action": req.action.to_string(),
            "type": "limit",
            "count": req.size,
        });
        body[price_field] = serde_json::json!(req.limit_price);

        let resp = self
            .request(reqwest::Method::POST, "/portfolio/orders", &[], Some(body))
            .await?;
        let envelope: OrderEnvelope = resp.json().await?;
        Ok(Self::map_order(envelope.order, req.size))
    }

    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<CancelStatus> {
        let endpoint = format!("/portfolio/orders/{order_id}");
        match self
            .request(reqwest::Method::DELETE, &endpoint, &[], None)
            .await
        {
            Ok(_) => Ok(CancelStatus::Ok),
            Err(e) if e.to_string().contains("404") => Ok(CancelStatus::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn list_open_markets(&self) -> anyhow::Result<Vec<MarketQuote>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        // Bounded pagination; the exchange caps pages at 200 markets.
        for _ in 0..20 {
            let mut query = vec![
                ("limit", "200".to_string()),
                ("status", "open".to_string()),
            ];
            if let Some(ref c) = cursor {
                query.push(("cursor", c.clone()));
            }

            let resp = self
                .request(reqwest::Method::GET, "/markets", &query, None)
                .await?;
            let envelope: MarketsEnvelope = resp.json().await?;
            let page_empty = envelope.markets.is_empty();

            all.extend(envelope.markets.into_iter().map(|m| MarketQuote {
                ticker: m.ticker,
                yes_bid: m.yes_bid.filter(|p| (1..=99).contains(p)),
                yes_ask: m.yes_ask.filter(|p| (1..=99).contains(p)),
                no_bid: m.no_bid.filter(|p| (1..=99).contains(p)),
                no_ask: m.no_ask.filter(|p| (1..=99).contains(p)),
                volume: m.volume,
            }));

            cursor = envelope.cursor.filter(|c| !c.is_empty());
            if cursor.is_none() || page_empty {
                break;
            }
        }

        Ok(all)
    }

    async fn get_balance(&self) -> anyhow::Result<i64> {
        let resp = self
            .request(reqwest::Method::GET, "/portfolio/balance", &[], None)
            .await?;
        let envelope: BalanceEnvelope = resp.json().await?;
        Ok(envelope.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_executed_full_fill() {
        let order = WireOrder {
            order_id: "abc".into(),
            status: "executed".into(),
            taker_fill_count: 5,
            taker_fill_cost: 180,
        };
        let resp = KalshiRestClient::map_order(order, 5);
        assert_eq!(resp.status, OrderStatus::Filled);
        assert_eq!(resp.filled_qty, 5);
        assert_eq!(resp.avg_fill_price, 36);
    }

    #[test]
    fn maps_resting_partial_fill() {
        let order = WireOrder {
            order_id: "abc".into(),
            status: "resting".into(),
            taker_fill_count: 2,
            taker_fill_cost: 72,
        };
        let resp = KalshiRestClient::map_order(order, 5);
        assert_eq!(resp.status, OrderStatus::PartiallyFilled);
        assert_eq!(resp.filled_qty, 2);
        assert_eq!(resp.avg_fill_price, 36);
    }

    #[test]
    fn maps_unknown_status_to_rejected() {
        let order = WireOrder {
            order_id: "abc".into(),
            status: "canceled".into(),
            taker_fill_count: 0,
            taker_fill_cost: 0,
        };
        let resp = KalshiRestClient::map_order(order, 5);
        assert_eq!(resp.status, OrderStatus::Rejected);
    }

    #[test]
    fn signer_sets_access_key_header() {
        let signer = ApiKeySigner::new("key-id");
        let headers = signer.headers("GET", "/trade-api/v2/markets").unwrap();
        assert_eq!(headers[0].0, "KALSHI-ACCESS-KEY");
        assert_eq!(headers[0].1, "key-id");
    }
}
