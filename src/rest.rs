//! Venue REST client.
//!
//! Thin typed wrapper over reqwest: every response is parsed into a
//! serde DTO at this boundary, and no untyped JSON crosses into the
//! core. Prices and sizes travel as decimal strings on the wire.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use url::Url;

use crate::error::{ConfigError, VenueError};
use crate::signer::SignedOrder;
use crate::types::{Level, Market};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct VenueRestClient {
    http: reqwest::Client,
    base: Url,
}

impl VenueRestClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let base = Url::parse(base_url).map_err(|_| ConfigError::Invalid {
            key: "POLYMARKET_API_URL",
            value: base_url.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: "POLYMARKET_API_URL",
                value: e.to_string(),
            })?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, VenueError> {
        self.base
            .join(path)
            .map_err(|e| VenueError::Malformed(format!("bad endpoint {path}: {e}")))
    }

    /// `GET /markets?active&closed` — list markets for discovery.
    pub async fn markets(&self, active: bool, closed: bool) -> Result<Vec<MarketInfo>, VenueError> {
        let url = self.endpoint("/markets")?;
        let resp = self
            .http
            .get(url)
            .query(&[("active", active.to_string()), ("closed", closed.to_string())])
            .send()
            .await?;
        decode(resp).await
    }

    /// `GET /markets/{id}` — one market descriptor.
    pub async fn market(&self, market_id: &str) -> Result<MarketInfo, VenueError> {
        let url = self.endpoint(&format!("/markets/{market_id}"))?;
        let resp = self.http.get(url).send().await?;
        decode(resp).await
    }

    /// `GET /book?market={id}` — orderbook snapshot with sequence.
    pub async fn book(&self, market_id: &str) -> Result<BookPayload, VenueError> {
        let url = self.endpoint("/book")?;
        let resp = self
            .http
            .get(url)
            .query(&[("market", market_id)])
            .send()
            .await?;
        decode(resp).await
    }

    /// `GET /open-orders?user={addr}[&market={id}]`.
    pub async fn open_orders(
        &self,
        user: &str,
        market_id: Option<&str>,
    ) -> Result<Vec<VenueOpenOrder>, VenueError> {
        let url = self.endpoint("/open-orders")?;
        let mut req = self.http.get(url).query(&[("user", user)]);
        if let Some(id) = market_id {
            req = req.query(&[("market", id)]);
        }
        decode(req.send().await?).await
    }

    /// `GET /positions?user={addr}&redeemable=true`.
    pub async fn redeemable_positions(
        &self,
        user: &str,
    ) -> Result<Vec<RedeemablePosition>, VenueError> {
        let url = self.endpoint("/positions")?;
        let resp = self
            .http
            .get(url)
            .query(&[("user", user), ("redeemable", "true")])
            .send()
            .await?;
        decode(resp).await
    }

    /// `POST /orders` with a signed payload.
    pub async fn post_order(&self, order: &SignedOrder) -> Result<OrderAck, VenueError> {
        let url = self.endpoint("/orders")?;
        let resp = self.http.post(url).json(order).send().await?;
        decode(resp).await
    }

    /// `POST /orders/cancel` with a batch of ids.
    pub async fn cancel_orders(&self, order_ids: &[String]) -> Result<CancelAck, VenueError> {
        let url = self.endpoint("/orders/cancel")?;
        let resp = self
            .http
            .post(url)
            .json(&CancelRequest {
                order_ids: order_ids.to_vec(),
            })
            .send()
            .await?;
        decode(resp).await
    }

    /// `POST /redeem/{position_id}`.
    pub async fn redeem(&self, position_id: &str) -> Result<RedeemAck, VenueError> {
        let url = self.endpoint(&format!("/redeem/{position_id}"))?;
        let resp = self.http.post(url).send().await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, VenueError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| VenueError::Malformed(e.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(VenueError::Upstream {
            status: status.as_u16(),
        })
    } else {
        Err(VenueError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

// ─────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct MarketInfo {
    #[serde(alias = "market_id")]
    pub id: String,
    #[serde(default)]
    pub question: Option<String>,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub tick_size: Decimal,
    pub min_size: Decimal,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
}

impl MarketInfo {
    pub fn into_market(self) -> Market {
        Market {
            market_id: self.id,
            question: self.question,
            yes_token_id: self.yes_token_id,
            no_token_id: self.no_token_id,
            tick_size: self.tick_size,
            min_size: self.min_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookPayload {
    #[serde(default)]
    pub market: Option<String>,
    pub sequence: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueOpenOrder {
    #[serde(alias = "order_id")]
    pub id: String,
    pub token_id: String,
    pub side: String,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(default, alias = "size_remaining")]
    pub remaining: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub error_msg: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
struct CancelRequest {
    order_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelAck {
    #[serde(default, alias = "canceled")]
    pub cancelled: Vec<String>,
    #[serde(default, alias = "not_canceled")]
    pub not_cancelled: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemablePosition {
    #[serde(alias = "position_id")]
    pub id: String,
    pub value: Decimal,
    #[serde(default)]
    pub market_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemAck {
    #[serde(default = "default_true")]
    pub success: bool,
}
