//! # Price Conversion
//!
//! Merchants quote in Argentine pesos, the ledger settles in USDC. The
//! conversion itself is a pure function over a rate; where the rate comes
//! from is behind the [`PriceFeed`] trait.
//!
//! The production feed is Bluelytics' informal ("blue") dollar sell rate,
//! treating 1 USDC as 1 USD.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::{BLUELYTICS_URL, PRICE_FEED_TIMEOUT};

/// Errors from rate lookup or conversion.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PricingError {
    #[error("price feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("invalid exchange rate: {0}")]
    InvalidRate(f64),

    #[error("amount must be a positive finite number")]
    InvalidAmount,

    #[error("unknown currency unit: {0}")]
    UnknownUnit(String),
}

/// Units the relay converts between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurrencyUnit {
    Ars,
    Usdc,
}

impl fmt::Display for CurrencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrencyUnit::Ars => f.write_str("ARS"),
            CurrencyUnit::Usdc => f.write_str("USDC"),
        }
    }
}

impl FromStr for CurrencyUnit {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ars" => Ok(CurrencyUnit::Ars),
            "usdc" | "usd" => Ok(CurrencyUnit::Usdc),
            other => Err(PricingError::UnknownUnit(other.to_string())),
        }
    }
}

/// Convert `amount` between units given the ARS-per-USD rate.
pub fn convert_currency(
    amount: f64,
    from: CurrencyUnit,
    to: CurrencyUnit,
    ars_per_usd: f64,
) -> Result<f64, PricingError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(PricingError::InvalidAmount);
    }
    if !ars_per_usd.is_finite() || ars_per_usd <= 0.0 {
        return Err(PricingError::InvalidRate(ars_per_usd));
    }
    Ok(match (from, to) {
        (CurrencyUnit::Ars, CurrencyUnit::Usdc) => amount / ars_per_usd,
        (CurrencyUnit::Usdc, CurrencyUnit::Ars) => amount * ars_per_usd,
        _ => amount,
    })
}

// ---------------------------------------------------------------------------
// Feeds
// ---------------------------------------------------------------------------

/// Source of the current ARS-per-USD rate.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn ars_per_usd(&self) -> Result<f64, PricingError>;
}

/// Fetch the current rate from `feed` and convert.
pub async fn convert(
    feed: &dyn PriceFeed,
    amount: f64,
    from: CurrencyUnit,
    to: CurrencyUnit,
) -> Result<f64, PricingError> {
    let rate = feed.ars_per_usd().await?;
    debug!(rate, %from, %to, "converting");
    convert_currency(amount, from, to, rate)
}

#[derive(Deserialize)]
struct BluelyticsLatest {
    blue: BluelyticsQuote,
}

#[derive(Deserialize)]
struct BluelyticsQuote {
    value_sell: f64,
}

/// Bluelytics `v2/latest`, blue dollar sell rate.
pub struct BluelyticsFeed {
    http: reqwest::Client,
    url: String,
}

impl BluelyticsFeed {
    pub fn new() -> Self {
        Self::with_url(BLUELYTICS_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PRICE_FEED_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: url.into(),
        }
    }
}

impl Default for BluelyticsFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceFeed for BluelyticsFeed {
    async fn ars_per_usd(&self) -> Result<f64, PricingError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PricingError::FeedUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PricingError::FeedUnavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let latest: BluelyticsLatest = response
            .json()
            .await
            .map_err(|e| PricingError::FeedUnavailable(e.to_string()))?;
        Ok(latest.blue.value_sell)
    }
}

/// A constant rate. For offline nodes and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedRateFeed(pub f64);

#[async_trait]
impl PriceFeed for FixedRateFeed {
    async fn ars_per_usd(&self) -> Result<f64, PricingError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    #[test]
    fn converts_both_ways() {
        let usdc = convert_currency(12_500.0, CurrencyUnit::Ars, CurrencyUnit::Usdc, 1250.0).unwrap();
        assert!((usdc - 10.0).abs() < 1e-9);
        let ars = convert_currency(10.0, CurrencyUnit::Usdc, CurrencyUnit::Ars, 1250.0).unwrap();
        assert!((ars - 12_500.0).abs() < 1e-9);
        let same = convert_currency(3.5, CurrencyUnit::Ars, CurrencyUnit::Ars, 1250.0).unwrap();
        assert_eq!(same, 3.5);
    }

    #[test]
    fn rejects_bad_inputs() {
        assert_eq!(
            convert_currency(1.0, CurrencyUnit::Ars, CurrencyUnit::Usdc, 0.0),
            Err(PricingError::InvalidRate(0.0))
        );
        assert_eq!(
            convert_currency(-1.0, CurrencyUnit::Ars, CurrencyUnit::Usdc, 10.0),
            Err(PricingError::InvalidAmount)
        );
        assert_eq!(
            convert_currency(f64::NAN, CurrencyUnit::Ars, CurrencyUnit::Usdc, 10.0),
            Err(PricingError::InvalidAmount)
        );
    }

    #[test]
    fn parses_units() {
        assert_eq!("ARS".parse::<CurrencyUnit>().unwrap(), CurrencyUnit::Ars);
        assert_eq!("usdc".parse::<CurrencyUnit>().unwrap(), CurrencyUnit::Usdc);
        assert!("eur".parse::<CurrencyUnit>().is_err());
    }

    #[tokio::test]
    async fn fixed_feed_converts() {
        let usdc = convert(&FixedRateFeed(1000.0), 5000.0, CurrencyUnit::Ars, CurrencyUnit::Usdc)
            .await
            .unwrap();
        assert!((usdc - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn bluelytics_reads_blue_sell() {
        let app = Router::new().route(
            "/v2/latest",
            get(|| async {
                Json(json!({
                    "oficial": {"value_avg": 870.5, "value_sell": 890.0, "value_buy": 851.0},
                    "blue": {"value_avg": 1225.0, "value_sell": 1240.0, "value_buy": 1210.0},
                    "last_update": "2024-05-01T12:00:00-03:00"
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let feed = BluelyticsFeed::with_url(format!("http://{addr}/v2/latest"));
        assert_eq!(feed.ars_per_usd().await.unwrap(), 1240.0);
    }

    #[tokio::test]
    async fn bluelytics_outage_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let feed = BluelyticsFeed::with_url(format!("http://{addr}/v2/latest"));
        assert!(matches!(
            feed.ars_per_usd().await,
            Err(PricingError::FeedUnavailable(_))
        ));
    }
}
