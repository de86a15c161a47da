//! # Payment QR Codes
//!
//! The merchant's point of sale shows a QR code; the customer's wallet
//! scans it to learn which session to join and what it is about to pay.
//!
//! The payload is the merchant's transaction details, unchanged, plus the
//! session id, a local timestamp and whatever the merchant directory knows
//! about the merchant (name, city, logo). It is rendered at error
//! correction level H.

use std::collections::HashMap;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::config::{QR_DATE_FORMAT, QR_MIN_SIZE};
use crate::session::{SessionId, TransactionDetails};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QrError {
    #[error("payload does not fit in a QR code: {0}")]
    Encode(String),

    #[error("failed to render QR image: {0}")]
    Render(String),

    #[error("invalid payload: {0}")]
    Payload(String),
}

/// What the relay knows about a merchant beyond its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantDetails {
    pub name: String,
    pub city: String,
    /// Logo URL.
    pub image: String,
    /// IANA zone, e.g. `America/Argentina/Buenos_Aires`.
    pub timezone: String,
}

/// Merchant id → details. Loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct MerchantDirectory {
    merchants: HashMap<String, MerchantDetails>,
}

impl MerchantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object keyed by merchant id.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            merchants: serde_json::from_str(json)?,
        })
    }

    pub fn insert(&mut self, merchant_id: impl Into<String>, details: MerchantDetails) {
        self.merchants.insert(merchant_id.into(), details);
    }

    pub fn get(&self, merchant_id: &str) -> Option<&MerchantDetails> {
        self.merchants.get(merchant_id)
    }

    pub fn len(&self) -> usize {
        self.merchants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merchants.is_empty()
    }
}

/// Build the JSON text a payment QR code carries.
///
/// Every field of `details` is kept as sent. The date is rendered in the
/// merchant's timezone, or UTC when the merchant is unknown or its zone
/// does not parse.
pub fn payment_payload(
    session_id: &SessionId,
    details: &TransactionDetails,
    merchant: Option<&MerchantDetails>,
    now: DateTime<Utc>,
) -> Result<String, QrError> {
    let mut fields: Map<String, Value> = serde_json::from_str(details.raw().get())
        .map_err(|e| QrError::Payload(e.to_string()))?;

    let date = match merchant {
        Some(m) => match m.timezone.parse::<Tz>() {
            Ok(tz) => now.with_timezone(&tz).format(QR_DATE_FORMAT).to_string(),
            Err(_) => {
                warn!(timezone = %m.timezone, "unknown merchant timezone, using UTC");
                now.format(QR_DATE_FORMAT).to_string()
            }
        },
        None => now.format(QR_DATE_FORMAT).to_string(),
    };

    fields.insert("sessionId".into(), Value::String(session_id.to_string()));
    fields.insert("date".into(), Value::String(date));
    if let Some(m) = merchant {
        fields.insert("merchantName".into(), Value::String(m.name.clone()));
        fields.insert("merchantCity".into(), Value::String(m.city.clone()));
        fields.insert("merchantImage".into(), Value::String(m.image.clone()));
    }

    serde_json::to_string(&fields).map_err(|e| QrError::Payload(e.to_string()))
}

/// Render `payload` as a PNG QR code at error correction level H.
pub fn encode_as_qr(payload: &[u8]) -> Result<Vec<u8>, QrError> {
    let code = QrCode::with_error_correction_level(payload, EcLevel::H)
        .map_err(|e| QrError::Encode(e.to_string()))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_MIN_SIZE, QR_MIN_SIZE)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| QrError::Render(e.to_string()))?;
    Ok(png)
}

/// `data:image/png;base64,...` for embedding in a page or a JSON reply.
pub fn to_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(png))
}

/// Payload, PNG and data URL in one go.
pub fn payment_qr_data_url(
    session_id: &SessionId,
    details: &TransactionDetails,
    merchant: Option<&MerchantDetails>,
    now: DateTime<Utc>,
) -> Result<String, QrError> {
    let payload = payment_payload(session_id, details, merchant, now)?;
    let png = encode_as_qr(payload.as_bytes())?;
    Ok(to_data_url(&png))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DETAILS: &str = r#"{"amount":100000000,"merchantId":"merchant123","merchantUsdcAccount":"BbbT","daoUsdcAccount":"Ct7d","stateAccount":"5Hzk"}"#;

    fn merchant(timezone: &str) -> MerchantDetails {
        MerchantDetails {
            name: "Test Merchant".into(),
            city: "Test City".into(),
            image: "http://example.com/image.png".into(),
            timezone: timezone.into(),
        }
    }

    fn noon_utc() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap()
    }

    #[test]
    fn payload_keeps_details_and_adds_merchant() {
        let details = TransactionDetails::from_json(DETAILS).unwrap();
        let id = SessionId::from("7c9e6679-7425-40de-944b-e07fc1f90ae7");
        let m = merchant("America/Argentina/Buenos_Aires");

        let text = payment_payload(&id, &details, Some(&m), noon_utc()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["amount"], 100_000_000);
        assert_eq!(value["merchantId"], "merchant123");
        assert_eq!(value["stateAccount"], "5Hzk");
        assert_eq!(value["sessionId"], id.as_str());
        assert_eq!(value["merchantName"], "Test Merchant");
        assert_eq!(value["merchantCity"], "Test City");
        assert_eq!(value["merchantImage"], "http://example.com/image.png");
        // Buenos Aires is UTC-3.
        assert_eq!(value["date"], "2026-03-01 12:00:00");
    }

    #[test]
    fn unknown_merchant_or_zone_falls_back_to_utc() {
        let details = TransactionDetails::from_json(DETAILS).unwrap();
        let id = SessionId::from("s1");

        let text = payment_payload(&id, &details, None, noon_utc()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["date"], "2026-03-01 15:00:00");
        assert!(value.get("merchantName").is_none());

        let m = merchant("Mars/Olympus_Mons");
        let text = payment_payload(&id, &details, Some(&m), noon_utc()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["date"], "2026-03-01 15:00:00");
        assert_eq!(value["merchantName"], "Test Merchant");
    }

    #[test]
    fn renders_a_png_data_url() {
        let details = TransactionDetails::from_json(DETAILS).unwrap();
        let url = payment_qr_data_url(
            &SessionId::from("s1"),
            &details,
            Some(&merchant("America/New_York")),
            noon_utc(),
        )
        .unwrap();

        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let png = BASE64.decode(encoded).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let image = image::load_from_memory(&png).unwrap();
        assert_eq!(image.width(), image.height());
        assert!(image.width() >= QR_MIN_SIZE);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        // Level H tops out well below 2 KiB.
        let payload = vec![b'x'; 4096];
        assert!(matches!(encode_as_qr(&payload), Err(QrError::Encode(_))));
    }

    #[test]
    fn directory_parses_json() {
        let dir = MerchantDirectory::from_json(
            r#"{"7":{"name":"Cafe","city":"Rosario","image":"https://x/y.png","timezone":"America/Argentina/Cordoba"}}"#,
        )
        .unwrap();
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.get("7").unwrap().city, "Rosario");
        assert!(dir.get("8").is_none());
    }
}
