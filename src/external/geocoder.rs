/// Reverse geocoding of post locations to a country code
use crate::config::GeocoderConfig;
use crate::error::AppResult;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// ISO country code for a coordinate, if the service knows one
    async fn country_code(&self, latitude: f64, longitude: f64) -> AppResult<Option<String>>;
}

/// Nominatim-compatible `/reverse` client
pub struct HttpGeocoder {
    http: Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct ReverseResponse {
    address: Option<Address>,
}

#[derive(Deserialize)]
struct Address {
    country_code: Option<String>,
}

impl HttpGeocoder {
    pub fn new(config: &GeocoderConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("archive-insights/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn country_code(&self, latitude: f64, longitude: f64) -> AppResult<Option<String>> {
        let response: ReverseResponse = self
            .http
            .get(format!("{}/reverse", self.endpoint))
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .address
            .and_then(|a| a.country_code)
            .map(|code| code.to_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_response_shape() {
        let body: ReverseResponse =
            serde_json::from_str(r#"{"address": {"country_code": "tw", "city": "Taipei"}}"#).unwrap();
        assert_eq!(body.address.unwrap().country_code.as_deref(), Some("tw"));

        let empty: ReverseResponse = serde_json::from_str(r#"{"error": "Unable to geocode"}"#).unwrap();
        assert!(empty.address.is_none());
    }
}
