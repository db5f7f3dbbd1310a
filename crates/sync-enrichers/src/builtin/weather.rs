use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use sync_types::Tier;

use crate::provider::{EnrichContext, EnrichRequest, EnrichResult};
use crate::{EnrichError, Enricher};

#[derive(Debug, Deserialize)]
struct CurrentWeatherResponse {
    current_weather: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    windspeed: f64,
}

/// Phase 1 enricher: annotates the activity with conditions at its starting
/// GPS fix. Gated to Plus and above; runs without a section if the activity
/// has no GPS fix to look up.
pub struct WeatherEnricher {
    client: reqwest::Client,
    base_url: String,
}

impl WeatherEnricher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.open-meteo.com/v1/forecast".to_string(),
        }
    }

    fn first_fix(activity: &sync_types::StandardizedActivity) -> Option<(f64, f64)> {
        activity
            .sessions
            .iter()
            .flat_map(|s| s.records.iter())
            .find_map(|r| r.gps.as_ref())
            .map(|g| (g.lat, g.lng))
    }
}

impl Default for WeatherEnricher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Enricher for WeatherEnricher {
    fn provider_id(&self) -> &str {
        "weather"
    }

    fn name(&self) -> &str {
        "Weather"
    }

    async fn enrich(
        &self,
        _ctx: &EnrichContext,
        request: EnrichRequest<'_>,
    ) -> Result<EnrichResult, EnrichError> {
        if request.user.tier == Tier::Free {
            return Err(EnrichError::TierRestricted("weather".to_string()));
        }
        let Some((lat, lng)) = Self::first_fix(request.activity) else {
            return Ok(EnrichResult::default());
        };

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lng.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .send()
            .await
            .map_err(|err| EnrichError::Transient(err.to_string()))?;

        if response.status().is_server_error() || response.status().as_u16() == 429 {
            return Err(EnrichError::Transient(format!(
                "weather provider returned {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(EnrichError::Permanent(format!(
                "weather provider returned {}",
                response.status()
            )));
        }

        let parsed: CurrentWeatherResponse = response
            .json()
            .await
            .map_err(|err| EnrichError::Permanent(err.to_string()))?;

        let mut metadata = HashMap::new();
        metadata.insert(
            "weather_temperature_c".to_string(),
            parsed.current_weather.temperature.to_string(),
        );
        metadata.insert(
            "weather_windspeed_kmh".to_string(),
            parsed.current_weather.windspeed.to_string(),
        );

        Ok(EnrichResult {
            description: Some(format!(
                "{:.0}\u{00b0}C, wind {:.0} km/h at the start.",
                parsed.current_weather.temperature, parsed.current_weather.windspeed
            )),
            metadata,
            ..Default::default()
        })
    }
}
