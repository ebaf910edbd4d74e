// ABOUTME: Weather tools backed by the keyless Open-Meteo geocoding and forecast APIs.
// ABOUTME: Registers get_coordinates and get_weather_data into the tool registry.

use anyhow::{Context, Result};
use maria_agent::{ToolDefinition, ToolRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
pub const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

const CURRENT_FIELDS: &str =
    "temperature_2m,apparent_temperature,relative_humidity_2m,wind_speed_10m,weather_code";
const DAILY_FIELDS: &str =
    "temperature_2m_max,temperature_2m_min,precipitation_sum,weather_code";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coordinates {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingHit>,
}

#[derive(Debug, Deserialize)]
struct GeocodingHit {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LocationArgs {
    location: String,
}

/// Open-Meteo HTTP client; base URLs are overridable for self-hosted instances
#[derive(Debug, Clone)]
pub struct WeatherClient {
    http: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
}

impl WeatherClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_urls(timeout, GEOCODING_URL, FORECAST_URL)
    }

    pub fn with_urls(
        timeout: Duration,
        geocoding_url: impl Into<String>,
        forecast_url: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build weather HTTP client")?;
        Ok(Self {
            http,
            geocoding_url: geocoding_url.into(),
            forecast_url: forecast_url.into(),
        })
    }

    /// Resolve a place name to coordinates
    pub async fn get_coordinates(&self, location: &str) -> Result<Coordinates> {
        let location = location.trim();
        if location.is_empty() {
            anyhow::bail!("location cannot be empty");
        }

        let body: GeocodingResponse = self
            .http
            .get(&self.geocoding_url)
            .query(&[("name", location), ("count", "1"), ("format", "json")])
            .send()
            .await
            .context("Geocoding request failed")?
            .error_for_status()
            .context("Geocoding service returned an error")?
            .json()
            .await
            .context("Failed to parse geocoding response")?;

        first_hit(body, location)
    }

    /// Current conditions and a short daily forecast for a coordinate pair
    pub async fn get_forecast(&self, latitude: f64, longitude: f64) -> Result<Value> {
        check_coordinates(latitude, longitude)?;

        let body: Value = self
            .http
            .get(&self.forecast_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("daily", DAILY_FIELDS.to_string()),
                ("forecast_days", "3".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .context("Forecast request failed")?
            .error_for_status()
            .context("Forecast service returned an error")?
            .json()
            .await
            .context("Failed to parse forecast response")?;

        Ok(summarize_forecast(&body))
    }
}

fn first_hit(body: GeocodingResponse, location: &str) -> Result<Coordinates> {
    let hit = body
        .results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No coordinates found for '{}'", location))?;
    Ok(Coordinates {
        name: hit.name,
        latitude: hit.latitude,
        longitude: hit.longitude,
        country: hit.country,
    })
}

fn check_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        anyhow::bail!("Coordinates out of range: {}, {}", latitude, longitude);
    }
    Ok(())
}

/// Trim the forecast payload to what the model needs and add readable conditions
fn summarize_forecast(body: &Value) -> Value {
    let mut current = body.get("current").cloned().unwrap_or(Value::Null);
    if let Some(code) = current.get("weather_code").and_then(Value::as_i64) {
        current["conditions"] = json!(describe_weather_code(code));
    }

    let daily = body.get("daily").cloned().unwrap_or(Value::Null);
    let conditions: Vec<&str> = daily
        .get("weather_code")
        .and_then(Value::as_array)
        .map(|codes| {
            codes
                .iter()
                .filter_map(Value::as_i64)
                .map(describe_weather_code)
                .collect()
        })
        .unwrap_or_default();

    json!({
        "timezone": body.get("timezone").cloned().unwrap_or(Value::Null),
        "units": body.get("current_units").cloned().unwrap_or(Value::Null),
        "current": current,
        "daily": daily,
        "daily_conditions": conditions,
    })
}

/// WMO weather interpretation codes
pub fn describe_weather_code(code: i64) -> &'static str {
    match code {
        0 => "clear sky",
        1 => "mainly clear",
        2 => "partly cloudy",
        3 => "overcast",
        45 | 48 => "fog",
        51 | 53 | 55 => "drizzle",
        56 | 57 => "freezing drizzle",
        61 | 63 | 65 => "rain",
        66 | 67 => "freezing rain",
        71 | 73 | 75 => "snow",
        77 => "snow grains",
        80..=82 => "rain showers",
        85 | 86 => "snow showers",
        95 => "thunderstorm",
        96 | 99 => "thunderstorm with hail",
        _ => "unknown",
    }
}

/// Register `get_coordinates` and `get_weather_data`
pub fn register(registry: &mut ToolRegistry, client: WeatherClient) {
    let client = Arc::new(client);

    let c = Arc::clone(&client);
    registry.insert(
        ToolDefinition::new(
            "get_coordinates",
            "Look up the latitude and longitude of a place by name.",
            json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string", "description": "City or place name"}
                },
                "required": ["location"]
            }),
        ),
        move |args| {
            let client = Arc::clone(&c);
            async move {
                let args: LocationArgs =
                    serde_json::from_value(args).context("Invalid arguments for get_coordinates")?;
                let coordinates = client.get_coordinates(&args.location).await?;
                Ok(serde_json::to_value(coordinates)?)
            }
        },
    );

    registry.insert(
        ToolDefinition::new(
            "get_weather_data",
            "Get current weather and a three-day forecast. Pass a location name, or latitude and longitude.",
            json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string"},
                    "latitude": {"type": "number"},
                    "longitude": {"type": "number"}
                }
            }),
        ),
        move |args| {
            let client = Arc::clone(&client);
            async move {
                let args: WeatherArgs =
                    serde_json::from_value(args).context("Invalid arguments for get_weather_data")?;
                let (place, latitude, longitude) = match (args.latitude, args.longitude, args.location) {
                    (Some(lat), Some(lon), location) => (location, lat, lon),
                    (_, _, Some(location)) => {
                        let coordinates = client.get_coordinates(&location).await?;
                        (Some(coordinates.name), coordinates.latitude, coordinates.longitude)
                    }
                    _ => anyhow::bail!("Provide a location or both latitude and longitude"),
                };
                let mut forecast = client.get_forecast(latitude, longitude).await?;
                forecast["location"] = json!(place);
                forecast["latitude"] = json!(latitude);
                forecast["longitude"] = json!(longitude);
                Ok(forecast)
            }
        },
    );
}
