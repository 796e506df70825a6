//! OpenWeatherMap client with a TTL cache
//!
//! Current conditions and a 5-day forecast are fetched together and cached
//! per coordinate pair rounded to two decimals. The cache owns an injected
//! [`Clock`] so expiry can be tested without sleeping.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// OpenWeatherMap 2.5 API root
pub const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// How long a cached report is served
pub const CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Days of forecast returned
pub const FORECAST_DAYS: usize = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("Weather service not configured")]
    NotConfigured,

    /// `resource` is the upstream endpoint, `weather` or `forecast`
    #[error("Failed to fetch {resource}: {reason}")]
    Request {
        resource: &'static str,
        reason: String,
    },

    #[error("Unexpected weather payload: {0}")]
    Payload(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Current conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherData {
    /// Celsius, 1 decimal
    pub temperature: f64,
    /// Percent
    pub humidity: i64,
    /// km/h, 1 decimal
    pub wind_speed: f64,
    pub condition: String,
    pub icon: String,
    pub description: String,
}

/// High/low for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: String,
    pub temp_high: f64,
    pub temp_low: f64,
    pub condition: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub current: WeatherData,
    pub forecast: Vec<ForecastDay>,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn number(value: &Value, path: &[&str]) -> Result<f64, WeatherError> {
    let mut node = value;
    for key in path {
        node = &node[*key];
    }
    node.as_f64()
        .ok_or_else(|| WeatherError::Payload(format!("missing number at {}", path.join("."))))
}

fn first_weather(value: &Value) -> Result<&Value, WeatherError> {
    value["weather"]
        .get(0)
        .ok_or_else(|| WeatherError::Payload("missing weather[0]".to_string()))
}

fn text(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

/// Parse a `/weather` response
pub fn parse_current(value: &Value) -> Result<WeatherData, WeatherError> {
    let weather = first_weather(value)?;

    Ok(WeatherData {
        temperature: round1(number(value, &["main", "temp"])?),
        humidity: number(value, &["main", "humidity"])?.round() as i64,
        wind_speed: round1(number(value, &["wind", "speed"])? * 3.6),
        condition: text(weather, "main"),
        icon: text(weather, "icon"),
        description: text(weather, "description"),
    })
}

/// Parse a `/forecast` response into per-day highs and lows
///
/// Entries are grouped by the date part of `dt_txt`, in the order dates are
/// first seen. Condition and icon come from each day's first entry.
pub fn parse_forecast(value: &Value, days: usize) -> Result<Vec<ForecastDay>, WeatherError> {
    let entries = value["list"]
        .as_array()
        .ok_or_else(|| WeatherError::Payload("missing forecast list".to_string()))?;

    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, (Vec<f64>, String, String)> = HashMap::new();

    for entry in entries {
        let date = entry["dt_txt"]
            .as_str()
            .and_then(|s| s.split(' ').next())
            .ok_or_else(|| WeatherError::Payload("forecast entry without dt_txt".to_string()))?
            .to_string();
        let temp = number(entry, &["main", "temp"])?;

        if !grouped.contains_key(&date) {
            let weather = first_weather(entry)?;
            order.push(date.clone());
            grouped.insert(
                date.clone(),
                (Vec::new(), text(weather, "main"), text(weather, "icon")),
            );
        }
        if let Some((temps, _, _)) = grouped.get_mut(&date) {
            temps.push(temp);
        }
    }

    Ok(order
        .into_iter()
        .take(days)
        .filter_map(|date| {
            let (temps, condition, icon) = grouped.remove(&date)?;
            let high = temps.iter().copied().fold(f64::MIN, f64::max);
            let low = temps.iter().copied().fold(f64::MAX, f64::min);
            Some(ForecastDay {
                date,
                temp_high: round1(high),
                temp_low: round1(low),
                condition,
                icon,
            })
        })
        .collect())
}

/// Source of the current time for cache expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Cache key for a coordinate pair, e.g. `28.61_77.21`
pub fn cache_key(lat: f64, lon: f64) -> String {
    format!("{:?}_{:?}", round2(lat), round2(lon))
}

/// Weather reports keyed by rounded coordinates, expiring after a TTL
pub struct WeatherCache<C: Clock> {
    clock: C,
    ttl: Duration,
    entries: HashMap<String, (Instant, WeatherReport)>,
}

impl<C: Clock> WeatherCache<C> {
    pub fn new(clock: C, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            entries: HashMap::new(),
        }
    }

    /// A cached report younger than the TTL
    pub fn get(&self, key: &str) -> Option<WeatherReport> {
        let (stored_at, report) = self.entries.get(key)?;
        if self.clock.now().duration_since(*stored_at) < self.ttl {
            Some(report.clone())
        } else {
            None
        }
    }

    pub fn insert(&mut self, key: String, report: WeatherReport) {
        let now = self.clock.now();
        let ttl = self.ttl;
        self.entries.retain(|_, (stored_at, _)| now.duration_since(*stored_at) < ttl);
        self.entries.insert(key, (now, report));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Fetches and caches weather for the frontend
pub struct WeatherService<C: Clock = SystemClock> {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    cache: Mutex<WeatherCache<C>>,
}

impl WeatherService<SystemClock> {
    pub fn new(api_key: Option<String>) -> Result<Self, WeatherError> {
        Self::with_clock(api_key, SystemClock)
    }
}

impl<C: Clock> WeatherService<C> {
    pub fn with_clock(api_key: Option<String>, clock: C) -> Result<Self, WeatherError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: OPENWEATHER_BASE_URL.to_string(),
            cache: Mutex::new(WeatherCache::new(clock, CACHE_TTL)),
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch(&self, endpoint: &'static str, lat: f64, lon: f64) -> Result<Value, WeatherError> {
        let api_key = self.api_key.as_deref().ok_or(WeatherError::NotConfigured)?;
        let failed = |err: reqwest::Error| WeatherError::Request {
            resource: endpoint,
            reason: err.to_string(),
        };

        let response = self
            .client
            .get(format!("{}/{}", self.base_url, endpoint))
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("appid", api_key.to_string()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(failed)?;

        response.json().await.map_err(failed)
    }

    pub async fn current(&self, lat: f64, lon: f64) -> Result<WeatherData, WeatherError> {
        let value = self.fetch("weather", lat, lon).await.map_err(|e| {
            error!("Weather API error: {}", e);
            e
        })?;
        parse_current(&value)
    }

    pub async fn forecast(&self, lat: f64, lon: f64) -> Result<Vec<ForecastDay>, WeatherError> {
        let value = self.fetch("forecast", lat, lon).await.map_err(|e| {
            error!("Forecast API error: {}", e);
            e
        })?;
        parse_forecast(&value, FORECAST_DAYS)
    }

    /// Current conditions plus forecast, served from cache when fresh
    pub async fn report(&self, lat: f64, lon: f64) -> Result<WeatherReport, WeatherError> {
        let key = cache_key(lat, lon);

        if let Some(report) = self.cache.lock().await.get(&key) {
            info!("Using cached weather data for {}", key);
            return Ok(report);
        }

        let report = WeatherReport {
            current: self.current(lat, lon).await?,
            forecast: self.forecast(lat, lon).await?,
        };

        let mut cache = self.cache.lock().await;
        cache.insert(key, report.clone());
        debug!("Weather cache holds {} location(s)", cache.len());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone)]
    struct ManualClock(Arc<StdMutex<Instant>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Arc::new(StdMutex::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    fn report(temp: f64) -> WeatherReport {
        WeatherReport {
            current: WeatherData {
                temperature: temp,
                humidity: 40,
                wind_speed: 3.6,
                condition: "Clear".into(),
                icon: "01d".into(),
                description: "clear sky".into(),
            },
            forecast: Vec::new(),
        }
    }

    #[test]
    fn test_cache_key_rounds_to_two_decimals() {
        assert_eq!(cache_key(28.6139, 77.2090), "28.61_77.21");
        assert_eq!(cache_key(28.0, -0.004), "28.0_-0.0");
        assert_eq!(cache_key(28.6149, 77.2051), cache_key(28.6139, 77.2090));
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let clock = ManualClock::new();
        let mut cache = WeatherCache::new(clock.clone(), CACHE_TTL);
        cache.insert("28.61_77.21".into(), report(31.0));

        clock.advance(Duration::from_secs(29 * 60));
        assert_eq!(cache.get("28.61_77.21"), Some(report(31.0)));

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.get("28.61_77.21"), None);
        assert_eq!(cache.get("0.0_0.0"), None);
    }

    #[test]
    fn test_insert_evicts_expired_entries() {
        let clock = ManualClock::new();
        let mut cache = WeatherCache::new(clock.clone(), CACHE_TTL);
        cache.insert("a".into(), report(1.0));

        clock.advance(CACHE_TTL);
        cache.insert("b".into(), report(2.0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_parse_current_converts_units() {
        let payload = json!({
            "main": { "temp": 31.456, "humidity": 62 },
            "wind": { "speed": 4.12 },
            "weather": [{ "main": "Clouds", "icon": "03d", "description": "scattered clouds" }]
        });

        let current = parse_current(&payload).unwrap();
        assert_eq!(current.temperature, 31.5);
        assert_eq!(current.humidity, 62);
        assert_eq!(current.wind_speed, 14.8);
        assert_eq!(current.condition, "Clouds");
        assert_eq!(current.description, "scattered clouds");
    }

    #[test]
    fn test_parse_current_rejects_missing_fields() {
        assert!(parse_current(&json!({ "main": {} })).is_err());
    }

    #[test]
    fn test_parse_forecast_groups_by_date_in_order() {
        let entry = |dt: &str, temp: f64, main: &str| {
            json!({
                "dt_txt": dt,
                "main": { "temp": temp },
                "weather": [{ "main": main, "icon": "10d" }]
            })
        };
        let payload = json!({
            "list": [
                entry("2024-06-02 09:00:00", 30.04, "Rain"),
                entry("2024-06-02 12:00:00", 33.27, "Clear"),
                entry("2024-06-01 21:00:00", 25.0, "Clouds"),
                entry("2024-06-02 15:00:00", 28.96, "Clear"),
                entry("2024-06-03 00:00:00", 22.0, "Clear"),
                entry("2024-06-04 00:00:00", 22.0, "Clear"),
                entry("2024-06-05 00:00:00", 22.0, "Clear"),
                entry("2024-06-06 00:00:00", 22.0, "Clear")
            ]
        });

        let days = parse_forecast(&payload, FORECAST_DAYS).unwrap();
        assert_eq!(days.len(), 5);
        assert_eq!(days[0].date, "2024-06-02");
        assert_eq!(days[0].temp_high, 33.3);
        assert_eq!(days[0].temp_low, 29.0);
        assert_eq!(days[0].condition, "Rain");
        assert_eq!(days[1].date, "2024-06-01");
        assert_eq!(days[4].date, "2024-06-05");
    }

    #[tokio::test]
    async fn test_unconfigured_service() {
        let service = WeatherService::new(Some(String::new())).unwrap();
        assert!(!service.is_configured());
        assert!(matches!(
            service.report(1.0, 2.0).await,
            Err(WeatherError::NotConfigured)
        ));
    }

    /// Serves `/weather` and fails `/forecast` with a 502
    async fn half_broken_upstream() -> String {
        use axum::http::StatusCode;
        use axum::routing::get;

        let app = axum::Router::new()
            .route(
                "/weather",
                get(|| async {
                    axum::Json(json!({
                        "main": { "temp": 24.0, "humidity": 50 },
                        "wind": { "speed": 2.0 },
                        "weather": [{ "main": "Clear", "icon": "01d", "description": "clear sky" }]
                    }))
                }),
            )
            .route("/forecast", get(|| async { StatusCode::BAD_GATEWAY }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_failed_forecast_names_the_forecast() {
        let base_url = half_broken_upstream().await;
        let service = WeatherService::new(Some("key".into()))
            .unwrap()
            .with_base_url(base_url);

        assert_eq!(service.current(1.0, 2.0).await.unwrap().temperature, 24.0);

        let err = service.report(1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, WeatherError::Request { resource: "forecast", .. }));
        assert!(err.to_string().starts_with("Failed to fetch forecast"), "{err}");
        assert!(service.cache.lock().await.get(&cache_key(1.0, 2.0)).is_none());
    }
}
