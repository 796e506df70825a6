//! Sentinel Hub true-colour tiles with a local fallback
//!
//! A client-credentials token is requested for every image; the process API
//! then renders a least-cloudy Sentinel-2 L2A mosaic around the point.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use walkdir::WalkDir;

pub const SENTINEL_TOKEN_URL: &str = "https://services.sentinel-hub.com/oauth/token";
pub const SENTINEL_PROCESS_URL: &str = "https://services.sentinel-hub.com/api/v1/process";

/// Half-width of the requested box, in degrees
pub const BBOX_HALF_WIDTH: f64 = 0.003;

/// Output tile edge, in pixels
pub const TILE_SIZE: u32 = 512;

const TIME_FROM: &str = "2023-01-01T00:00:00Z";
const TIME_TO: &str = "2023-12-31T23:59:59Z";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const TRUE_COLOR_EVALSCRIPT: &str = r#"//VERSION=3
function setup() {
    return {
        input: ["B04", "B03", "B02"],
        output: { bands: 3 }
    };
}
function evaluatePixel(sample) {
    return [2.5 * sample.B04, 2.5 * sample.B03, 2.5 * sample.B02];
}"#;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum SatelliteError {
    #[error("Sentinel Hub authentication failed: {0}")]
    Auth(String),

    #[error("Sentinel Hub request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for SatelliteError {
    fn from(err: reqwest::Error) -> Self {
        SatelliteError::Request(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// `[min_lon, min_lat, max_lon, max_lat]` around a point
pub fn bbox(lat: f64, lon: f64) -> [f64; 4] {
    [
        lon - BBOX_HALF_WIDTH,
        lat - BBOX_HALF_WIDTH,
        lon + BBOX_HALF_WIDTH,
        lat + BBOX_HALF_WIDTH,
    ]
}

/// Process API body for a true-colour PNG
pub fn build_process_request(lat: f64, lon: f64) -> Value {
    json!({
        "input": {
            "bounds": {
                "bbox": bbox(lat, lon),
                "properties": { "crs": "http://www.opengis.net/def/crs/EPSG/0/4326" }
            },
            "data": [{
                "type": "sentinel-2-l2a",
                "dataFilter": {
                    "timeRange": { "from": TIME_FROM, "to": TIME_TO },
                    "mosaickingOrder": "leastCC"
                }
            }]
        },
        "output": {
            "width": TILE_SIZE,
            "height": TILE_SIZE,
            "responses": [{
                "identifier": "default",
                "format": { "type": "image/png" }
            }]
        },
        "evalscript": TRUE_COLOR_EVALSCRIPT
    })
}

pub struct SentinelClient {
    client: Client,
    client_id: String,
    client_secret: String,
}

impl SentinelClient {
    /// `None` unless both credentials are present
    pub fn new(
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Result<Option<Self>, SatelliteError> {
        let (Some(client_id), Some(client_secret)) = (
            client_id.filter(|v| !v.is_empty()),
            client_secret.filter(|v| !v.is_empty()),
        ) else {
            return Ok(None);
        };

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Some(Self {
            client,
            client_id,
            client_secret,
        }))
    }

    async fn token(&self) -> Result<String, SatelliteError> {
        let response = self
            .client
            .post(SENTINEL_TOKEN_URL)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SatelliteError::Auth(format!("status {}", response.status())));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SatelliteError::Auth(e.to_string()))?;
        Ok(token.access_token)
    }

    /// PNG bytes centred on the point
    pub async fn true_color(&self, lat: f64, lon: f64) -> Result<Vec<u8>, SatelliteError> {
        let token = self.token().await?;

        let response = self
            .client
            .post(SENTINEL_PROCESS_URL)
            .bearer_auth(token)
            .json(&build_process_request(lat, lon))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SatelliteError::Request(format!(
                "status {}",
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Local images served when Sentinel Hub is unavailable
#[derive(Debug, Clone)]
pub struct FallbackImages {
    dir: PathBuf,
}

impl FallbackImages {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Image files directly inside the directory, sorted by path
    pub fn list(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| content_type(p).is_some())
            .collect();
        files.sort();
        files
    }

    /// A random image, or `None` if the directory has none
    pub fn pick(&self) -> Option<PathBuf> {
        self.list().choose(&mut rand::thread_rng()).cloned()
    }
}

/// MIME type for a supported image extension
pub fn content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    match ext.as_str() {
        "png" => Some("image/png"),
        _ => Some("image/jpeg"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_is_centred_on_point() {
        let [min_lon, min_lat, max_lon, max_lat] = bbox(19.10, 73.80);
        assert!((min_lon - 73.797).abs() < 1e-9);
        assert!((max_lon - 73.803).abs() < 1e-9);
        assert!((min_lat - 19.097).abs() < 1e-9);
        assert!((max_lat - 19.103).abs() < 1e-9);
    }

    #[test]
    fn test_process_request_shape() {
        let body = build_process_request(19.10, 73.80);

        assert_eq!(body["input"]["data"][0]["type"], "sentinel-2-l2a");
        assert_eq!(
            body["input"]["data"][0]["dataFilter"]["mosaickingOrder"],
            "leastCC"
        );
        assert_eq!(body["output"]["width"], 512);
        assert_eq!(body["output"]["height"], 512);
        assert_eq!(body["output"]["responses"][0]["format"]["type"], "image/png");
        assert!(body["evalscript"].as_str().unwrap().contains("B04"));
        assert_eq!(body["input"]["bounds"]["bbox"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_client_requires_both_credentials() {
        assert!(SentinelClient::new(Some("id".into()), None).unwrap().is_none());
        assert!(SentinelClient::new(None, Some("secret".into())).unwrap().is_none());
        assert!(SentinelClient::new(Some("id".into()), Some("secret".into()))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a.png")), Some("image/png"));
        assert_eq!(content_type(Path::new("a.JPG")), Some("image/jpeg"));
        assert_eq!(content_type(Path::new("a.jpeg")), Some("image/jpeg"));
        assert_eq!(content_type(Path::new("a.txt")), None);
        assert_eq!(content_type(Path::new("noext")), None);
    }

    #[test]
    fn test_fallback_only_picks_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("field.png"), b"png").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("deep.png"), b"png").unwrap();

        let fallback = FallbackImages::new(dir.path());
        assert_eq!(fallback.list(), vec![dir.path().join("field.png")]);
        assert_eq!(fallback.pick(), Some(dir.path().join("field.png")));
    }

    #[test]
    fn test_fallback_empty_or_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FallbackImages::new(dir.path()).pick().is_none());
        assert!(FallbackImages::new(dir.path().join("missing")).pick().is_none());
    }
}
