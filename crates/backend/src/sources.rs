use std::future::Future;
use std::path::{Path, PathBuf};

use fleetmap_shared::models::{
    DriverRecord, OfficeLocation, PositionSample, Snapshot, TripRecord, VehicleRecord,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::{SnapshotSourceConfig, TrackingConfig};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Where the one-shot snapshot of offices, vehicles, drivers and trips comes from.
#[derive(Debug, Clone)]
pub enum SnapshotSource {
    File(PathBuf),
    Http(HttpSnapshotSource),
}

impl SnapshotSource {
    pub fn from_config(config: &SnapshotSourceConfig) -> Self {
        match config {
            SnapshotSourceConfig::File(path) => SnapshotSource::File(path.clone()),
            SnapshotSourceConfig::Http { base_url, token } => {
                SnapshotSource::Http(HttpSnapshotSource::new(base_url.clone(), token.clone()))
            }
        }
    }

    pub async fn fetch_snapshot(&self) -> Result<Snapshot, SourceError> {
        match self {
            SnapshotSource::File(path) => load_snapshot_file(path).await,
            SnapshotSource::Http(http) => http.fetch_snapshot().await,
        }
    }
}

/// Read a snapshot document from disk.
pub async fn load_snapshot_file(path: &Path) -> Result<Snapshot, SourceError> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let snapshot: Snapshot = serde_json::from_str(&data).map_err(|source| SourceError::Parse {
        what: path.display().to_string(),
        source,
    })?;

    tracing::info!(
        path = %path.display(),
        vehicles = snapshot.vehicles.len(),
        drivers = snapshot.drivers.len(),
        trips = snapshot.trips.len(),
        "Loaded snapshot file"
    );
    Ok(snapshot)
}

/// The fleet REST API.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpSnapshotSource {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        HttpSnapshotSource {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    pub async fn fetch_snapshot(&self) -> Result<Snapshot, SourceError> {
        let (office, vehicles, drivers, trips) = tokio::try_join!(
            self.get_json::<OfficeLocation>("/office"),
            self.get_json::<Vec<VehicleRecord>>("/vehicles"),
            self.get_json::<Vec<DriverRecord>>("/drivers?status=active"),
            self.get_json::<Vec<TripRecord>>("/trips?status=IN_PROGRESS"),
        )?;
        Ok(Snapshot {
            office,
            vehicles: vehicles.unwrap_or_default(),
            drivers: drivers.unwrap_or_default(),
            trips: trips.unwrap_or_default(),
        })
    }

    /// GET a JSON document; a 404 means "nothing there" rather than an error.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let http_err = |source| SourceError::Http {
            url: url.clone(),
            source,
        };

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(http_err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status().map_err(http_err)?;
        let body = resp.text().await.map_err(http_err)?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|source| SourceError::Parse { what: url.clone(), source })
    }
}

/// A third-party tracking provider that reports raw GPS fixes per device.
pub trait PositionProvider: Send + Sync + 'static {
    fn positions(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<Vec<PositionSample>, SourceError>> + Send;
}

/// Traccar-style provider: `GET /api/positions?deviceId=..` with basic auth.
#[derive(Debug, Clone)]
pub struct TrackingClient {
    client: reqwest::Client,
    base_url: String,
    user: Option<String>,
    password: Option<String>,
}

impl TrackingClient {
    pub fn new(config: &TrackingConfig) -> Self {
        TrackingClient {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }
}

impl PositionProvider for TrackingClient {
    async fn positions(&self, device_id: &str) -> Result<Vec<PositionSample>, SourceError> {
        let url = format!("{}/api/positions", self.base_url);
        let http_err = |source| SourceError::Http {
            url: url.clone(),
            source,
        };

        let mut request = self.client.get(&url).query(&[("deviceId", device_id)]);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }
        let resp = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;
        let body = resp.text().await.map_err(http_err)?;
        serde_json::from_str(&body).map_err(|source| SourceError::Parse { what: url.clone(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir_with_file(file_name: &str, content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(file_name), content).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_load_snapshot_file() {
        let dir = temp_dir_with_file(
            "fleet.json",
            r#"{
                "office": {"longitude": 78.0, "latitude": 20.0, "companyName": "Acme"},
                "vehicles": [{"id": "1", "registrationNumber": "MH12", "liveTracking": true, "trackingDeviceId": "42"}],
                "drivers": [{"id": "7", "fullName": "Asha Rao"}],
                "trips": [{"id": "9", "vehicleId": "2", "currentPosition": {"longitude": 78.1, "latitude": 20.1}}]
            }"#,
        );
        let source = SnapshotSource::File(dir.path().join("fleet.json"));
        let snapshot = source.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.office.unwrap().company_name.as_deref(), Some("Acme"));
        assert_eq!(snapshot.vehicles[0].tracking_device_id.as_deref(), Some("42"));
        assert_eq!(snapshot.drivers[0].full_name.as_deref(), Some("Asha Rao"));
        assert_eq!(snapshot.trips[0].vehicle_id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_missing_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_snapshot_file(&dir.path().join("nope.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
        assert!(err.to_string().contains("nope.json"));
    }

    #[tokio::test]
    async fn test_malformed_snapshot_file() {
        let dir = temp_dir_with_file("fleet.json", r#"{"vehicles": "nope"}"#);
        let err = load_snapshot_file(&dir.path().join("fleet.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));
    }

    #[test]
    fn test_source_from_config() {
        let source = SnapshotSource::from_config(&SnapshotSourceConfig::Http {
            base_url: "http://fleet".to_string(),
            token: None,
        });
        assert!(matches!(source, SnapshotSource::Http(_)));
    }
}
