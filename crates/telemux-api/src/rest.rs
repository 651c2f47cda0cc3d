// Inventory HTTP client
//
// Fetches the device/container snapshot the REST layer exposes. The
// snapshot seeds the dashboard summary; live streams then update it.
// Polling cadence is the caller's business; this client only does one
// request per call.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

const INVENTORY_PATH: &str = "api/inventory";

/// `GET /api/inventory` response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryResponse {
    #[serde(default)]
    pub devices: Vec<InventoryDevice>,
    #[serde(default)]
    pub containers: Vec<InventoryContainer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryDevice {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `"online"` / `"offline"`.
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryContainer {
    pub id: String,
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `"running"`, `"exited"`, `"paused"`, ...
    #[serde(alias = "state")]
    pub status: String,
}

/// Raw HTTP client for the dashboard backend's inventory endpoint.
pub struct InventoryClient {
    http: reqwest::Client,
    base_url: Url,
}

impl InventoryClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the backend root; it should end with `/` when it
    /// carries a path prefix (`https://host/dashboard/`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetch the current inventory snapshot.
    pub async fn fetch_inventory(&self) -> Result<InventoryResponse, Error> {
        let url = self.base_url.join(INVENTORY_PATH)?;
        debug!(url = %url, "fetching inventory");

        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
