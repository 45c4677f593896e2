//! Store app details: a single page per app.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use trawl_core::error::AppError;
use trawl_core::request::{PageRequest, SinglePageRequest};

use crate::fetcher::SteamRequest;

const APP_DETAILS_URL: &str = "https://store.steampowered.com/api/appdetails";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDetailsRequest {
    pub app_id: u32,
}

impl AppDetailsRequest {
    pub fn new(app_id: u32) -> Self {
        Self { app_id }
    }
}

#[derive(Deserialize)]
struct AppDetailsEntry {
    #[serde(default)]
    success: bool,
}

impl PageRequest for AppDetailsRequest {
    fn resource_id(&self) -> String {
        self.app_id.to_string()
    }
}

impl SinglePageRequest for AppDetailsRequest {
    fn validate(&self, body: &[u8]) -> Result<(), AppError> {
        let entries: HashMap<String, AppDetailsEntry> = serde_json::from_slice(body)?;
        match entries.get(&self.app_id.to_string()) {
            Some(entry) if entry.success => Ok(()),
            Some(_) => Err(AppError::ValidationError(format!(
                "invalid app data for app {}",
                self.app_id
            ))),
            None => Err(AppError::ValidationError(format!(
                "response has no entry for app {}",
                self.app_id
            ))),
        }
    }
}

impl SteamRequest for AppDetailsRequest {
    fn url(&self) -> Result<Url, AppError> {
        Url::parse_with_params(APP_DETAILS_URL, &[("appids", self.app_id.to_string())])
            .map_err(|e| AppError::Generic(format!("Invalid URL: {e}")))
    }
}
