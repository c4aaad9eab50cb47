//! Request/response shapes for the thin HTTP mapping layer.

use serde::{Deserialize, Serialize};

/// Uniform envelope every endpoint returns, success or failure, so clients
/// have one shape to parse regardless of route.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data) }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLibraryRequest {
    pub name: String,
    pub path: String,
    #[serde(default = "default_scan_interval_hours")]
    pub scan_interval_hours: i64,
}

fn default_scan_interval_hours() -> i64 {
    24
}

#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    #[serde(default)]
    pub mode: JobModeDto,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobModeDto {
    #[default]
    Missing,
    All,
}

impl From<JobModeDto> for crate::jobs::JobMode {
    fn from(value: JobModeDto) -> Self {
        match value {
            JobModeDto::Missing => crate::jobs::JobMode::Missing,
            JobModeDto::All => crate::jobs::JobMode::All,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PostIdRequest {
    pub post_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ResolveAllSameFolderRequest {
    #[serde(default)]
    pub exact_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page_size() -> i64 {
    20
}
