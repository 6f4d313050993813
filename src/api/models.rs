use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::JobStatus;

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// One page of a paginated listing. `next` is the absolute URL of the
/// following page, absent or null on the last one.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// Entry of a job's output file manifest.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct JobFile {
    pub path: String,
    pub size: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Job {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: Value,
    pub status: JobStatus,
    #[serde(default)]
    pub files: Vec<JobFile>,
    #[serde(default)]
    pub error_info: Option<String>,
}

impl Job {
    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_failed(&self) -> bool {
        self.status == JobStatus::Failure
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Upload {
    pub uuid: String,
    /// Storage path on the server. Missing on records the server could
    /// not resolve; downloads check for it explicitly.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub size: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_staff: bool,
}
