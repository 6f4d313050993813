// Re-export the API module components
pub use self::{
    client::ApiClient,
    errors::ApiClientError,
    models::{Job, JobFile, Page, Upload, User},
    types::JobStatus,
};

// Module declarations
mod client;
mod errors;
mod models;
mod types;
