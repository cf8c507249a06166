mod dashmap_backend_directory;
mod http_hosting_api;
mod polling_status_source;

pub use dashmap_backend_directory::DashMapBackendDirectory;
pub use http_hosting_api::{HttpHostingApi, DEFAULT_API_URL};
pub use polling_status_source::PollingStatusSource;
