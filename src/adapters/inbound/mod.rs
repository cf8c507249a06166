mod admin_server;

pub use admin_server::{router, AdminServer, AdminState};

// Re-export for external use (e.g., integration tests)
#[allow(unused_imports)]
pub use admin_server::{ApiError, AutoStopResponse, CompletionsResponse, HealthResponse, ServerResponse};
