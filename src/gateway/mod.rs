//! Gateway server implementation

mod router;
mod server;
mod service;

pub use router::{AppState, REQUEST_ID_HEADER, auth_gate, create_router};
pub use server::{Gateway, serve, watch_signals};
pub use service::{API_VERSION, AccessService, CheckRequest, CheckResult, HEALTHY};
