//! HTTP API module for the custom handler route.

pub mod envelope;
pub mod handlers;
pub mod routes;
pub mod variant;

pub use envelope::{InvokeRequest, InvokeResponse};
pub use handlers::AppState;
pub use routes::create_router;
pub use variant::{HandlerVariant, Mode};
