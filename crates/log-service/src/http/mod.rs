//! Synchronous (HTTP) protocol server.

pub mod error;
mod handlers;
mod server;
mod session;

pub use error::{ApiError, JsonResponse};
pub use handlers::LAST_ENTRY_KEY;
pub use server::{router, HttpServer};
pub use session::SessionHandle;
