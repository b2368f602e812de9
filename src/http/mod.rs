//! Request and response value carriers.
//!
//! The connection engines consume and produce these as opaque data: the
//! engines never interpret header semantics beyond framing-relevant names
//! (`content-length`, `transfer-encoding`, `connection`, `expect`,
//! `alt-svc`).

pub mod body;
pub mod request;
pub mod response;

// Re-exports for convenience
pub use body::RequestBody;
pub use request::{HttpRequest, HttpVersionPolicy};
pub use response::{HttpResponse, ResponseBody};
