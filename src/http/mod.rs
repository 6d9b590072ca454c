//! HTTP admission middleware and server.

mod layer;
mod response;
mod server;

pub use layer::{client_identity, AdmissionLayer, AdmissionService, FORWARDED_FOR};
pub use response::{ErrorBody, RateLimited, RejectionBody, REJECTION_STATUS};
pub use server::{router, HttpServer};
