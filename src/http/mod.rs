//! HTTP surface: the admission middleware and the host server.

mod middleware;
mod server;

pub use middleware::{
    admission_middleware, with_admission_gate, Rejection, RejectionBody, UNKNOWN_CLIENT,
};
pub use server::{router, HealthStatus, HttpServer};
