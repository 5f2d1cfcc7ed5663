//! HTTP plumbing behind the resilient client.

pub mod reqwest_transport;
pub mod transport;

pub use reqwest_transport::{ReqwestTransport, ReqwestTransportBuilder};
pub use transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Re-exported so callers can build requests without a direct `reqwest`
/// dependency.
pub use reqwest::Method;
