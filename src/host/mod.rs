//! Host side of the bridge: HTTP requests in, plugin calls out.

pub mod adapter;
pub mod pipeline;
pub mod server;

pub use adapter::{replay, HostAdapter, NextHandler, PluginService};
pub use pipeline::{NotFound, Pipeline};
pub use server::HostServer;

use crate::error::PluginError;
use bytes::Bytes;
use http::Response;
use http_body_util::Full;

/// Request and response body once buffered.
pub type Body = Full<Bytes>;

/// Generic error page for a failed stage. Details stay in the log.
pub fn error_response(err: &PluginError) -> Response<Body> {
    let status = err.status_code();
    let reason = status.canonical_reason().unwrap_or("Error");
    let mut response = Response::new(Full::new(Bytes::from(reason.to_string())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use http::StatusCode;

    #[test]
    fn test_error_response_status() {
        let response = error_response(&PluginError::PayloadTooLarge { limit: 1 });
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = error_response(&TransportError::Closed.into());
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
