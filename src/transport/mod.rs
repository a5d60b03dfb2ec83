mod http_transport;
pub mod retry_policy;

pub use http_transport::HttpTransport;
