//! Network side of the recommendation client: the progress stream, the
//! generation controllers and the request/reply API.

pub mod api_client;
pub mod cache_sync;
pub mod connection;
pub mod fallback_controller;
pub mod generation_controller;
pub mod http_error;
pub mod http_transport;
pub mod regeneration_controller;
pub mod sse;
pub mod stream_driver;
pub mod stream_state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use api_client::{ApiClient, GenerationApi};
pub use cache_sync::CacheSync;
pub use connection::{ConnectionManager, ConnectionSignal, ReadyState};
pub use fallback_controller::FallbackController;
pub use generation_controller::GenerationController;
pub use http_transport::HttpStreamTransport;
pub use regeneration_controller::RegenerationController;
pub use transport::{StreamAddress, StreamFrame, StreamTransport};
