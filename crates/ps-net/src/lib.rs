//! Networking core of the relay pipeline: target normalization, relay
//! URL construction, pre-fetch classification, and the fetch client.

pub mod classify;
pub mod client;
pub mod http;
pub mod relay;
pub mod tls;
pub mod transport;
pub mod url;

pub use classify::FetchStrategy;
pub use classify::classify;
pub use client::RelayClient;
pub use http::FetchUrl;
pub use http::GetRequest;
pub use http::Header;
pub use http::HttpResponse;
pub use http::HttpStatusCode;
pub use relay::RelayUrlBuilder;
pub use tls::TrustStoreMode;
pub use url::UpgradePolicy;
pub use url::normalize_target;
