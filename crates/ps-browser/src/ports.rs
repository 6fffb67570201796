//! Port traits for the session's external collaborators.
//!
//! The viewer, the user-facing prompt surface, the markup rewriter,
//! and the relay transport are all opaque to the pipeline; each is a
//! seam the embedder (or a test) plugs an implementation into.

use ps_core::RelayResult;
use ps_ipc::ViewerMessage;
use ps_net::RelayClient;
use ps_net::tls::TlsConnector;
use ps_net::transport::Transport;

/// User-visible notifications raised by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    InvalidUrl { input: String },
    NetworkError,
    HttpError { status: u16, reason: String },
}

impl Notice {
    pub fn message(&self) -> String {
        match self {
            Self::InvalidUrl { input } => {
                format!("Error: \"{input}\" is not a valid URL.")
            }
            Self::NetworkError => "NetworkError: A network error occurred.".to_owned(),
            Self::HttpError { status, reason } => format!("HTTPError: {status} {reason}"),
        }
    }
}

/// Receives typed payloads; the rendering surface is opaque behind it.
pub trait ViewerPort {
    fn deliver(&mut self, message: ViewerMessage);
}

/// Surfaces notifications and the oversize-resource confirmation.
pub trait UserPrompt {
    fn notify(&mut self, notice: Notice);

    /// Asks whether an oversize binary may be converted and delivered.
    /// Returning `false` drops the payload silently.
    fn confirm_oversize(&mut self, size_bytes: usize) -> bool;
}

/// Pure transform proxifying embedded references in fetched markup.
pub trait MarkupRewriter {
    fn rewrite(&self, markup: &str, relay_endpoint: &str) -> String;
}

/// Rewriter for embedders whose viewer proxifies references itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRewriter;

impl MarkupRewriter for PassthroughRewriter {
    fn rewrite(&self, markup: &str, _relay_endpoint: &str) -> String {
        markup.to_owned()
    }
}

/// How the response body should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Text,
    Binary,
}

/// Response surface the loader consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub status: u16,
    pub reason: String,
    /// Absent when the response carried no readable Content-Type; the
    /// loader then keeps the originally requested interpretation.
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Issues the relay GET. The only suspending operation in the
/// pipeline.
pub trait RelayTransport {
    fn get(&mut self, url: &str, mode: FetchMode) -> RelayResult<FetchedResource>;
}

/// Production transport backed by the blocking HTTP client.
pub struct HttpRelayTransport<T, C>
where
    T: Transport,
    C: TlsConnector,
{
    client: RelayClient<T, C>,
}

impl Default for HttpRelayTransport<ps_net::transport::TcpTransport, ps_net::tls::RustlsConnector> {
    fn default() -> Self {
        Self {
            client: RelayClient::default(),
        }
    }
}

impl<T, C> HttpRelayTransport<T, C>
where
    T: Transport,
    C: TlsConnector,
{
    pub fn new(client: RelayClient<T, C>) -> Self {
        Self { client }
    }
}

impl<T, C> RelayTransport for HttpRelayTransport<T, C>
where
    T: Transport,
    C: TlsConnector,
{
    fn get(&mut self, url: &str, _mode: FetchMode) -> RelayResult<FetchedResource> {
        let response = self.client.get(url)?;
        Ok(FetchedResource {
            status: response.status.as_u16(),
            reason: response.reason.clone(),
            content_type: response.content_type().map(ToOwned::to_owned),
            body: response.body,
        })
    }
}
