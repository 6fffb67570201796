//! Per-request fetch lifecycle.
//!
//! Each load runs an explicit state machine
//! `Pending -> Fetching -> (Resolved | Retrying -> Fetching) -> Terminal`
//! with at most one type-mismatch retry. The relay fetch itself is the
//! only suspension point; loading-flag mutation is deferred around it.

use crate::DeferredOp;
use crate::Session;
use crate::ports::FetchMode;
use crate::ports::FetchedResource;
use crate::ports::MarkupRewriter;
use crate::ports::Notice;
use crate::ports::RelayTransport;
use crate::ports::UserPrompt;
use crate::ports::ViewerPort;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use ps_core::RelayResult;
use ps_ipc::PayloadKind;
use ps_net::FetchStrategy;

/// Binary payloads above this size need interactive confirmation
/// before data-URI conversion.
pub const OVERSIZE_THRESHOLD_BYTES: usize = 9_000_000;

/// One resource load: the top-level navigation target when
/// `is_primary`, otherwise a sub-resource discovered while rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub resource_ref: String,
    pub media_type_hint: Option<String>,
    pub is_primary: bool,
}

impl LoadRequest {
    pub fn primary(resource_ref: impl Into<String>, media_type_hint: Option<String>) -> Self {
        Self {
            resource_ref: resource_ref.into(),
            media_type_hint,
            is_primary: true,
        }
    }

    pub fn subresource(resource_ref: impl Into<String>, media_type_hint: Option<String>) -> Self {
        Self {
            resource_ref: resource_ref.into(),
            media_type_hint,
            is_primary: false,
        }
    }
}

/// Lifecycle states of one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPhase {
    Pending,
    Fetching,
    Retrying,
    Resolved,
    Terminal,
}

struct LoadTask {
    request: LoadRequest,
    relay_url: String,
    fetch_type: String,
    generation: u64,
    phase: RequestPhase,
    retried: bool,
}

impl LoadTask {
    fn enter(&mut self, phase: RequestPhase) {
        tracing::trace!(
            from = ?self.phase,
            to = ?phase,
            url = %self.relay_url,
            "request phase transition"
        );
        self.phase = phase;
    }

    /// Marks the single permitted retry and switches the fetch type.
    fn retry_as(&mut self, fetch_type: &str) {
        self.retried = true;
        self.fetch_type = fetch_type.to_owned();
        self.enter(RequestPhase::Retrying);
    }
}

impl<T, V, U, M> Session<T, V, U, M>
where
    T: RelayTransport,
    V: ViewerPort,
    U: UserPrompt,
    M: MarkupRewriter,
{
    /// Loads a resource through the relay.
    ///
    /// Image/audio/video references classified from the extension skip
    /// the network entirely: the relay URL itself is handed to the
    /// viewer. Everything else goes through the fetch state machine.
    pub fn load_resource(&mut self, request: LoadRequest) -> RelayResult<()> {
        let strategy = ps_net::classify(&request.resource_ref, request.media_type_hint.as_deref());
        let base = self.address_bar.text().to_owned();
        let relay_url = self.relay.relay_url(&request.resource_ref, &base)?;
        let generation = self.state.generation();

        match strategy {
            FetchStrategy::Image => {
                self.deliver(generation, PayloadKind::Img, relay_url);
                Ok(())
            }
            FetchStrategy::Audio => {
                self.deliver(generation, PayloadKind::Audio, relay_url);
                Ok(())
            }
            FetchStrategy::Video => {
                self.deliver(generation, PayloadKind::Video, relay_url);
                Ok(())
            }
            FetchStrategy::Text => self.run_fetch(request, relay_url, "text", generation),
            FetchStrategy::Resource => self.run_fetch(request, relay_url, "resource", generation),
            FetchStrategy::Exact(hint) => self.run_fetch(request, relay_url, &hint, generation),
        }
    }

    fn run_fetch(
        &mut self,
        request: LoadRequest,
        relay_url: String,
        fetch_type: &str,
        generation: u64,
    ) -> RelayResult<()> {
        let mut task = LoadTask {
            request,
            relay_url,
            fetch_type: fetch_type.to_owned(),
            generation,
            phase: RequestPhase::Pending,
            retried: false,
        };

        if !self.state.is_loading() {
            self.queue(DeferredOp::SetLoading);
        }

        loop {
            task.enter(RequestPhase::Fetching);
            // The fetch is the suspension point: queued ops (the
            // loading flag among them) apply before the response lands.
            self.tick();

            let fetched = self
                .transport
                .get(&task.relay_url, fetch_mode(&task.fetch_type));
            let resource = match fetched {
                Ok(resource) => resource,
                Err(error) => {
                    tracing::warn!(code = error.code, %error, "relay fetch failed");
                    task.enter(RequestPhase::Terminal);
                    if task.request.is_primary && self.state.is_loading() {
                        self.queue(DeferredOp::Notify(Notice::NetworkError));
                    }
                    self.queue(DeferredOp::ClearLoading);
                    return Ok(());
                }
            };

            // Header inspection applies to primary requests only. A
            // missing Content-Type is not an error: the originally
            // requested interpretation stands.
            if task.request.is_primary {
                if let Some(content_type) = resource.content_type.as_deref() {
                    if !content_type.starts_with(task.fetch_type.as_str()) {
                        match top_level_type(content_type) {
                            "text" if !task.retried => {
                                task.retry_as("text");
                                continue;
                            }
                            "image" => {
                                return self.settle_direct(&mut task, PayloadKind::Img);
                            }
                            "audio" => {
                                return self.settle_direct(&mut task, PayloadKind::Audio);
                            }
                            "video" => {
                                return self.settle_direct(&mut task, PayloadKind::Video);
                            }
                            _ if task.fetch_type != "resource" && !task.retried => {
                                task.retry_as("resource");
                                continue;
                            }
                            _ => {}
                        }
                    }
                }
            }

            task.enter(RequestPhase::Resolved);
            if resource.status == 200 {
                self.finish_response(&task, &resource);
            } else if task.request.is_primary {
                self.queue(DeferredOp::Notify(Notice::HttpError {
                    status: resource.status,
                    reason: resource.reason.clone(),
                }));
                // Whatever body came back is still delivered.
                self.finish_response(&task, &resource);
            }

            task.enter(RequestPhase::Terminal);
            self.queue(DeferredOp::ClearLoading);
            return Ok(());
        }
    }

    /// Short-circuit for responses whose header names a media type the
    /// viewer plays directly from the relay URL.
    fn settle_direct(&mut self, task: &mut LoadTask, kind: PayloadKind) -> RelayResult<()> {
        self.deliver(task.generation, kind, task.relay_url.clone());
        task.enter(RequestPhase::Terminal);
        self.queue(DeferredOp::ClearLoading);
        Ok(())
    }

    fn finish_response(&mut self, task: &LoadTask, resource: &FetchedResource) {
        match fetch_mode(&task.fetch_type) {
            FetchMode::Text => {
                let text = String::from_utf8_lossy(&resource.body);
                if task.fetch_type == "text/css" {
                    let wrapped = format!("<style>{text}</style>");
                    let markup = self.rewriter.rewrite(&wrapped, self.relay.endpoint());
                    self.deliver(task.generation, PayloadKind::Styles, markup);
                } else {
                    let markup = self.rewriter.rewrite(&text, self.relay.endpoint());
                    self.deliver(task.generation, PayloadKind::Document, markup);

                    if let Some(fragment) = fragment_of(&task.request.resource_ref) {
                        // Scroll to the requested anchor now that the
                        // document is in place.
                        self.navigate(&format!("#{fragment}"));
                    }
                }
            }
            FetchMode::Binary => {
                let size = resource.body.len();
                if size > OVERSIZE_THRESHOLD_BYTES && !self.prompt.confirm_oversize(size) {
                    // Declined: drop silently, no payload and no error.
                    return;
                }

                let data_uri = to_data_uri(resource.content_type.as_deref(), &resource.body);
                self.deliver(task.generation, PayloadKind::Resource, data_uri);
            }
        }
    }
}

fn fetch_mode(fetch_type: &str) -> FetchMode {
    if fetch_type == "resource" {
        FetchMode::Binary
    } else {
        FetchMode::Text
    }
}

/// Leading word characters of a media type (`text/html` -> `text`).
fn top_level_type(content_type: &str) -> &str {
    let end = content_type
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .unwrap_or(content_type.len());
    &content_type[..end]
}

fn fragment_of(resource_ref: &str) -> Option<&str> {
    resource_ref
        .split_once('#')
        .map(|(_, fragment)| fragment)
        .filter(|fragment| !fragment.is_empty())
}

fn to_data_uri(content_type: Option<&str>, body: &[u8]) -> String {
    let mime = content_type
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("application/octet-stream");
    format!("data:{mime};base64,{}", BASE64_STANDARD.encode(body))
}

#[cfg(test)]
mod tests {
    use super::LoadRequest;
    use super::OVERSIZE_THRESHOLD_BYTES;
    use super::fragment_of;
    use super::to_data_uri;
    use super::top_level_type;
    use crate::Session;
    use crate::ports::FetchMode;
    use crate::ports::Notice;
    use crate::test_support::RecordingPrompt;
    use crate::test_support::RecordingViewer;
    use crate::test_support::ScriptedTransport;
    use crate::test_support::TaggingRewriter;
    use crate::test_support::ok_binary;
    use crate::test_support::ok_text;
    use ps_core::RelayError;
    use ps_ipc::PayloadKind;
    use ps_session::RelayConfig;

    const ENDPOINT: &str = "https://relay.test/fetch?url=";

    fn session(
        transport: ScriptedTransport,
    ) -> Session<ScriptedTransport, RecordingViewer, RecordingPrompt, TaggingRewriter> {
        Session::new(
            RelayConfig::from_endpoint(ENDPOINT),
            transport,
            RecordingViewer::default(),
            RecordingPrompt::default(),
            TaggingRewriter,
        )
    }

    #[test]
    fn primary_document_fetch_delivers_rewritten_markup() {
        let transport =
            ScriptedTransport::respond_with(vec![ok_text("text/html", "<html>hi</html>")]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/page.html", None));
        assert!(loaded.is_ok());

        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Document);
        assert_eq!(messages[0].value, "[rewritten]<html>hi</html>");
        assert_eq!(messages[0].proxy_url, ENDPOINT);

        assert_eq!(session.transport.requests.len(), 1);
        assert_eq!(session.transport.requests[0].1, FetchMode::Text);
        assert_eq!(
            session.transport.requests[0].0,
            format!("{ENDPOINT}https%3A%2F%2Fa.com%2Fpage.html")
        );
    }

    #[test]
    fn loading_flag_sets_at_suspension_and_clears_on_next_tick() {
        let transport = ScriptedTransport::respond_with(vec![ok_text("text/html", "<p>x</p>")]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/", None));
        assert!(loaded.is_ok());

        // The clear is scheduled, not immediate.
        assert!(session.is_loading());
        session.tick();
        assert!(!session.is_loading());
    }

    #[test]
    fn css_hint_wraps_styles_before_rewriting() {
        let transport = ScriptedTransport::respond_with(vec![ok_text("text/css", "body{margin:0}")]);
        let mut session = session(transport);

        let request =
            LoadRequest::primary("https://a.com/style.css", Some("text/css".to_owned()));
        let loaded = session.load_resource(request);
        assert!(loaded.is_ok());

        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Styles);
        assert_eq!(messages[0].value, "[rewritten]<style>body{margin:0}</style>");
    }

    #[test]
    fn image_reference_skips_the_fetch_entirely() {
        let mut session = session(ScriptedTransport::default());

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/photo.PNG?x=1", None));
        assert!(loaded.is_ok());

        assert!(session.transport.requests.is_empty());
        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Img);
        assert_eq!(
            messages[0].value,
            format!("{ENDPOINT}https%3A%2F%2Fa.com%2Fphoto.PNG%3Fx%3D1")
        );
    }

    #[test]
    fn text_header_on_opaque_request_retries_exactly_once() {
        let transport = ScriptedTransport::respond_with(vec![
            ok_binary(Some("text/html"), b"<html>listing</html>".to_vec()),
            ok_text("text/html", "<html>listing</html>"),
        ]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/archive.zip", None));
        assert!(loaded.is_ok());

        assert_eq!(session.transport.requests.len(), 2);
        assert_eq!(session.transport.requests[0].1, FetchMode::Binary);
        assert_eq!(session.transport.requests[1].1, FetchMode::Text);

        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Document);
    }

    #[test]
    fn mismatched_opaque_header_on_opaque_request_does_not_retry() {
        let transport = ScriptedTransport::respond_with(vec![ok_binary(
            Some("application/octet-stream"),
            vec![1, 2, 3],
        )]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/archive.zip", None));
        assert!(loaded.is_ok());

        assert_eq!(session.transport.requests.len(), 1);
        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Resource);
    }

    #[test]
    fn unknown_type_request_retries_once_as_opaque() {
        let transport = ScriptedTransport::respond_with(vec![
            ok_text("application/zip", "ignored"),
            ok_binary(Some("application/zip"), vec![80, 75]),
        ]);
        let mut session = session(transport);

        let request = LoadRequest::primary("https://a.com/download", Some("text".to_owned()));
        let loaded = session.load_resource(request);
        assert!(loaded.is_ok());

        assert_eq!(session.transport.requests.len(), 2);
        assert_eq!(session.transport.requests[1].1, FetchMode::Binary);
        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Resource);
        assert!(messages[0].value.starts_with("data:application/zip;base64,"));
    }

    #[test]
    fn image_header_short_circuits_to_direct_url() {
        let transport =
            ScriptedTransport::respond_with(vec![ok_binary(Some("image/png"), vec![1])]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/download", None));
        assert!(loaded.is_ok());

        assert_eq!(session.transport.requests.len(), 1);
        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Img);
        assert_eq!(
            messages[0].value,
            format!("{ENDPOINT}https%3A%2F%2Fa.com%2Fdownload")
        );
    }

    #[test]
    fn missing_content_type_keeps_requested_interpretation() {
        let transport = ScriptedTransport::respond_with(vec![ok_binary(None, vec![9, 9])]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/blob.bin", None));
        assert!(loaded.is_ok());

        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Resource);
        assert!(
            messages[0]
                .value
                .starts_with("data:application/octet-stream;base64,")
        );
    }

    #[test]
    fn header_inspection_skips_subresource_requests() {
        let transport =
            ScriptedTransport::respond_with(vec![ok_binary(Some("text/html"), b"x".to_vec())]);
        let mut session = session(transport);

        let loaded =
            session.load_resource(LoadRequest::subresource("https://a.com/archive.zip", None));
        assert!(loaded.is_ok());

        // No retry: sub-resources trust the requested type.
        assert_eq!(session.transport.requests.len(), 1);
        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Resource);
    }

    #[test]
    fn threshold_size_or_below_needs_no_confirmation() {
        let transport = ScriptedTransport::respond_with(vec![ok_binary(
            Some("application/zip"),
            vec![0_u8; OVERSIZE_THRESHOLD_BYTES],
        )]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/big.zip", None));
        assert!(loaded.is_ok());

        assert!(session.prompt.confirmations.borrow().is_empty());
        assert_eq!(session.viewer.messages.borrow().len(), 1);
    }

    #[test]
    fn one_byte_over_threshold_requires_confirmation() {
        let transport = ScriptedTransport::respond_with(vec![ok_binary(
            Some("application/zip"),
            vec![0_u8; OVERSIZE_THRESHOLD_BYTES + 1],
        )]);
        let mut session = session(transport);
        session.prompt.allow_oversize = true;

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/big.zip", None));
        assert!(loaded.is_ok());

        assert_eq!(
            session.prompt.confirmations.borrow().as_slice(),
            &[OVERSIZE_THRESHOLD_BYTES + 1]
        );
        assert_eq!(session.viewer.messages.borrow().len(), 1);
    }

    #[test]
    fn declined_oversize_drops_payload_silently_and_still_clears() {
        let transport = ScriptedTransport::respond_with(vec![ok_binary(
            Some("application/zip"),
            vec![0_u8; OVERSIZE_THRESHOLD_BYTES + 1],
        )]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/big.zip", None));
        assert!(loaded.is_ok());

        assert!(session.viewer.messages.borrow().is_empty());
        session.tick();
        assert!(session.prompt.notices.borrow().is_empty());
        assert!(!session.is_loading());
    }

    #[test]
    fn transport_failure_notifies_primary_and_clears() {
        let transport = ScriptedTransport::respond_with(vec![Err(RelayError::new(
            "net.transport.connect_failed",
            "refused",
        ))]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/", None));
        assert!(loaded.is_ok());
        session.tick();

        assert_eq!(
            session.prompt.notices.borrow().as_slice(),
            &[Notice::NetworkError]
        );
        assert!(session.viewer.messages.borrow().is_empty());
        assert!(!session.is_loading());
    }

    #[test]
    fn transport_failure_on_subresource_stays_quiet() {
        let transport = ScriptedTransport::respond_with(vec![Err(RelayError::new(
            "net.transport.connect_failed",
            "refused",
        ))]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::subresource("https://a.com/s.css", None));
        assert!(loaded.is_ok());
        session.tick();

        assert!(session.prompt.notices.borrow().is_empty());
        assert!(!session.is_loading());
    }

    #[test]
    fn http_error_notifies_and_still_delivers_body() {
        let transport = ScriptedTransport::respond_with(vec![Ok(crate::FetchedResource {
            status: 404,
            reason: "Not Found".to_owned(),
            content_type: Some("text/html".to_owned()),
            body: b"<html>missing</html>".to_vec(),
        })]);
        let mut session = session(transport);

        let loaded = session.load_resource(LoadRequest::primary("https://a.com/gone.html", None));
        assert!(loaded.is_ok());
        session.tick();

        assert_eq!(
            session.prompt.notices.borrow().as_slice(),
            &[Notice::HttpError {
                status: 404,
                reason: "Not Found".to_owned()
            }]
        );
        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Document);
    }

    #[test]
    fn http_error_on_subresource_delivers_nothing() {
        let transport = ScriptedTransport::respond_with(vec![Ok(crate::FetchedResource {
            status: 500,
            reason: "Internal Server Error".to_owned(),
            content_type: Some("text/css".to_owned()),
            body: b"broken".to_vec(),
        })]);
        let mut session = session(transport);

        let request =
            LoadRequest::subresource("https://a.com/s.css", Some("text/css".to_owned()));
        let loaded = session.load_resource(request);
        assert!(loaded.is_ok());
        session.tick();

        assert!(session.prompt.notices.borrow().is_empty());
        assert!(session.viewer.messages.borrow().is_empty());
    }

    #[test]
    fn fragment_on_navigation_target_triggers_scroll_after_delivery() {
        let transport = ScriptedTransport::respond_with(vec![ok_text("text/html", "<html></html>")]);
        let mut session = session(transport);

        let loaded =
            session.load_resource(LoadRequest::primary("https://a.com/page.html#notes", None));
        assert!(loaded.is_ok());

        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, PayloadKind::Document);
        assert_eq!(messages[1].kind, PayloadKind::Href);
        assert_eq!(messages[1].value, "#notes");
    }

    #[test]
    fn relative_subresource_resolves_against_the_address_bar() {
        let transport = ScriptedTransport::respond_with(vec![ok_binary(None, vec![1])]);
        let mut session = session(transport);
        session.address_bar.set_text("https://a.com/x/y?q");

        let loaded = session.load_resource(LoadRequest::subresource("logo.dat", None));
        assert!(loaded.is_ok());

        assert_eq!(
            session.transport.requests[0].0,
            format!("{ENDPOINT}https%3A%2F%2Fa.com%2Fx%2Flogo.dat")
        );
    }

    #[test]
    fn malformed_base_fails_the_request_without_retry() {
        let mut session = session(ScriptedTransport::default());
        session.address_bar.set_text("not a url");

        let loaded = session.load_resource(LoadRequest::subresource("logo.dat", None));
        assert!(loaded.is_err());
        if let Err(error) = loaded {
            assert_eq!(error.code, "relay.base_invalid");
        }
        assert!(session.transport.requests.is_empty());
    }

    #[test]
    fn top_level_type_takes_leading_word_characters() {
        assert_eq!(top_level_type("text/html; charset=utf-8"), "text");
        assert_eq!(top_level_type("image/png"), "image");
        assert_eq!(top_level_type(""), "");
    }

    #[test]
    fn fragment_extraction_requires_content() {
        assert_eq!(fragment_of("https://a.com/p#sec"), Some("sec"));
        assert_eq!(fragment_of("https://a.com/p#"), None);
        assert_eq!(fragment_of("https://a.com/p"), None);
    }

    #[test]
    fn data_uri_uses_header_mime_or_octet_stream() {
        assert_eq!(to_data_uri(Some("image/gif"), &[1]), "data:image/gif;base64,AQ==");
        assert!(to_data_uri(None, &[1]).starts_with("data:application/octet-stream;base64,"));
    }
}
