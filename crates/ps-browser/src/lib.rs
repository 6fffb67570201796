//! Browser-side coordinator of the relay pipeline.
//!
//! The [`Session`] owns the write-once relay configuration, the load
//! state machine, the address bar, and the four collaborator ports
//! (transport, viewer, user prompt, markup rewriter). All work is
//! single-threaded and event-driven: the only suspending operation is
//! the relay fetch, and every state mutation that could race with an
//! in-flight callback goes through the deferred-op queue drained by
//! [`Session::tick`].

pub mod loader;
pub mod ports;
pub mod router;

use ports::MarkupRewriter;
use ports::Notice;
use ports::RelayTransport;
use ports::UserPrompt;
use ports::ViewerPort;
use ps_core::RelayResult;
use ps_ipc::PayloadKind;
use ps_ipc::ViewerMessage;
use ps_net::RelayUrlBuilder;
use ps_net::UpgradePolicy;
use ps_session::BorderSignal;
use ps_session::LoadStateMachine;
use ps_session::RelayConfig;
use ps_session::SettingsStore;
use ps_session::SignalCycle;
use router::AddressBar;
use std::collections::VecDeque;

pub use loader::LoadRequest;
pub use ports::FetchMode;
pub use ports::FetchedResource;
pub use ports::HttpRelayTransport;
pub use router::AddressBarEvent;
pub use router::EventOutcome;

/// State mutations deferred to the next scheduling tick so they never
/// run synchronously inside the handler that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeferredOp {
    SetLoading,
    ClearLoading,
    Notify(Notice),
}

/// The relay pipeline session.
///
/// Configuration is read once at construction and immutable afterwards;
/// the loading flag is only touched from fetch-lifecycle steps and
/// spinner-control messages.
pub struct Session<T, V, U, M>
where
    T: RelayTransport,
    V: ViewerPort,
    U: UserPrompt,
    M: MarkupRewriter,
{
    pub(crate) relay: RelayUrlBuilder,
    pub(crate) policy: UpgradePolicy,
    pub(crate) state: LoadStateMachine,
    pub(crate) cycle: SignalCycle,
    pub(crate) address_bar: AddressBar,
    pub(crate) pending: VecDeque<DeferredOp>,
    pub(crate) transport: T,
    pub(crate) viewer: V,
    pub(crate) prompt: U,
    pub(crate) rewriter: M,
}

impl<T, V, U, M> Session<T, V, U, M>
where
    T: RelayTransport,
    V: ViewerPort,
    U: UserPrompt,
    M: MarkupRewriter,
{
    pub fn new(config: RelayConfig, transport: T, viewer: V, prompt: U, rewriter: M) -> Self {
        Self {
            relay: RelayUrlBuilder::new(config.endpoint().to_owned()),
            policy: UpgradePolicy::default(),
            state: LoadStateMachine::new(),
            cycle: SignalCycle::stopped(),
            address_bar: AddressBar::default(),
            pending: VecDeque::new(),
            transport,
            viewer,
            prompt,
            rewriter,
        }
    }

    /// Opens a session with the endpoint read once from the settings
    /// store (`proxy` key, documented default).
    pub fn open(
        store: &SettingsStore,
        transport: T,
        viewer: V,
        prompt: U,
        rewriter: M,
    ) -> RelayResult<Self> {
        let config = RelayConfig::load(store)?;
        Ok(Self::new(config, transport, viewer, prompt, rewriter))
    }

    pub fn with_upgrade_policy(mut self, policy: UpgradePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn relay_endpoint(&self) -> &str {
        self.relay.endpoint()
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    pub fn address_bar(&self) -> &AddressBar {
        &self.address_bar
    }

    /// Drains the deferred-op queue. Called by the embedder between
    /// events, and by the loader at its suspension point before the
    /// fetch goes out.
    pub fn tick(&mut self) {
        while let Some(op) = self.pending.pop_front() {
            match op {
                DeferredOp::SetLoading => {
                    if self.state.begin() {
                        self.cycle = SignalCycle::start();
                    }
                }
                DeferredOp::ClearLoading => {
                    self.state.finish();
                }
                DeferredOp::Notify(notice) => {
                    self.prompt.notify(notice);
                }
            }
        }
    }

    /// Advances the border feedback cycle by `elapsed_ms` and returns
    /// the signal to display.
    pub fn advance_feedback(&mut self, elapsed_ms: u64) -> BorderSignal {
        self.cycle.advance(elapsed_ms, self.state.is_loading())
    }

    /// Navigates to a link: fragment-only links bypass normalization
    /// and are forwarded verbatim as a same-document scroll; anything
    /// else is normalized first, with a queued notification on failure.
    pub fn navigate(&mut self, link_url: &str) {
        let target = if link_url.starts_with('#') {
            Some(link_url.to_owned())
        } else {
            let normalized = ps_net::normalize_target(link_url, &self.policy);
            if normalized.is_none() {
                self.queue(DeferredOp::Notify(Notice::InvalidUrl {
                    input: link_url.to_owned(),
                }));
            }
            normalized
        };

        if let Some(target) = target {
            self.state.cancel();
            let generation = self.state.generation();
            self.deliver(generation, PayloadKind::Href, target);
        }
    }

    pub(crate) fn queue(&mut self, op: DeferredOp) {
        self.pending.push_back(op);
    }

    /// Sends a payload to the viewer unless a newer navigation has
    /// superseded the producing request.
    pub(crate) fn deliver(&mut self, generation: u64, kind: PayloadKind, value: String) {
        if !self.state.is_current(generation) {
            tracing::debug!(
                kind = kind.as_str(),
                "dropping payload from superseded request"
            );
            return;
        }

        let message = ViewerMessage::new(self.relay.endpoint().to_owned(), kind, value);
        self.viewer.deliver(message);
    }

    /// Clears the rendering surface ahead of a new navigation.
    pub(crate) fn deliver_reset(&mut self) {
        let message = ViewerMessage::reset(self.relay.endpoint().to_owned());
        self.viewer.deliver(message);
    }
}


#[cfg(test)]
mod tests {
    use super::DeferredOp;
    use super::Session;
    use super::test_support::RecordingPrompt;
    use super::test_support::RecordingViewer;
    use super::test_support::ScriptedTransport;
    use super::test_support::TaggingRewriter;
    use crate::ports::Notice;
    use ps_ipc::PayloadKind;
    use ps_session::RelayConfig;

    fn session(
        transport: ScriptedTransport,
    ) -> Session<ScriptedTransport, RecordingViewer, RecordingPrompt, TaggingRewriter> {
        Session::new(
            RelayConfig::from_endpoint("https://relay.test/fetch?url="),
            transport,
            RecordingViewer::default(),
            RecordingPrompt::default(),
            TaggingRewriter,
        )
    }

    #[test]
    fn fragment_navigation_bypasses_normalization() {
        let mut session = session(ScriptedTransport::default());
        session.navigate("#section-2");

        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Href);
        assert_eq!(messages[0].value, "#section-2");
    }

    #[test]
    fn invalid_navigation_queues_exactly_one_notice() {
        let mut session = session(ScriptedTransport::default());
        session.navigate("http://");

        // Nothing surfaces until the next tick.
        assert!(session.prompt.notices.borrow().is_empty());
        session.tick();

        let notices = session.prompt.notices.borrow();
        assert_eq!(notices.len(), 1);
        assert_eq!(
            notices[0],
            Notice::InvalidUrl {
                input: "http://".to_owned()
            }
        );
        assert!(session.viewer.messages.borrow().is_empty());
    }

    #[test]
    fn navigation_emits_href_with_upgraded_url() {
        let mut session = session(ScriptedTransport::default());
        session.navigate("en.wikipedia.org/wiki/Rust");

        let messages = session.viewer.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, PayloadKind::Href);
        assert_eq!(messages[0].value, "https://en.wikipedia.org/wiki/Rust");
        assert_eq!(messages[0].proxy_url, "https://relay.test/fetch?url=");
    }

    #[test]
    fn deferred_clear_applies_on_tick_not_before() {
        let mut session = session(ScriptedTransport::default());
        session.queue(DeferredOp::SetLoading);
        session.tick();
        assert!(session.is_loading());

        session.queue(DeferredOp::ClearLoading);
        assert!(session.is_loading());
        session.tick();
        assert!(!session.is_loading());
    }

    #[test]
    fn stale_generation_payload_is_dropped() {
        let mut session = session(ScriptedTransport::default());
        let stale = session.state.generation();
        session.state.cancel();

        session.deliver(stale, PayloadKind::Document, "<html></html>".to_owned());
        assert!(session.viewer.messages.borrow().is_empty());
    }

    #[test]
    fn config_is_read_once_from_the_store() {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|value| value.as_nanos())
            .unwrap_or_default();
        let path = std::env::temp_dir().join(format!("periscope-session-open-{stamp}.kv"));
        let store = ps_session::SettingsStore::new(path.clone());
        let wrote = store.set("proxy", "https://relay.example/r?u=");
        assert!(wrote.is_ok());

        let session = Session::open(
            &store,
            ScriptedTransport::default(),
            RecordingViewer::default(),
            RecordingPrompt::default(),
            TaggingRewriter,
        );
        assert!(session.is_ok());
        let session = match session {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(session.relay_endpoint(), "https://relay.example/r?u=");

        let _ = std::fs::remove_file(path);
    }
}
