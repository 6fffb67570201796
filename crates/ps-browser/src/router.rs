//! Boundary message routing: viewer control messages and local
//! address-bar events.

use crate::DeferredOp;
use crate::Session;
use crate::loader::LoadRequest;
use crate::ports::MarkupRewriter;
use crate::ports::Notice;
use crate::ports::RelayTransport;
use crate::ports::UserPrompt;
use crate::ports::ViewerPort;
use ps_ipc::ControlMessage;
use ps_ipc::SpinnerSwitch;
use ps_session::SignalCycle;

pub const ENTER_KEY_CODE: u32 = 13;

/// Address-bar model: the visible text and its scroll offset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressBar {
    text: String,
    scroll_offset: u32,
}

impl AddressBar {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn scroll_offset(&self) -> u32 {
        self.scroll_offset
    }

    pub fn set_scroll_offset(&mut self, offset: u32) {
        self.scroll_offset = offset;
    }

    pub fn reset_scroll(&mut self) {
        self.scroll_offset = 0;
    }
}

/// Local UI events feeding the navigation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressBarEvent {
    /// Form submission of the address bar.
    Submit { link_url: Option<String> },
    /// A key released inside the address bar.
    Key { code: u32, link_url: Option<String> },
    /// A navigation trigger with no key attached (context menu, external
    /// request).
    Trigger { link_url: Option<String> },
}

/// What the embedding shell must do after an address-bar event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOutcome {
    pub navigated: bool,
    /// Submit events suppress the platform's default form handling.
    pub suppress_default: bool,
}

impl<T, V, U, M> Session<T, V, U, M>
where
    T: RelayTransport,
    V: ViewerPort,
    U: UserPrompt,
    M: MarkupRewriter,
{
    /// Handles a message from the viewer.
    ///
    /// Spinner controls toggle the load indicator without navigating.
    /// Navigation messages reset the surface, cancel in-flight loads,
    /// and start the new primary load; a target that fails to
    /// normalize only updates the address bar with the raw string.
    pub fn handle_control_message(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Spinner(SpinnerSwitch::On) => {
                self.state.force_loading();
                self.cycle = SignalCycle::start();
            }
            ControlMessage::Spinner(SpinnerSwitch::Off) => {
                self.state.force_idle();
            }
            ControlMessage::Navigate {
                media_type,
                link_url,
            } => match ps_net::normalize_target(&link_url, &self.policy) {
                Some(normalized) => {
                    self.deliver_reset();
                    self.state.cancel();
                    let request = LoadRequest::primary(normalized.clone(), media_type);
                    if let Err(error) = self.load_resource(request) {
                        // Request-fatal (configuration class); the flag
                        // must not stay stuck.
                        tracing::error!(code = error.code, %error, "navigation load failed");
                        self.queue(DeferredOp::ClearLoading);
                    }
                    self.address_bar.set_text(normalized);
                }
                None => {
                    self.queue(DeferredOp::Notify(Notice::InvalidUrl {
                        input: link_url.clone(),
                    }));
                    self.address_bar.set_text(link_url);
                }
            },
        }
    }

    /// Handles a local address-bar event. Enter, submit, and keyless
    /// triggers navigate; any other key is ignored.
    pub fn handle_address_bar_event(&mut self, event: AddressBarEvent) -> EventOutcome {
        let (key_code, link_url, is_submit) = match event {
            AddressBarEvent::Submit { link_url } => (None, link_url, true),
            AddressBarEvent::Key { code, link_url } => (Some(code), link_url, false),
            AddressBarEvent::Trigger { link_url } => (None, link_url, false),
        };

        let link = link_url
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.address_bar.text().to_owned());

        let mut navigated = false;
        if !link.is_empty() && key_code.is_none_or(|code| code == ENTER_KEY_CODE) {
            self.navigate(&link);
            navigated = true;
        }

        if is_submit {
            self.address_bar.reset_scroll();
        }

        EventOutcome {
            navigated,
            suppress_default: is_submit,
        }
    }
}
