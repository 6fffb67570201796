//! Viewer boundary protocol: typed messages and the framed channel
//! between the browser core and the rendering surface.

use ps_core::RelayError;
use ps_core::RelayResult;
use std::sync::mpsc;
use std::time::Duration;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
const FRAME_PREFIX_BYTES: usize = 4;
const MESSAGE_TAG_PAYLOAD: u8 = 1;
const MESSAGE_TAG_SPINNER: u8 = 2;
const MESSAGE_TAG_NAVIGATE: u8 = 3;

/// Typed payload kinds delivered to the viewer.
///
/// `Reset` is the empty kind/value instruction that clears the surface
/// before a new navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Document,
    Styles,
    Img,
    Audio,
    Video,
    Resource,
    Href,
    Reset,
}

impl PayloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Styles => "styles",
            Self::Img => "img",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Resource => "resource",
            Self::Href => "href",
            Self::Reset => "",
        }
    }

    pub fn from_kind_name(value: &str) -> Option<Self> {
        match value {
            "document" => Some(Self::Document),
            "styles" => Some(Self::Styles),
            "img" => Some(Self::Img),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "resource" => Some(Self::Resource),
            "href" => Some(Self::Href),
            "" => Some(Self::Reset),
            _ => None,
        }
    }
}

/// Outbound message: the sole unit crossing the viewer boundary.
///
/// Every message carries the relay endpoint so the viewer can proxify
/// references it discovers while rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerMessage {
    pub proxy_url: String,
    pub kind: PayloadKind,
    pub value: String,
}

impl ViewerMessage {
    pub fn new(proxy_url: impl Into<String>, kind: PayloadKind, value: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            kind,
            value: value.into(),
        }
    }

    /// The empty-payload reset instruction.
    pub fn reset(proxy_url: impl Into<String>) -> Self {
        Self::new(proxy_url, PayloadKind::Reset, "")
    }
}

/// Spinner control positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinnerSwitch {
    On,
    Off,
}

/// Inbound instructions from the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Force the load indicator without navigating.
    Spinner(SpinnerSwitch),
    /// Navigate to a link discovered by the viewer, with an optional
    /// explicit media-type hint.
    Navigate {
        media_type: Option<String>,
        link_url: String,
    },
}

/// Channel endpoint roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Browser,
    Viewer,
}

impl ChannelRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Viewer => "viewer",
        }
    }
}

/// Framing policy for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub role: ChannelRole,
    pub max_message_bytes: usize,
}

impl ChannelConfig {
    pub fn sized(role: ChannelRole) -> RelayResult<Self> {
        let config = Self {
            role,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.max_message_bytes == 0 {
            return Err(RelayError::new(
                "ipc.max_message_bytes_invalid",
                "channel max_message_bytes must be greater than zero",
            ));
        }

        if self.max_message_bytes > (64 * 1024 * 1024) {
            return Err(RelayError::new(
                "ipc.max_message_bytes_too_large",
                "channel max_message_bytes exceeds hard limit (64 MiB)",
            ));
        }

        Ok(())
    }
}

/// In-memory endpoint applying framing and message-size checks.
pub struct ViewerEndpoint {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    config: ChannelConfig,
}

impl ViewerEndpoint {
    pub fn role(&self) -> ChannelRole {
        self.config.role
    }

    pub fn send(&self, payload: &[u8]) -> RelayResult<()> {
        let frame = encode_frame(payload, self.config.max_message_bytes)?;
        self.tx.send(frame).map_err(|error| {
            RelayError::new(
                "ipc.send_failed",
                format!(
                    "failed to send message from {} endpoint: {error}",
                    self.config.role.as_str()
                ),
            )
        })
    }

    pub fn recv_timeout(&self, timeout: Duration) -> RelayResult<Vec<u8>> {
        let frame = self.rx.recv_timeout(timeout).map_err(|error| {
            RelayError::new(
                "ipc.recv_failed",
                format!(
                    "failed to receive message for {} endpoint: {error}",
                    self.config.role.as_str()
                ),
            )
        })?;
        decode_frame(&frame, self.config.max_message_bytes)
    }
}

/// Creates the paired browser/viewer endpoints.
pub fn viewer_channel_pair(
    browser: ChannelConfig,
    viewer: ChannelConfig,
) -> RelayResult<(ViewerEndpoint, ViewerEndpoint)> {
    browser.validate()?;
    viewer.validate()?;

    let (browser_to_viewer_tx, browser_to_viewer_rx) = mpsc::channel();
    let (viewer_to_browser_tx, viewer_to_browser_rx) = mpsc::channel();

    Ok((
        ViewerEndpoint {
            tx: browser_to_viewer_tx,
            rx: viewer_to_browser_rx,
            config: browser,
        },
        ViewerEndpoint {
            tx: viewer_to_browser_tx,
            rx: browser_to_viewer_rx,
            config: viewer,
        },
    ))
}

/// Encodes a payload as a length-prefixed frame.
pub fn encode_frame(payload: &[u8], max_message_bytes: usize) -> RelayResult<Vec<u8>> {
    if payload.len() > max_message_bytes {
        return Err(RelayError::new(
            "ipc.message_too_large",
            format!(
                "payload exceeds max_message_bytes ({} > {})",
                payload.len(),
                max_message_bytes
            ),
        ));
    }

    let len_u32 = u32::try_from(payload.len()).map_err(|_| {
        RelayError::new(
            "ipc.message_too_large",
            "payload length does not fit in 32-bit frame prefix",
        )
    })?;

    let mut out = Vec::with_capacity(FRAME_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&len_u32.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes a length-prefixed frame and validates payload size.
pub fn decode_frame(frame: &[u8], max_message_bytes: usize) -> RelayResult<Vec<u8>> {
    if frame.len() < FRAME_PREFIX_BYTES {
        return Err(RelayError::new(
            "ipc.frame_too_short",
            "frame is shorter than the 4-byte length prefix",
        ));
    }

    let mut len_bytes = [0_u8; FRAME_PREFIX_BYTES];
    len_bytes.copy_from_slice(&frame[..FRAME_PREFIX_BYTES]);
    let payload_len = u32::from_be_bytes(len_bytes) as usize;
    if payload_len > max_message_bytes {
        return Err(RelayError::new(
            "ipc.message_too_large",
            format!(
                "decoded payload exceeds max_message_bytes ({payload_len} > {max_message_bytes})"
            ),
        ));
    }

    let expected = FRAME_PREFIX_BYTES + payload_len;
    if frame.len() != expected {
        return Err(RelayError::new(
            "ipc.frame_length_mismatch",
            format!(
                "frame length mismatch: expected {expected} bytes, got {}",
                frame.len()
            ),
        ));
    }

    Ok(frame[FRAME_PREFIX_BYTES..].to_vec())
}

/// Encodes an outbound viewer message as a framed payload.
pub fn encode_viewer_message(
    message: &ViewerMessage,
    max_message_bytes: usize,
) -> RelayResult<Vec<u8>> {
    let mut payload = Vec::with_capacity(1 + 1 + 8 + message.proxy_url.len() + message.value.len());
    payload.push(MESSAGE_TAG_PAYLOAD);
    payload.push(encode_kind(message.kind));
    write_string_u32(&mut payload, &message.proxy_url)?;
    write_string_u32(&mut payload, &message.value)?;
    encode_frame(&payload, max_message_bytes)
}

/// Decodes a framed outbound viewer message.
pub fn decode_viewer_message(frame: &[u8], max_message_bytes: usize) -> RelayResult<ViewerMessage> {
    let payload = decode_frame(frame, max_message_bytes)?;
    let mut offset = 0_usize;

    let tag = read_u8(&payload, &mut offset, "tag")?;
    if tag != MESSAGE_TAG_PAYLOAD {
        return Err(RelayError::new(
            "ipc.message_tag_unknown",
            format!("expected payload tag, got `{tag}`"),
        ));
    }

    let kind = decode_kind(read_u8(&payload, &mut offset, "kind")?)?;
    let proxy_url = read_string_u32(&payload, &mut offset, "proxy_url")?;
    let value = read_string_u32(&payload, &mut offset, "value")?;
    ensure_consumed(&payload, offset)?;

    Ok(ViewerMessage {
        proxy_url,
        kind,
        value,
    })
}

/// Encodes an inbound control message as a framed payload.
pub fn encode_control_message(
    message: &ControlMessage,
    max_message_bytes: usize,
) -> RelayResult<Vec<u8>> {
    let payload = match message {
        ControlMessage::Spinner(switch) => {
            vec![
                MESSAGE_TAG_SPINNER,
                match switch {
                    SpinnerSwitch::On => 1,
                    SpinnerSwitch::Off => 0,
                },
            ]
        }
        ControlMessage::Navigate {
            media_type,
            link_url,
        } => {
            let mut out = Vec::with_capacity(2 + link_url.len());
            out.push(MESSAGE_TAG_NAVIGATE);
            match media_type {
                Some(hint) => {
                    out.push(1);
                    write_string_u32(&mut out, hint)?;
                }
                None => out.push(0),
            }
            write_string_u32(&mut out, link_url)?;
            out
        }
    };

    encode_frame(&payload, max_message_bytes)
}

/// Decodes a framed inbound control message.
pub fn decode_control_message(
    frame: &[u8],
    max_message_bytes: usize,
) -> RelayResult<ControlMessage> {
    let payload = decode_frame(frame, max_message_bytes)?;
    let mut offset = 0_usize;

    let tag = read_u8(&payload, &mut offset, "tag")?;
    let message = match tag {
        MESSAGE_TAG_SPINNER => {
            let switch = match read_u8(&payload, &mut offset, "spinner")? {
                0 => SpinnerSwitch::Off,
                1 => SpinnerSwitch::On,
                other => {
                    return Err(RelayError::new(
                        "ipc.message_field_invalid",
                        format!("invalid spinner position `{other}`; expected 0 or 1"),
                    ));
                }
            };
            ControlMessage::Spinner(switch)
        }
        MESSAGE_TAG_NAVIGATE => {
            let media_type = match read_u8(&payload, &mut offset, "media_type_flag")? {
                0 => None,
                1 => Some(read_string_u32(&payload, &mut offset, "media_type")?),
                other => {
                    return Err(RelayError::new(
                        "ipc.message_field_invalid",
                        format!("invalid media-type flag `{other}`; expected 0 or 1"),
                    ));
                }
            };
            let link_url = read_string_u32(&payload, &mut offset, "link_url")?;
            ControlMessage::Navigate {
                media_type,
                link_url,
            }
        }
        other => {
            return Err(RelayError::new(
                "ipc.message_tag_unknown",
                format!("unknown control message tag `{other}`"),
            ));
        }
    };

    ensure_consumed(&payload, offset)?;
    Ok(message)
}

fn encode_kind(kind: PayloadKind) -> u8 {
    match kind {
        PayloadKind::Reset => 0,
        PayloadKind::Document => 1,
        PayloadKind::Styles => 2,
        PayloadKind::Img => 3,
        PayloadKind::Audio => 4,
        PayloadKind::Video => 5,
        PayloadKind::Resource => 6,
        PayloadKind::Href => 7,
    }
}

fn decode_kind(raw: u8) -> RelayResult<PayloadKind> {
    match raw {
        0 => Ok(PayloadKind::Reset),
        1 => Ok(PayloadKind::Document),
        2 => Ok(PayloadKind::Styles),
        3 => Ok(PayloadKind::Img),
        4 => Ok(PayloadKind::Audio),
        5 => Ok(PayloadKind::Video),
        6 => Ok(PayloadKind::Resource),
        7 => Ok(PayloadKind::Href),
        _ => Err(RelayError::new(
            "ipc.message_kind_invalid",
            format!("invalid payload kind code `{raw}`"),
        )),
    }
}

fn ensure_consumed(payload: &[u8], offset: usize) -> RelayResult<()> {
    if offset != payload.len() {
        return Err(RelayError::new(
            "ipc.message_trailing_bytes",
            format!(
                "message payload has trailing bytes (decoded {offset} of {})",
                payload.len()
            ),
        ));
    }

    Ok(())
}

fn write_string_u32(out: &mut Vec<u8>, value: &str) -> RelayResult<()> {
    let len = u32::try_from(value.len()).map_err(|_| {
        RelayError::new(
            "ipc.message_field_too_large",
            format!("string field exceeds 32-bit size limit ({} bytes)", value.len()),
        )
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn read_u8(payload: &[u8], offset: &mut usize, field: &str) -> RelayResult<u8> {
    if *offset >= payload.len() {
        return Err(RelayError::new(
            "ipc.message_truncated",
            format!("missing `{field}` in message payload"),
        ));
    }

    let value = payload[*offset];
    *offset += 1;
    Ok(value)
}

fn read_u32(payload: &[u8], offset: &mut usize, field: &str) -> RelayResult<u32> {
    let bytes = read_exact(payload, offset, 4, field)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_string_u32(payload: &[u8], offset: &mut usize, field: &str) -> RelayResult<String> {
    let len = read_u32(payload, offset, field)? as usize;
    let bytes = read_exact(payload, offset, len, field)?;
    String::from_utf8(bytes.to_vec()).map_err(|error| {
        RelayError::new(
            "ipc.message_utf8_invalid",
            format!("message field `{field}` is not valid UTF-8: {error}"),
        )
    })
}

fn read_exact<'a>(
    payload: &'a [u8],
    offset: &mut usize,
    len: usize,
    field: &str,
) -> RelayResult<&'a [u8]> {
    let end = offset.saturating_add(len);
    if end > payload.len() {
        return Err(RelayError::new(
            "ipc.message_truncated",
            format!("message payload ended while reading `{field}` (need {len} bytes)"),
        ));
    }

    let out = &payload[*offset..end];
    *offset = end;
    Ok(out)
}
