//! Persistent settings and the write-once relay configuration.

use ps_core::RelayError;
use ps_core::RelayResult;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

/// Relay endpoint used when no `proxy` setting has been persisted.
pub const DEFAULT_RELAY_ENDPOINT: &str =
    "https://feedback.googleusercontent.com/gadgets/proxy?container=fbk&url=";

const PROXY_SETTING_KEY: &str = "proxy";

/// Durable key/value settings file.
///
/// Records are stored one per line as hex-encoded key and value
/// separated by a tab, so arbitrary UTF-8 round-trips without escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> RelayResult<Option<String>> {
        let map = read_settings_map(&self.path)?;
        Ok(map.get(key).cloned())
    }

    pub fn set(&self, key: &str, value: &str) -> RelayResult<()> {
        let mut map = read_settings_map(&self.path)?;
        map.insert(key.to_owned(), value.to_owned());
        write_settings_map(&self.path, &map)
    }
}

/// The relay endpoint template.
///
/// Loaded exactly once, at session construction, from the `proxy` key
/// of the settings store; immutable for the rest of the process
/// lifetime (there is no setter and no teardown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    endpoint: String,
}

impl RelayConfig {
    /// Reads the persisted endpoint, falling back to the documented
    /// default when the key (or the whole file) is absent.
    pub fn load(store: &SettingsStore) -> RelayResult<Self> {
        let endpoint = store
            .get(PROXY_SETTING_KEY)?
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RELAY_ENDPOINT.to_owned());
        Ok(Self { endpoint })
    }

    /// Builds a config directly from an endpoint string, bypassing the
    /// store. Intended for embedding and tests.
    pub fn from_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn read_settings_map(path: &Path) -> RelayResult<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(path).map_err(|error| {
        RelayError::new(
            "settings.read_failed",
            format!("failed to read settings file `{}`: {error}", path.display()),
        )
    })?;

    let mut map = BTreeMap::new();
    for (index, line) in content.lines().enumerate() {
        if line.is_empty() {
            continue;
        }

        let (key_hex, value_hex) = line.split_once('\t').ok_or_else(|| {
            RelayError::new(
                "settings.format_invalid",
                format!(
                    "invalid record format at `{}` line {}",
                    path.display(),
                    index + 1
                ),
            )
        })?;

        let key = decode_hex_string(key_hex)?;
        let value = decode_hex_string(value_hex)?;
        map.insert(key, value);
    }

    Ok(map)
}

fn write_settings_map(path: &Path, map: &BTreeMap<String, String>) -> RelayResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            RelayError::new(
                "settings.dir_create_failed",
                format!(
                    "failed to create settings directory `{}`: {error}",
                    parent.display()
                ),
            )
        })?;
    }

    let mut encoded = String::new();
    for (key, value) in map {
        encoded.push_str(&encode_hex_string(key));
        encoded.push('\t');
        encoded.push_str(&encode_hex_string(value));
        encoded.push('\n');
    }

    fs::write(path, encoded).map_err(|error| {
        RelayError::new(
            "settings.write_failed",
            format!("failed to write settings file `{}`: {error}", path.display()),
        )
    })
}

fn encode_hex_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len().saturating_mul(2));
    for byte in value.as_bytes() {
        out.push(hex_char(byte >> 4));
        out.push(hex_char(byte & 0x0f));
    }
    out
}

fn decode_hex_string(value: &str) -> RelayResult<String> {
    if !value.len().is_multiple_of(2) {
        return Err(RelayError::new(
            "settings.hex_invalid",
            "hex field length must be even",
        ));
    }

    let mut bytes = Vec::with_capacity(value.len() / 2);
    let chars: Vec<char> = value.chars().collect();
    let mut index = 0_usize;
    while index < chars.len() {
        let high = decode_hex_nibble(chars[index])?;
        let low = decode_hex_nibble(chars[index + 1])?;
        bytes.push((high << 4) | low);
        index += 2;
    }

    String::from_utf8(bytes).map_err(|error| {
        RelayError::new(
            "settings.utf8_invalid",
            format!("settings field is not valid UTF-8: {error}"),
        )
    })
}

fn hex_char(value: u8) -> char {
    match value {
        0..=9 => (b'0' + value) as char,
        10..=15 => (b'a' + (value - 10)) as char,
        _ => '0',
    }
}

fn decode_hex_nibble(ch: char) -> RelayResult<u8> {
    match ch {
        '0'..='9' => Ok((ch as u8) - b'0'),
        'a'..='f' => Ok((ch as u8) - b'a' + 10),
        'A'..='F' => Ok((ch as u8) - b'A' + 10),
        _ => Err(RelayError::new(
            "settings.hex_invalid",
            format!("invalid hex character `{ch}`"),
        )),
    }
}
