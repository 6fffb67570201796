//! Blocking HTTP/1.1 GET client used for relay fetches.
//!
//! Every fetch is a single-shot request: `Connection: close` goes out
//! with the GET, the whole response is drained to EOF, and framing
//! (Content-Length, chunked, or close-delimited) plus content encoding
//! are decoded from the buffered bytes.

use crate::http::GetRequest;
use crate::http::Header;
use crate::http::HttpResponse;
use crate::http::HttpStatusCode;
use crate::tls::RustlsConnector;
use crate::tls::TlsConnector;
use crate::transport::BoxedIoStream;
use crate::transport::TcpTransport;
use crate::transport::Transport;
use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use ps_core::RelayError;
use ps_core::RelayResult;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::time::Duration;

const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Relay fetch client with pluggable transport and TLS connector.
pub struct RelayClient<T = TcpTransport, C = RustlsConnector>
where
    T: Transport,
    C: TlsConnector,
{
    transport: T,
    tls: C,
    timeout: Duration,
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::with_parts(TcpTransport, RustlsConnector::default())
    }
}

impl<T, C> RelayClient<T, C>
where
    T: Transport,
    C: TlsConnector,
{
    pub fn with_parts(transport: T, tls: C) -> Self {
        Self {
            transport,
            tls,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Fetches a URL with the default GET headers.
    pub fn get(&self, url: &str) -> RelayResult<HttpResponse> {
        let url = crate::http::FetchUrl::parse(url)?;
        let request = GetRequest::new(url)?;
        self.execute(&request)
    }

    pub fn execute(&self, request: &GetRequest) -> RelayResult<HttpResponse> {
        tracing::debug!(url = request.url.as_str(), "issuing relay fetch");
        let mut stream = self.open_stream(request)?;
        write_request(&mut *stream, request)?;

        let mut raw = Vec::new();
        stream
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut raw)
            .map_err(|error| {
                RelayError::new(
                    "net.http.read_failed",
                    format!("failed while reading relay response: {error}"),
                )
            })?;

        parse_response(&raw)
    }

    fn open_stream(&self, request: &GetRequest) -> RelayResult<BoxedIoStream> {
        let url = &request.url;
        let stream = self
            .transport
            .connect(url.host(), url.port(), self.timeout)?;

        if url.is_secure() {
            self.tls.connect(stream, url.host())
        } else {
            Ok(Box::new(stream))
        }
    }
}

fn write_request(stream: &mut dyn Write, request: &GetRequest) -> RelayResult<()> {
    let mut encoded = Vec::new();
    encoded.extend_from_slice(b"GET ");
    encoded.extend_from_slice(request.request_target().as_bytes());
    encoded.extend_from_slice(b" HTTP/1.1\r\n");

    for header in &request.headers {
        encoded.extend_from_slice(header.name.as_bytes());
        encoded.extend_from_slice(b": ");
        encoded.extend_from_slice(header.value.as_bytes());
        encoded.extend_from_slice(b"\r\n");
    }
    encoded.extend_from_slice(b"\r\n");

    stream.write_all(&encoded).map_err(|error| {
        RelayError::new(
            "net.http.write_failed",
            format!("failed to write relay request bytes: {error}"),
        )
    })?;
    stream.flush().map_err(|error| {
        RelayError::new(
            "net.http.flush_failed",
            format!("failed to flush relay request bytes: {error}"),
        )
    })
}

fn parse_response(raw: &[u8]) -> RelayResult<HttpResponse> {
    let head_end = find_header_end(raw).ok_or_else(|| {
        RelayError::new(
            "net.http.head_incomplete",
            "connection closed before the response head completed",
        )
    })?;

    let head_text = std::str::from_utf8(&raw[..head_end]).map_err(|error| {
        RelayError::new(
            "net.http.head_invalid_utf8",
            format!("response head is not valid UTF-8 text: {error}"),
        )
    })?;

    let mut lines = head_text.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| RelayError::new("net.http.status_line_missing", "missing status line"))?;
    let (status, reason) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            RelayError::new(
                "net.http.header_invalid",
                format!("invalid response header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim())?);
    }

    let rest = &raw[head_end..];
    let body = if status_disallows_body(status.as_u16()) {
        Vec::new()
    } else if header_contains(&headers, "transfer-encoding", "chunked") {
        decode_chunked(rest)?
    } else if let Some(declared) = parse_content_length(&headers)? {
        if rest.len() < declared {
            return Err(RelayError::new(
                "net.http.body_truncated",
                format!(
                    "connection closed after {} of {declared} declared body bytes",
                    rest.len()
                ),
            ));
        }
        rest[..declared].to_vec()
    } else {
        // Close-delimited body: everything until EOF.
        rest.to_vec()
    };

    let body = decode_content_encoding(&headers, &body)?;

    Ok(HttpResponse {
        status,
        reason,
        headers,
        body,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> RelayResult<(HttpStatusCode, String)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !matches!(version, "HTTP/1.0" | "HTTP/1.1") {
        return Err(RelayError::new(
            "net.http.version_unsupported",
            format!("unsupported response version in status line `{line}`"),
        ));
    }

    let code_text = parts.next().ok_or_else(|| {
        RelayError::new(
            "net.http.status_line_invalid",
            format!("missing status code in status line `{line}`"),
        )
    })?;
    let code_value = code_text.parse::<u16>().map_err(|error| {
        RelayError::new(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}`: {error}"),
        )
    })?;

    let reason = parts.next().unwrap_or_default().trim().to_owned();
    Ok((HttpStatusCode::new(code_value)?, reason))
}

fn status_disallows_body(status_code: u16) -> bool {
    (100..200).contains(&status_code) || status_code == 204 || status_code == 304
}

fn header_contains(headers: &[Header], name: &str, value: &str) -> bool {
    headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case(name)
            && header
                .value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case(value))
    })
}

fn parse_content_length(headers: &[Header]) -> RelayResult<Option<usize>> {
    let mut value: Option<usize> = None;
    for header in headers {
        if !header.name.eq_ignore_ascii_case("content-length") {
            continue;
        }

        let parsed = header.value.trim().parse::<usize>().map_err(|error| {
            RelayError::new(
                "net.http.content_length_invalid",
                format!("invalid Content-Length `{}`: {error}", header.value),
            )
        })?;

        if let Some(existing) = value {
            if existing != parsed {
                return Err(RelayError::new(
                    "net.http.content_length_conflict",
                    "conflicting Content-Length headers in response",
                ));
            }
        } else {
            value = Some(parsed);
        }
    }

    Ok(value)
}

fn decode_chunked(mut rest: &[u8]) -> RelayResult<Vec<u8>> {
    let mut decoded = Vec::new();

    loop {
        let line_end = rest
            .windows(2)
            .position(|window| window == b"\r\n")
            .ok_or_else(|| {
                RelayError::new(
                    "net.http.chunk_line_incomplete",
                    "chunk size line is missing its CRLF terminator",
                )
            })?;

        let size_line = std::str::from_utf8(&rest[..line_end]).map_err(|error| {
            RelayError::new(
                "net.http.chunk_line_invalid_utf8",
                format!("chunk size line is not valid UTF-8: {error}"),
            )
        })?;
        rest = &rest[line_end + 2..];

        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            RelayError::new(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            break;
        }

        if rest.len() < chunk_size + 2 {
            return Err(RelayError::new(
                "net.http.chunk_truncated",
                format!("chunk declared {chunk_size} bytes but fewer remain"),
            ));
        }

        decoded.extend_from_slice(&rest[..chunk_size]);
        if &rest[chunk_size..chunk_size + 2] != b"\r\n" {
            return Err(RelayError::new(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing its trailing CRLF",
            ));
        }
        rest = &rest[chunk_size + 2..];
    }

    Ok(decoded)
}

fn decode_content_encoding(headers: &[Header], body: &[u8]) -> RelayResult<Vec<u8>> {
    let encodings = content_encodings(headers);
    if encodings.is_empty() {
        return Ok(body.to_vec());
    }

    let mut decoded = body.to_vec();
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => decode_gzip(&decoded)?,
            "deflate" => decode_deflate(&decoded)?,
            "br" => decode_brotli(&decoded)?,
            _ => {
                return Err(RelayError::new(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }

    Ok(decoded)
}

fn content_encodings(headers: &[Header]) -> Vec<String> {
    let mut encodings = Vec::new();
    for header in headers {
        if !header.name.eq_ignore_ascii_case("content-encoding") {
            continue;
        }

        for token in header.value.split(',') {
            let value = token.trim().to_ascii_lowercase();
            if !value.is_empty() {
                encodings.push(value);
            }
        }
    }

    encodings
}

fn decode_gzip(body: &[u8]) -> RelayResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(Cursor::new(body));
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|error| {
        RelayError::new(
            "net.http.decode_failed",
            format!("gzip decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}

fn decode_deflate(body: &[u8]) -> RelayResult<Vec<u8>> {
    let mut zlib_decoder = ZlibDecoder::new(Cursor::new(body));
    let mut zlib_decoded = Vec::new();
    if zlib_decoder.read_to_end(&mut zlib_decoded).is_ok() {
        return Ok(zlib_decoded);
    }

    let mut raw_decoder = DeflateDecoder::new(Cursor::new(body));
    let mut raw_decoded = Vec::new();
    raw_decoder.read_to_end(&mut raw_decoded).map_err(|error| {
        RelayError::new(
            "net.http.decode_failed",
            format!("deflate decode failed: {error}"),
        )
    })?;
    Ok(raw_decoded)
}

fn decode_brotli(body: &[u8]) -> RelayResult<Vec<u8>> {
    let mut decoder = Decompressor::new(Cursor::new(body), 4096);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|error| {
        RelayError::new(
            "net.http.decode_failed",
            format!("brotli decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}
