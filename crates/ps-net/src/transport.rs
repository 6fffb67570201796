//! Transport contracts: name resolution plus TCP connection setup.

use ps_core::RelayError;
use ps_core::RelayResult;
use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::time::Duration;

/// Trait-object-safe stream handed to the fetch client.
pub trait IoStream: Read + Write {}
impl<T> IoStream for T where T: Read + Write {}

pub type BoxedIoStream = Box<dyn IoStream>;

/// Opens TCP connections for the fetch client.
pub trait Transport {
    fn connect(&self, host: &str, port: u16, timeout: Duration) -> RelayResult<TcpStream>;
}

/// OS resolver + standard library TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn connect(&self, host: &str, port: u16, timeout: Duration) -> RelayResult<TcpStream> {
        let query = format!("{host}:{port}");
        let addresses: Vec<_> = query
            .to_socket_addrs()
            .map_err(|error| {
                RelayError::new(
                    "net.transport.resolve_failed",
                    format!("failed to resolve `{query}`: {error}"),
                )
            })?
            .collect();

        let mut last_error: Option<RelayError> = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(stream) => {
                    configure_stream(&stream, timeout)?;
                    return Ok(stream);
                }
                Err(error) => {
                    last_error = Some(RelayError::new(
                        "net.transport.connect_failed",
                        format!("failed to connect to `{address}`: {error}"),
                    ));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RelayError::new(
                "net.transport.no_addresses",
                format!("resolver returned no addresses for `{query}`"),
            )
        }))
    }
}

fn configure_stream(stream: &TcpStream, timeout: Duration) -> RelayResult<()> {
    stream.set_nodelay(true).map_err(|error| {
        RelayError::new(
            "net.transport.nodelay_failed",
            format!("failed to enable TCP_NODELAY: {error}"),
        )
    })?;

    stream.set_read_timeout(Some(timeout)).map_err(|error| {
        RelayError::new(
            "net.transport.read_timeout_failed",
            format!("failed to set read timeout: {error}"),
        )
    })?;

    stream.set_write_timeout(Some(timeout)).map_err(|error| {
        RelayError::new(
            "net.transport.write_timeout_failed",
            format!("failed to set write timeout: {error}"),
        )
    })
}
