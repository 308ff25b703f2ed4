use std::{
    fmt::{self, Debug, Formatter},
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(feature = "native-tls")]
use native_tls::TlsStream;

use super::TlsConfig;
use crate::{dsn::Network, Context, SMTP_PORT, SUBMISSIONS_PORT};

/// A stream a custom [`Dialer`] can hand over to the client
pub trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// A network stream
pub struct NetworkStream {
    inner: InnerNetworkStream,
}

/// Represents the different types of underlying network streams
// usually only one TLS backend at a time is going to be enabled,
// so clippy::large_enum_variant doesn't make sense here
#[allow(clippy::large_enum_variant)]
enum InnerNetworkStream {
    /// Plain TCP stream
    Tcp(TcpStream),
    /// Plain unix socket
    #[cfg(unix)]
    Unix(UnixStream),
    /// Encrypted TCP stream
    #[cfg(feature = "native-tls")]
    NativeTls(TlsStream<TcpStream>),
    /// Encrypted unix socket
    #[cfg(all(unix, feature = "native-tls"))]
    NativeTlsUnix(TlsStream<UnixStream>),
    /// Stream provided by a custom dialer
    Custom(Box<dyn Stream>),
    /// Can't be built
    None,
}

impl NetworkStream {
    fn new(inner: InnerNetworkStream) -> Self {
        if let InnerNetworkStream::None = inner {
            debug_assert!(false, "InnerNetworkStream::None must never be built");
        }

        NetworkStream { inner }
    }

    /// Wraps a connected TCP stream
    pub fn tcp(stream: TcpStream) -> Self {
        Self::new(InnerNetworkStream::Tcp(stream))
    }

    /// Wraps a connected unix socket
    #[cfg(unix)]
    pub fn unix(stream: UnixStream) -> Self {
        Self::new(InnerNetworkStream::Unix(stream))
    }

    /// Wraps any other kind of stream
    ///
    /// Such a stream can't be upgraded to TLS, and timeouts and shutdown
    /// are left to its owner.
    pub fn custom(stream: Box<dyn Stream>) -> Self {
        Self::new(InnerNetworkStream::Custom(stream))
    }

    /// Returns peer's address
    pub fn peer_addr(&self) -> io::Result<Option<SocketAddr>> {
        match &self.inner {
            InnerNetworkStream::Tcp(s) => s.peer_addr().map(Some),
            #[cfg(feature = "native-tls")]
            InnerNetworkStream::NativeTls(s) => s.get_ref().peer_addr().map(Some),
            #[cfg(unix)]
            InnerNetworkStream::Unix(_) => Ok(None),
            #[cfg(all(unix, feature = "native-tls"))]
            InnerNetworkStream::NativeTlsUnix(_) => Ok(None),
            InnerNetworkStream::Custom(_) => Ok(None),
            InnerNetworkStream::None => Err(none_stream()),
        }
    }

    /// Shutdowns the connection
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match &self.inner {
            InnerNetworkStream::Tcp(s) => s.shutdown(how),
            #[cfg(unix)]
            InnerNetworkStream::Unix(s) => s.shutdown(how),
            #[cfg(feature = "native-tls")]
            InnerNetworkStream::NativeTls(s) => s.get_ref().shutdown(how),
            #[cfg(all(unix, feature = "native-tls"))]
            InnerNetworkStream::NativeTlsUnix(s) => s.get_ref().shutdown(how),
            InnerNetworkStream::Custom(_) | InnerNetworkStream::None => Ok(()),
        }
    }

    /// Upgrades a plaintext stream to TLS
    ///
    /// `domain` is the name checked against the server certificate.
    pub fn upgrade_tls(&mut self, tls_config: &TlsConfig, domain: &str) -> io::Result<()> {
        if self.is_encrypted() {
            return Ok(());
        }

        #[cfg(not(feature = "native-tls"))]
        {
            let _ = (tls_config, domain);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "TLS support is not enabled",
            ))
        }

        #[cfg(feature = "native-tls")]
        {
            let connector = tls_config.connector().map_err(io::Error::other)?;

            self.inner = match std::mem::replace(&mut self.inner, InnerNetworkStream::None) {
                InnerNetworkStream::Tcp(stream) => InnerNetworkStream::NativeTls(
                    connector.connect(domain, stream).map_err(io::Error::other)?,
                ),
                #[cfg(unix)]
                InnerNetworkStream::Unix(stream) => InnerNetworkStream::NativeTlsUnix(
                    connector.connect(domain, stream).map_err(io::Error::other)?,
                ),
                other => {
                    self.inner = other;
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "this stream can't be upgraded to TLS",
                    ));
                }
            };

            Ok(())
        }
    }

    /// Tells if the stream is currently encrypted
    pub fn is_encrypted(&self) -> bool {
        match &self.inner {
            #[cfg(feature = "native-tls")]
            InnerNetworkStream::NativeTls(_) => true,
            #[cfg(all(unix, feature = "native-tls"))]
            InnerNetworkStream::NativeTlsUnix(_) => true,
            _ => false,
        }
    }

    /// Set read timeout for IO calls
    pub fn set_read_timeout(&mut self, duration: Option<Duration>) -> io::Result<()> {
        match &mut self.inner {
            InnerNetworkStream::Tcp(stream) => stream.set_read_timeout(duration),
            #[cfg(unix)]
            InnerNetworkStream::Unix(stream) => stream.set_read_timeout(duration),
            #[cfg(feature = "native-tls")]
            InnerNetworkStream::NativeTls(stream) => stream.get_ref().set_read_timeout(duration),
            #[cfg(all(unix, feature = "native-tls"))]
            InnerNetworkStream::NativeTlsUnix(stream) => {
                stream.get_ref().set_read_timeout(duration)
            }
            InnerNetworkStream::Custom(_) => Ok(()),
            InnerNetworkStream::None => Err(none_stream()),
        }
    }

    /// Set write timeout for IO calls
    pub fn set_write_timeout(&mut self, duration: Option<Duration>) -> io::Result<()> {
        match &mut self.inner {
            InnerNetworkStream::Tcp(stream) => stream.set_write_timeout(duration),
            #[cfg(unix)]
            InnerNetworkStream::Unix(stream) => stream.set_write_timeout(duration),
            #[cfg(feature = "native-tls")]
            InnerNetworkStream::NativeTls(stream) => stream.get_ref().set_write_timeout(duration),
            #[cfg(all(unix, feature = "native-tls"))]
            InnerNetworkStream::NativeTlsUnix(stream) => {
                stream.get_ref().set_write_timeout(duration)
            }
            InnerNetworkStream::Custom(_) => Ok(()),
            InnerNetworkStream::None => Err(none_stream()),
        }
    }
}

impl Debug for NetworkStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            InnerNetworkStream::Tcp(_) => "Tcp",
            #[cfg(unix)]
            InnerNetworkStream::Unix(_) => "Unix",
            #[cfg(feature = "native-tls")]
            InnerNetworkStream::NativeTls(_) => "NativeTls",
            #[cfg(all(unix, feature = "native-tls"))]
            InnerNetworkStream::NativeTlsUnix(_) => "NativeTlsUnix",
            InnerNetworkStream::Custom(_) => "Custom",
            InnerNetworkStream::None => "None",
        };
        f.debug_tuple("NetworkStream").field(&kind).finish()
    }
}

impl Read for NetworkStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            InnerNetworkStream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            InnerNetworkStream::Unix(s) => s.read(buf),
            #[cfg(feature = "native-tls")]
            InnerNetworkStream::NativeTls(s) => s.read(buf),
            #[cfg(all(unix, feature = "native-tls"))]
            InnerNetworkStream::NativeTlsUnix(s) => s.read(buf),
            InnerNetworkStream::Custom(s) => s.read(buf),
            InnerNetworkStream::None => Err(none_stream()),
        }
    }
}

impl Write for NetworkStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            InnerNetworkStream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            InnerNetworkStream::Unix(s) => s.write(buf),
            #[cfg(feature = "native-tls")]
            InnerNetworkStream::NativeTls(s) => s.write(buf),
            #[cfg(all(unix, feature = "native-tls"))]
            InnerNetworkStream::NativeTlsUnix(s) => s.write(buf),
            InnerNetworkStream::Custom(s) => s.write(buf),
            InnerNetworkStream::None => Err(none_stream()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            InnerNetworkStream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            InnerNetworkStream::Unix(s) => s.flush(),
            #[cfg(feature = "native-tls")]
            InnerNetworkStream::NativeTls(s) => s.flush(),
            #[cfg(all(unix, feature = "native-tls"))]
            InnerNetworkStream::NativeTlsUnix(s) => s.flush(),
            InnerNetworkStream::Custom(s) => s.flush(),
            InnerNetworkStream::None => Err(none_stream()),
        }
    }
}

fn none_stream() -> io::Error {
    debug_assert!(false, "InnerNetworkStream::None should never be used");
    io::Error::new(io::ErrorKind::NotConnected, "stream is not connected")
}

/// Opens the transport of a session
///
/// The default implementation is [`TcpDialer`]. Other implementations can
/// route connections through a proxy, or hand over in-memory streams in
/// tests.
pub trait Dialer: Send + Sync {
    /// Connects to `address` over `network`
    ///
    /// When `tls` is set the handshake is part of the dial (implicit TLS),
    /// and the returned stream must be encrypted.
    fn dial(
        &self,
        ctx: &Context,
        network: Network,
        address: &str,
        tls: Option<&TlsConfig>,
    ) -> io::Result<NetworkStream>;

    /// Upgrades a plaintext stream after `STARTTLS` was accepted
    fn upgrade(
        &self,
        stream: &mut NetworkStream,
        tls: &TlsConfig,
        domain: &str,
    ) -> io::Result<()> {
        stream.upgrade_tls(tls, domain)
    }
}

/// Dials TCP and unix sockets from the standard library
///
/// An address without port gets [`SUBMISSIONS_PORT`] for implicit TLS and
/// [`SMTP_PORT`] otherwise. The time left in the [`Context`] bounds each
/// TCP connection attempt and the implicit TLS handshake. Connecting a unix
/// socket can't be interrupted, the context is checked before and after.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(
        &self,
        ctx: &Context,
        network: Network,
        address: &str,
        tls: Option<&TlsConfig>,
    ) -> io::Result<NetworkStream> {
        let (host, port) = split_address(address);

        let mut stream = match network {
            Network::Unix => dial_unix(ctx, address)?,
            Network::Tcp | Network::Tcp4 | Network::Tcp6 => {
                let default_port = if tls.is_some() {
                    SUBMISSIONS_PORT
                } else {
                    SMTP_PORT
                };
                dial_tcp(ctx, network, (host, port.unwrap_or(default_port)))?
            }
        };

        if let Some(tls) = tls {
            // session timeouts are only set once the dial returns
            let timeout = ctx
                .remaining()
                .map(|remaining| remaining.max(Duration::from_millis(1)));
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
            stream.upgrade_tls(tls, tls.domain(host))?;
            check_context(ctx)?;
        }

        Ok(stream)
    }
}

fn dial_tcp(ctx: &Context, network: Network, server: (&str, u16)) -> io::Result<NetworkStream> {
    let mut last_err = None;

    let addrs = server.to_socket_addrs()?.filter(|addr| match network {
        Network::Tcp4 => addr.is_ipv4(),
        Network::Tcp6 => addr.is_ipv6(),
        Network::Tcp | Network::Unix => true,
    });

    for addr in addrs {
        check_context(ctx)?;

        let connected = match ctx.remaining() {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match connected {
            Ok(stream) => return Ok(NetworkStream::tcp(stream)),
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("could not resolve {} to any {network} address", server.0),
        )
    }))
}

#[cfg(unix)]
fn dial_unix(ctx: &Context, path: &str) -> io::Result<NetworkStream> {
    check_context(ctx)?;
    let stream = UnixStream::connect(path)?;
    check_context(ctx)?;
    Ok(NetworkStream::unix(stream))
}

#[cfg(not(unix))]
fn dial_unix(_ctx: &Context, _path: &str) -> io::Result<NetworkStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "unix sockets are not supported on this platform",
    ))
}

/// Fails with `TimedOut` once `ctx` is cancelled or past its deadline
fn check_context(ctx: &Context) -> io::Result<()> {
    ctx.check()
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "context cancelled or expired"))
}

/// Splits a dial address into host and optional port
///
/// Unbracketed IPv6 literals have no port.
fn split_address(address: &str) -> (&str, Option<u16>) {
    if let Some(bracketed) = address.strip_prefix('[') {
        if let Some((host, rest)) = bracketed.split_once(']') {
            return (host, rest.strip_prefix(':').and_then(|p| p.parse().ok()));
        }
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (address, None),
        },
        _ => (address, None),
    }
}

#[cfg(test)]
mod test {
    use std::{net::TcpListener, time::Instant};

    use super::*;

    #[test]
    fn split_addresses() {
        assert_eq!(split_address("mail.example.com"), ("mail.example.com", None));
        assert_eq!(
            split_address("mail.example.com:587"),
            ("mail.example.com", Some(587))
        );
        assert_eq!(split_address("[::1]:25"), ("::1", Some(25)));
        assert_eq!(split_address("[::1]"), ("::1", None));
        assert_eq!(split_address("2001:db8::1"), ("2001:db8::1", None));
        assert_eq!(split_address("/run/smtp.sock"), ("/run/smtp.sock", None));
    }

    #[test]
    fn dial_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let stream = TcpDialer
            .dial(&Context::background(), Network::Tcp4, &address, None)
            .unwrap();
        assert!(!stream.is_encrypted());
        assert_eq!(stream.peer_addr().unwrap(), listener.local_addr().ok());
    }

    #[test]
    fn dial_filters_address_family() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();

        assert!(TcpDialer
            .dial(&Context::background(), Network::Tcp6, &address, None)
            .is_err());
    }

    #[test]
    fn dial_respects_cancelled_context() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let ctx = Context::background();
        ctx.cancel_handle().cancel();
        let err = TcpDialer
            .dial(&ctx, Network::Tcp, &address, None)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[cfg(feature = "native-tls")]
    #[test]
    fn tls_handshake_bounded_by_context() {
        // the connection is accepted by the kernel but nobody ever answers
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let ctx = Context::background().with_timeout(Duration::from_millis(300));
        let started = Instant::now();
        let err = TcpDialer
            .dial(&ctx, Network::Tcp, &address, Some(&TlsConfig::new()))
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn unix_dial_respects_cancelled_context() {
        let ctx = Context::background();
        ctx.cancel_handle().cancel();
        let err = TcpDialer
            .dial(&ctx, Network::Unix, "/nonexistent/postern.sock", None)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[cfg(unix)]
    #[test]
    fn dial_missing_unix_socket() {
        assert!(TcpDialer
            .dial(
                &Context::background(),
                Network::Unix,
                "/nonexistent/postern.sock",
                None
            )
            .is_err());
    }
}
