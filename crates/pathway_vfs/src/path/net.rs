use std::io;
use std::time::{Duration, SystemTime};

use chrono::DateTime;
use tracing::{debug, instrument};

use pathway_base::{PathwayError, PathwayResult};

use crate::stream::{
    Connection, HttpMethod, HttpRequest, HttpTransport, OpenMode, SocketTransport, Stream,
    connect,
};

use super::backend::Backend;
use super::normalize::escape_url;
use super::{FileType, Path, PathKind, PathStat};

pub(crate) const HTTP_PORT: u16 = 80;
pub(crate) const HTTPS_PORT: u16 = 443;

/// Host and port of a network path. IPv6 hosts are stored without brackets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetAddress {
    pub host: String,
    pub port: u16,
}

impl NetAddress {
    /// `host[:port]`, leaving out the port when it equals `default_port`.
    pub fn authority(&self, default_port: Option<u16>) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if default_port == Some(self.port) {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

/// Parses `[user@]host[:port]`. A port is required when there is no default.
pub(crate) fn parse_authority(
    authority: &str,
    default_port: Option<u16>,
    user_path: &str,
) -> PathwayResult<NetAddress> {
    let bad = |reason: &str| Box::new(PathwayError::resolution(user_path, reason));
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    let (host, port) = match authority.strip_prefix('[') {
        Some(bracketed) => {
            let (host, rest) = bracketed
                .split_once(']')
                .ok_or_else(|| bad("unterminated ipv6 host"))?;
            let port = match rest {
                "" => None,
                rest => Some(rest.strip_prefix(':').ok_or_else(|| bad("bad port"))?),
            };
            (host, port)
        }
        None => match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        },
    };
    if host.is_empty() {
        return Err(bad("bad host"));
    }
    let port = match port {
        None | Some("") => default_port.ok_or_else(|| bad("missing port"))?,
        Some(port) => port.parse::<u16>().map_err(|_| bad("bad port"))?,
    };
    Ok(NetAddress {
        host: host.to_ascii_lowercase(),
        port,
    })
}

fn millis_attribute(path: &Path, name: &str) -> Option<Duration> {
    let value = path.attribute(name)?;
    match value.trim().parse::<u64>() {
        Ok(millis) => Some(Duration::from_millis(millis)),
        Err(_) => {
            debug!(attribute = name, value, "ignoring malformed timeout attribute");
            None
        }
    }
}

/// Attributes consumed by the connection rather than sent as request headers.
const CONNECTION_ATTRIBUTES: [&str; 2] = ["connect-timeout", "read-timeout"];

/* 📖 # How network paths are opened

Every open is a fresh connection: tcp paths become a duplex socket stream, http paths an
exchange with `Connection: close`. An https path needs a TLS connector installed in the
runtime and fails as Unsupported without one, before any connection is attempted. Path
attributes other than the timeouts become request headers.
*/

/// Backend for http, https and tcp paths.
#[derive(Debug)]
pub(crate) struct NetworkBackend;

impl NetworkBackend {
    fn connect(&self, path: &Path, address: &NetAddress, tls: bool) -> PathwayResult<Stream> {
        let context = path.context();
        let connector = match (tls, &context.tls) {
            (true, Some(connector)) => Some(connector.clone()),
            (true, None) => {
                return Err(Box::new(PathwayError::unsupported(
                    "https without a tls connector",
                    path.url(),
                )));
            }
            (false, _) => None,
        };
        let io_error = |e: io::Error| {
            debug!(error = %e, "connection failed");
            Box::new(PathwayError::io(path.url(), e))
        };
        let connect_timeout = millis_attribute(path, "connect-timeout")
            .unwrap_or(context.network.connect_timeout);
        let read_timeout =
            millis_attribute(path, "read-timeout").or(context.network.read_timeout);
        let socket = connect(&address.host, address.port, connect_timeout).map_err(io_error)?;
        let connection: Box<dyn Connection> = match connector {
            Some(connector) => connector.connect(&address.host, socket).map_err(io_error)?,
            None => Box::new(socket),
        };
        let transport =
            SocketTransport::new(connection, path.url(), read_timeout).map_err(io_error)?;
        Ok(Stream::new(
            transport,
            context.pool.clone(),
            context.stream.clone(),
        ))
    }

    /// Connects and prepares an http exchange; the request goes out on first read.
    #[instrument(skip(self), fields(path = %path))]
    fn exchange(&self, path: &Path, method: HttpMethod) -> PathwayResult<Stream> {
        let (address, tls, default_port) = match path.kind() {
            PathKind::Http(address) => (address, false, HTTP_PORT),
            PathKind::Https(address) => (address, true, HTTPS_PORT),
            _ => return Err(Box::new(PathwayError::unsupported(method.as_str(), path.url()))),
        };
        let inner = self.connect(path, address, tls)?;
        let context = path.context();
        let mut target = escape_url(&path.full_path());
        if let Some(query) = path.query() {
            target.push('?');
            target.push_str(query);
        }
        let request = HttpRequest {
            method,
            target,
            host: address.authority(Some(default_port)),
            user_agent: context.network.user_agent.clone(),
        };
        let transport = HttpTransport::new(inner, path.url(), request, context.pool.clone());
        let mut stream = Stream::new(transport, context.pool.clone(), context.stream.clone());
        for (name, value) in path.attributes() {
            if !CONNECTION_ATTRIBUTES.contains(&name.as_str()) {
                stream.set_attribute(name, value)?;
            }
        }
        Ok(stream)
    }

    fn http_stat(&self, path: &Path) -> PathwayResult<PathStat> {
        if let Some(stat) = path.cached_stat() {
            return Ok(stat);
        }
        let mut stream = self.exchange(path, HttpMethod::Head)?;
        let status = stream
            .attribute("status")?
            .and_then(|status| status.parse::<u16>().ok())
            .unwrap_or(0);
        let stat = if status == 200 {
            let length = stream
                .attribute("content-length")?
                .and_then(|length| length.trim().parse::<u64>().ok())
                .unwrap_or(0);
            let modified = stream
                .attribute("last-modified")?
                .and_then(|date| parse_http_date(&date));
            PathStat {
                file_type: FileType::File,
                length,
                modified,
                readable: true,
                writable: true,
            }
        } else {
            PathStat::missing()
        };
        stream.close()?;
        debug!(status, exists = stat.exists(), "http stat");
        path.store_stat(stat.clone());
        Ok(stat)
    }
}

fn parse_http_date(date: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(date.trim())
        .ok()
        .map(SystemTime::from)
}

impl Backend for NetworkBackend {
    fn stat(&self, path: &Path) -> PathwayResult<PathStat> {
        match path.kind() {
            PathKind::Tcp(_) => Ok(PathStat {
                file_type: FileType::Other,
                length: 0,
                modified: None,
                readable: true,
                writable: true,
            }),
            _ => self.http_stat(path),
        }
    }

    #[instrument(skip(self), fields(path = %path))]
    fn open(&self, path: &Path, mode: OpenMode) -> PathwayResult<Stream> {
        match path.kind() {
            PathKind::Tcp(address) => self.connect(path, address, false),
            _ => {
                let method = match mode {
                    OpenMode::Read => HttpMethod::Get,
                    OpenMode::Write | OpenMode::Append | OpenMode::ReadWrite => HttpMethod::Post,
                };
                self.exchange(path, method)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_parsing() {
        let address = parse_authority("Example.COM:8080", Some(80), "http://x").unwrap();
        assert_eq!(address.host, "example.com");
        assert_eq!(address.port, 8080);
        assert_eq!(address.authority(Some(80)), "example.com:8080");

        let address = parse_authority("user@host", Some(80), "http://x").unwrap();
        assert_eq!(address.authority(Some(80)), "host");

        let address = parse_authority("[::1]:9000", None, "tcp://x").unwrap();
        assert_eq!(address.host, "::1");
        assert_eq!(address.authority(None), "[::1]:9000");

        let address = parse_authority("host:", Some(443), "https://x").unwrap();
        assert_eq!(address.port, 443);
    }

    #[test]
    fn test_malformed_authorities_are_rejected() {
        for (authority, default_port) in [
            ("", Some(80)),
            (":80", Some(80)),
            ("host:http", Some(80)),
            ("host:70000", Some(80)),
            ("[::1", Some(80)),
            ("host", None),
        ] {
            let error = parse_authority(authority, default_port, "u").unwrap_err();
            assert!(
                matches!(
                    error.kind(),
                    pathway_base::ErrorKind::Resolution { .. }
                ),
                "{} should be rejected",
                authority
            );
        }
    }

    #[test]
    fn test_http_dates() {
        let modified = parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        let seconds = modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(seconds, 1_445_412_480);
        assert!(parse_http_date("yesterday").is_none());
    }
}
