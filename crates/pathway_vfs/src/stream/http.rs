use std::fmt;
use std::io;

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tracing::{debug, trace};

use crate::buffer::{BufferChain, BufferPool};

use super::transport::into_io;
use super::{Stream, Transport};

/* 📖 # How an http exchange becomes a stream

The request is not sent when the stream opens. Headers can still be added through
`set_attribute`, and a POST body accumulates in a buffer chain. The first read or attribute
lookup sends the request line, headers and body in one go. The response head is collected
line by line up to the blank line and handed to httparse; the body is then framed by
content-length, chunked transfer coding, or the connection closing.
*/

/// Request method of an http exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
        }
    }
}

/// Everything needed to write the request head.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Escaped path plus query.
    pub target: String,
    /// Value of the `Host` header.
    pub host: String,
    pub user_agent: String,
}

/// Upper bound on the response head, status line included.
const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;

#[derive(Debug)]
struct Response {
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
}

impl Response {
    /// All values of `name` joined by newlines, `None` when absent.
    fn header(&self, name: &str) -> Option<String> {
        let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
        let values: Vec<&str> = self
            .headers
            .get_all(&name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        (!values.is_empty()).then(|| values.join("\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Body {
    Empty,
    Length(u64),
    Chunked { remaining: u64, pending_crlf: bool },
    UntilClose,
    Done,
}

/// HTTP/1.1 client exchange over a connected stream.
pub struct HttpTransport {
    inner: Stream,
    label: String,
    request: HttpRequest,
    headers: Vec<(String, String)>,
    body: Option<BufferChain>,
    response: Option<Response>,
    reader: Body,
}

impl HttpTransport {
    /// `inner` is a connected stream to the server; `pool` backs the POST body.
    pub fn new(mut inner: Stream, label: String, request: HttpRequest, pool: BufferPool) -> Self {
        inner.set_strict_reads(true);
        let body = (request.method == HttpMethod::Post).then(|| BufferChain::new(pool));
        Self {
            inner,
            label,
            request,
            headers: Vec::new(),
            body,
            response: None,
            reader: Body::Empty,
        }
    }

    fn ensure_response(&mut self) -> io::Result<()> {
        if self.response.is_some() {
            return Ok(());
        }
        self.send_request()?;
        let response = self.read_response_head()?;
        self.reader = self.body_mode(&response);
        debug!(target_name = %self.label, status = response.status.as_u16(), body = ?self.reader, "received response head");
        self.response = Some(response);
        Ok(())
    }

    fn send_request(&mut self) -> io::Result<()> {
        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\n",
            self.request.method.as_str(),
            self.request.target,
            self.request.host,
            self.request.user_agent
        );
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(body) = &self.body {
            head.push_str(&format!("Content-Length: {}\r\n", body.remaining()));
        }
        head.push_str("Connection: close\r\n\r\n");
        trace!(target_name = %self.label, request = %head, "sending request");
        self.inner.write(head.as_bytes()).map_err(into_io)?;

        if let Some(mut body) = self.body.take() {
            let mut chunk = body.pool().allocate();
            loop {
                let n = body.read(chunk.as_mut_slice());
                if n == 0 {
                    break;
                }
                self.inner
                    .write(&chunk.as_mut_slice()[..n])
                    .map_err(into_io)?;
            }
        }
        self.inner.flush().map_err(into_io)
    }

    /// Next raw line including its terminator, `None` at end of stream.
    fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        while let Some(byte) = self.inner.read_byte().map_err(into_io)? {
            line.push(byte);
            if byte == b'\n' {
                return Ok(Some(line));
            }
            if line.len() > MAX_HEAD_BYTES {
                return Err(invalid("response line too long"));
            }
        }
        Ok((!line.is_empty()).then_some(line))
    }

    /// Raw bytes of the next response head, up to and including the blank line.
    fn next_head(&mut self) -> io::Result<Vec<u8>> {
        let mut head = Vec::new();
        loop {
            let Some(line) = self.next_line()? else {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before a response arrived",
                ));
            };
            let blank = line == b"\r\n" || line == b"\n";
            if blank && head.is_empty() {
                continue;
            }
            head.extend_from_slice(&line);
            if blank {
                return Ok(head);
            }
            if head.len() > MAX_HEAD_BYTES {
                return Err(invalid("response head too large"));
            }
        }
    }

    fn read_response_head(&mut self) -> io::Result<Response> {
        loop {
            let head = self.next_head()?;
            let response = parse_head(&head)?;
            if response.status.is_informational() {
                trace!(target_name = %self.label, status = %response.status, "skipping interim response");
                continue;
            }
            return Ok(response);
        }
    }

    fn body_mode(&self, response: &Response) -> Body {
        if self.request.method == HttpMethod::Head
            || response.status.is_informational()
            || response.status == StatusCode::NO_CONTENT
            || response.status == StatusCode::NOT_MODIFIED
        {
            return Body::Empty;
        }
        let chunked = response
            .headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|coding| coding.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return Body::Chunked {
                remaining: 0,
                pending_crlf: false,
            };
        }
        match response
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|length| length.to_str().ok())
            .and_then(|length| length.trim().parse().ok())
        {
            Some(length) => Body::Length(length),
            None => Body::UntilClose,
        }
    }

    fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.reader {
                Body::Empty | Body::Done => return Ok(0),
                Body::UntilClose => return self.inner.read(buf).map_err(into_io),
                Body::Length(remaining) => {
                    if remaining == 0 {
                        return Ok(0);
                    }
                    let wanted = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                    let n = self.inner.read(&mut buf[..wanted]).map_err(into_io)?;
                    self.reader = if n == 0 {
                        Body::Done
                    } else {
                        Body::Length(remaining - n as u64)
                    };
                    return Ok(n);
                }
                Body::Chunked {
                    remaining,
                    pending_crlf,
                } => {
                    if remaining > 0 {
                        let wanted =
                            buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                        let n = self.inner.read(&mut buf[..wanted]).map_err(into_io)?;
                        let left = remaining - n as u64;
                        self.reader = if n == 0 {
                            Body::Done
                        } else {
                            Body::Chunked {
                                remaining: left,
                                pending_crlf: left == 0,
                            }
                        };
                        return Ok(n);
                    }
                    if pending_crlf {
                        self.next_line()?;
                    }
                    self.reader = self.next_chunk()?;
                }
            }
        }
    }

    fn next_chunk(&mut self) -> io::Result<Body> {
        let Some(line) = self.next_line()? else {
            return Ok(Body::Done);
        };
        let size = match httparse::parse_chunk_size(&line) {
            Ok(httparse::Status::Complete((_, size))) => size,
            Ok(httparse::Status::Partial) => return Ok(Body::Done),
            Err(e) => {
                return Err(invalid(format!(
                    "bad chunk size '{}': {:?}",
                    String::from_utf8_lossy(&line).trim_end(),
                    e
                )));
            }
        };
        if size == 0 {
            // trailers end with a blank line
            while let Some(trailer) = self.next_line()? {
                if trailer == b"\r\n" || trailer == b"\n" {
                    break;
                }
            }
            return Ok(Body::Done);
        }
        Ok(Body::Chunked {
            remaining: size,
            pending_crlf: false,
        })
    }

    fn response(&mut self) -> io::Result<&Response> {
        self.ensure_response()?;
        self.response
            .as_ref()
            .ok_or_else(|| io::Error::other("missing response"))
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Parses a complete response head with httparse into owned parts.
fn parse_head(head: &[u8]) -> io::Result<Response> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(invalid("incomplete response head")),
        Err(e) => return Err(invalid(format!("bad response head: {}", e))),
    }
    let code = parsed.code.ok_or_else(|| invalid("missing status code"))?;
    let status = StatusCode::from_u16(code).map_err(|e| invalid(e.to_string()))?;
    let mut map = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| invalid(format!("bad header name '{}': {}", header.name, e)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| invalid(format!("bad value for header '{}': {}", header.name, e)))?;
        map.append(name, value);
    }
    Ok(Response {
        status,
        reason: parsed.reason.unwrap_or_default().to_string(),
        headers: map,
    })
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("target", &self.label)
            .field("method", &self.request.method)
            .field("status", &self.response.as_ref().map(|r| r.status.as_u16()))
            .finish()
    }
}

impl Transport for HttpTransport {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        self.request.method == HttpMethod::Post
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_response()?;
        self.read_body(buf)
    }

    fn available(&mut self) -> io::Result<usize> {
        if self.response.is_none() {
            return Ok(0);
        }
        let buffered = self.inner.buffered();
        Ok(match self.reader {
            Body::Length(remaining) => buffered.min(usize::try_from(remaining).unwrap_or(usize::MAX)),
            Body::Chunked { remaining, .. } => {
                buffered.min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            Body::UntilClose => buffered,
            Body::Empty | Body::Done => 0,
        })
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.body.as_mut() {
            Some(body) => {
                body.append(buf);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "request body already sent",
            )),
        }
    }

    fn is_connection(&self) -> bool {
        true
    }

    fn attribute(&mut self, name: &str) -> io::Result<Option<String>> {
        let response = self.response()?;
        Ok(match name.to_ascii_lowercase().as_str() {
            "status" => Some(response.status.as_u16().to_string()),
            "status-message" => Some(response.reason.clone()),
            name => response.header(name),
        })
    }

    fn attribute_names(&mut self) -> io::Result<Vec<String>> {
        let response = self.response()?;
        let mut names = vec!["status".to_string(), "status-message".to_string()];
        names.extend(response.headers.keys().map(|name| name.as_str().to_string()));
        Ok(names)
    }

    fn set_attribute(&mut self, name: &str, value: &str) -> io::Result<()> {
        if self.response.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "request headers already sent",
            ));
        }
        let name = name.trim();
        if name.eq_ignore_ascii_case("virtual-host") || name.eq_ignore_ascii_case("host") {
            self.request.host = value.to_string();
        } else if name.eq_ignore_ascii_case("user-agent") {
            self.request.user_agent = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close().map_err(into_io)
    }
}
