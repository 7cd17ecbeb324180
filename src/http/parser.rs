//! HTTP response parsing
//!
//! Incremental parser for the response head (status line and headers) and
//! the rules that decide how the body that follows is delimited.

use super::{Error, Headers, Method, Result, Status, Version};

/// Upper bound on status line plus headers
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse HTTP response status line
///
/// Format: VERSION STATUS REASON\r\n
/// Example: HTTP/1.1 200 OK\r\n
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = Version::from_str(parts[0])?;
    let status_code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::InvalidStatus(parts[1].to_string()))?;
    let status = Status::new(status_code)?;
    let reason = match parts.get(2) {
        Some(reason) => reason.trim().to_string(),
        None => String::new(),
    };

    Ok((version, status, reason))
}

/// Status line and headers of a response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: Status,
    pub reason: String,
    pub headers: Headers,
}

/// How the body following a response head is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body at all
    Empty,
    /// Exactly this many bytes
    Length(usize),
    /// Chunked transfer coding
    Chunked,
    /// Everything until the server closes the connection
    UntilClose,
}

impl ResponseHead {
    /// Decide body framing for a response to `method`
    pub fn body_framing(&self, method: Method) -> Result<BodyFraming> {
        if method == Method::Head || self.status.forbids_body() {
            return Ok(BodyFraming::Empty);
        }

        if self.headers.contains("Transfer-Encoding") {
            let last_is_chunked = self
                .headers
                .get_all("Transfer-Encoding")
                .iter()
                .flat_map(|v| v.split(','))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .last()
                .is_some_and(|t| t.eq_ignore_ascii_case("chunked"));
            return Ok(if last_is_chunked {
                BodyFraming::Chunked
            } else {
                BodyFraming::UntilClose
            });
        }

        let mut length = None;
        for value in self.headers.get_all("Content-Length") {
            for part in value.split(',') {
                let part = part.trim();
                let parsed = part
                    .parse::<usize>()
                    .map_err(|_| Error::Parse(format!("Invalid Content-Length: {}", part)))?;
                match length {
                    Some(previous) if previous != parsed => {
                        return Err(Error::Parse(format!(
                            "Conflicting Content-Length values: {} and {}",
                            previous, parsed
                        )));
                    }
                    _ => length = Some(parsed),
                }
            }
        }

        Ok(match length {
            Some(0) => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
            None => BodyFraming::UntilClose,
        })
    }

    /// Whether the server allows the connection to be reused
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http11 => !self.headers.has_token("Connection", "close"),
            Version::Http10 => self.headers.has_token("Connection", "keep-alive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    StatusLine,
    Headers,
    Complete,
}

/// Incremental response head parser
pub struct ResponseParser {
    state: ParserState,
    buffer: Vec<u8>,
    status_line: Option<(Version, Status, String)>,
    headers: Headers,
}

impl ResponseParser {
    pub fn new() -> Self {
        ResponseParser {
            state: ParserState::StatusLine,
            buffer: Vec::new(),
            status_line: None,
            headers: Headers::new(),
        }
    }

    /// Feed data to the parser
    ///
    /// Returns Ok(Some(head)) once the empty line ending the headers has
    /// been seen, Ok(None) if more data is needed. Bytes past the head stay
    /// buffered; fetch them with [`ResponseParser::take_remaining`].
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<ResponseHead>> {
        self.buffer.extend_from_slice(data);

        loop {
            let Some(crlf_pos) = find_crlf(&self.buffer) else {
                if self.buffer.len() > MAX_HEAD_SIZE {
                    return Err(Error::Parse("response head too large".to_string()));
                }
                return Ok(None);
            };

            let line = String::from_utf8_lossy(&self.buffer[..crlf_pos]).into_owned();
            self.buffer.drain(..crlf_pos + 2);

            match self.state {
                ParserState::StatusLine => {
                    self.status_line = Some(parse_status_line(&line)?);
                    self.state = ParserState::Headers;
                }
                ParserState::Headers if line.is_empty() => {
                    let (version, status, reason) = self
                        .status_line
                        .take()
                        .ok_or_else(|| Error::Parse("missing status line".to_string()))?;
                    self.state = ParserState::Complete;
                    return Ok(Some(ResponseHead {
                        version,
                        status,
                        reason,
                        headers: std::mem::take(&mut self.headers),
                    }));
                }
                ParserState::Headers => self.headers.push_parsed(&line)?,
                ParserState::Complete => {
                    return Err(Error::Protocol("parser already complete".to_string()));
                }
            }
        }
    }

    /// Bytes received after the head
    pub fn take_remaining(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Reset the parser for the next response, keeping buffered bytes
    pub fn reset(&mut self) {
        self.state = ParserState::StatusLine;
        self.status_line = None;
        self.headers = Headers::new();
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &[u8]) -> ResponseHead {
        ResponseParser::new().parse(raw).unwrap().unwrap()
    }

    #[test]
    fn test_parse_status_line() {
        let (version, status, reason) = parse_status_line("HTTP/1.1 200 OK").unwrap();
        assert_eq!(version, Version::Http11);
        assert_eq!(status.code(), 200);
        assert_eq!(reason, "OK");

        let (version, status, reason) = parse_status_line("HTTP/1.0 404").unwrap();
        assert_eq!(version, Version::Http10);
        assert_eq!(status.code(), 404);
        assert_eq!(reason, "");

        assert!(matches!(
            parse_status_line("HTTP/1.1 abc OK"),
            Err(Error::InvalidStatus(_))
        ));
        assert!(matches!(
            parse_status_line("HTTP/2 200 OK"),
            Err(Error::InvalidVersion(_))
        ));
    }

    #[test]
    fn test_parser_incremental() {
        let mut parser = ResponseParser::new();

        assert!(parser.parse(b"HTTP/1.1 ").unwrap().is_none());
        assert!(parser.parse(b"200 OK\r\n").unwrap().is_none());
        assert!(parser.parse(b"Content-Type: text/plain\r\n").unwrap().is_none());
        let head = parser
            .parse(b"Content-Length: 4\r\n\r\nTe")
            .unwrap()
            .unwrap();

        assert_eq!(head.status.code(), 200);
        assert_eq!(head.headers.get("content-type"), Some("text/plain"));
        assert_eq!(parser.take_remaining(), b"Te");
    }

    #[test]
    fn test_head_too_large() {
        let mut parser = ResponseParser::new();
        let junk = vec![b'a'; MAX_HEAD_SIZE + 1];
        assert!(parser.parse(&junk).is_err());
    }

    #[test]
    fn test_body_framing() {
        let h = head(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
        assert_eq!(h.body_framing(Method::Get).unwrap(), BodyFraming::Length(5));
        assert_eq!(h.body_framing(Method::Head).unwrap(), BodyFraming::Empty);

        let h = head(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip, chunked\r\nContent-Length: 5\r\n\r\n");
        assert_eq!(h.body_framing(Method::Get).unwrap(), BodyFraming::Chunked);

        let h = head(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\n\r\n");
        assert_eq!(h.body_framing(Method::Get).unwrap(), BodyFraming::UntilClose);

        let h = head(b"HTTP/1.1 204 No Content\r\n\r\n");
        assert_eq!(h.body_framing(Method::Get).unwrap(), BodyFraming::Empty);

        let h = head(b"HTTP/1.0 200 OK\r\n\r\n");
        assert_eq!(h.body_framing(Method::Get).unwrap(), BodyFraming::UntilClose);

        let h = head(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n");
        assert!(h.body_framing(Method::Get).is_err());

        let h = head(b"HTTP/1.1 200 OK\r\nContent-Length: 3, 3\r\n\r\n");
        assert_eq!(h.body_framing(Method::Get).unwrap(), BodyFraming::Length(3));
    }

    #[test]
    fn test_keep_alive() {
        assert!(head(b"HTTP/1.1 200 OK\r\n\r\n").keep_alive());
        assert!(!head(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n").keep_alive());
        assert!(!head(b"HTTP/1.0 200 OK\r\n\r\n").keep_alive());
        assert!(head(b"HTTP/1.0 200 OK\r\nConnection: keep-alive\r\n\r\n").keep_alive());
    }

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"Hello\r\nWorld"), Some(5));
        assert_eq!(find_crlf(b"NoEOL"), None);
        assert_eq!(find_crlf(b"\r\n"), Some(0));
    }
}
