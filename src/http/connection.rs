//! A single HTTP/1.1 client connection
//!
//! Sends one request at a time over a [`SessionOps`] and reads the response,
//! honouring Content-Length, chunked and read-to-close bodies. The caller
//! learns whether the connection may carry another request.

use super::chunked::ChunkedDecoder;
use super::parser::{BodyFraming, ResponseHead, ResponseParser};
use super::transport::RoundTripError;
use super::{Error, HttpSession, Request, Response, Result, SessionOps};
use bytes::BytesMut;
use std::time::{Duration, Instant};
use tracing::trace;

const READ_CHUNK: usize = 8192;

/// Boxed session so plain and TLS connections share one pool
pub type BoxedSession = Box<dyn SessionOps + Send>;

/// Outcome of a completed exchange
#[derive(Debug)]
pub struct Exchange {
    pub response: Response,
    /// Whether the connection can be returned to the pool
    pub reusable: bool,
}

/// HTTP/1.1 connection
pub struct Connection {
    session: HttpSession<BoxedSession>,
    io_timeout: Option<Duration>,
    idle_since: Instant,
    exchanges: u64,
}

impl Connection {
    /// Wrap an established session; `io_timeout` bounds each read and write
    pub fn new(session: BoxedSession, io_timeout: Option<Duration>) -> Self {
        let mut session = HttpSession::new(session);
        session.set_timeout(io_timeout);
        Connection {
            session,
            io_timeout,
            idle_since: Instant::now(),
            exchanges: 0,
        }
    }

    /// How long the connection has been sitting idle
    pub fn idle_for(&self) -> Duration {
        self.idle_since.elapsed()
    }

    /// Number of exchanges completed on this connection
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    /// Whether an idle connection was closed or poisoned by the peer
    pub fn is_stale(&self) -> bool {
        self.session.is_stale()
    }

    /// Close the underlying session, ignoring errors
    pub fn close(mut self) {
        let _ = self.session.close();
    }

    /// Send `request` and read the complete response
    pub fn send(&mut self, request: &Request) -> std::result::Result<Exchange, RoundTripError> {
        self.session
            .set_timeout(request.timeout().or(self.io_timeout));

        self.session
            .write_all(&request.to_wire())
            .map_err(RoundTripError::from)?;

        let mut parser = ResponseParser::new();
        let head = self.read_head(&mut parser).map_err(RoundTripError::from)?;
        let framing = head.body_framing(request.method()).map_err(RoundTripError::from)?;
        trace!(status = head.status.code(), ?framing, "response head received");

        let leftover = parser.take_remaining();
        let mut body = BytesMut::new();
        let read = match framing {
            BodyFraming::Empty => Ok(leftover.is_empty()),
            BodyFraming::Length(len) => self.read_length(leftover, len, &mut body),
            BodyFraming::Chunked => self.read_chunked(leftover, &mut body),
            BodyFraming::UntilClose => self.read_to_close(leftover, &mut body).map(|_| false),
        };

        let keep_alive = head.keep_alive() && head.status.code() != 101;
        let response = Response::from_parts(
            head.version,
            head.status,
            head.reason,
            head.headers,
            body.freeze(),
        );

        match read {
            Ok(clean) => {
                self.exchanges += 1;
                self.idle_since = Instant::now();
                Ok(Exchange {
                    response,
                    reusable: clean && keep_alive,
                })
            }
            Err(source) => Err(RoundTripError::with_response(source, response)),
        }
    }

    /// Read the final (non-1xx) response head
    fn read_head(&mut self, parser: &mut ResponseParser) -> Result<ResponseHead> {
        let mut temp = [0u8; READ_CHUNK];
        let mut received_any = false;
        let mut pending: &[u8] = &[];

        loop {
            if let Some(head) = parser.parse(pending)? {
                if head.status.is_informational() && head.status.code() != 101 {
                    trace!(status = head.status.code(), "skipping interim response");
                    parser.reset();
                    pending = &[];
                    continue;
                }
                return Ok(head);
            }

            let n = self.session.read(&mut temp)?;
            if n == 0 {
                return Err(if received_any {
                    Error::Parse("connection closed inside response head".to_string())
                } else {
                    Error::ConnectionClosed
                });
            }
            received_any = true;
            pending = &temp[..n];
        }
    }

    /// Returns whether the body ended exactly at the end of the input
    fn read_length(&mut self, leftover: Vec<u8>, len: usize, body: &mut BytesMut) -> Result<bool> {
        let take = leftover.len().min(len);
        body.extend_from_slice(&leftover[..take]);
        let clean = leftover.len() == take;

        let mut temp = [0u8; READ_CHUNK];
        while body.len() < len {
            let want = (len - body.len()).min(READ_CHUNK);
            let n = self.session.read(&mut temp[..want])?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            body.extend_from_slice(&temp[..n]);
        }

        Ok(clean)
    }

    fn read_chunked(&mut self, leftover: Vec<u8>, body: &mut BytesMut) -> Result<bool> {
        let mut decoder = ChunkedDecoder::new();
        let mut input = leftover;
        let mut temp = [0u8; READ_CHUNK];

        loop {
            let consumed = decoder.decode(&input, body)?;
            input.drain(..consumed);
            if decoder.is_complete() {
                return Ok(input.is_empty());
            }

            let n = self.session.read(&mut temp)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            input.extend_from_slice(&temp[..n]);
        }
    }

    fn read_to_close(&mut self, leftover: Vec<u8>, body: &mut BytesMut) -> Result<()> {
        body.extend_from_slice(&leftover);

        let mut temp = [0u8; READ_CHUNK];
        loop {
            match self.session.read(&mut temp)? {
                0 => return Ok(()),
                n => body.extend_from_slice(&temp[..n]),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::FdSessionOps;
    use crate::http::Method;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    /// Serve one canned reply per request, reading each request head first
    fn serve(replies: Vec<&'static str>) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for reply in replies {
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    if stream.read(&mut byte).unwrap() == 0 {
                        return;
                    }
                    head.push(byte[0]);
                }
                stream.write_all(reply.as_bytes()).unwrap();
            }
        });

        (format!("http://{}", addr), handle)
    }

    fn connect(base: &str) -> Connection {
        let addr = base.trim_start_matches("http://");
        let stream = TcpStream::connect(addr).unwrap();
        Connection::new(
            Box::new(FdSessionOps::new(stream)),
            Some(Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_content_length_keep_alive() {
        let (base, handle) = serve(vec![
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello",
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
        ]);
        let mut conn = connect(&base);

        let request = Request::new(Method::Get, &format!("{}/", base)).unwrap();
        let exchange = conn.send(&request).unwrap();
        assert_eq!(exchange.response.status().code(), 200);
        assert_eq!(&exchange.response.body()[..], b"Hello");
        assert!(exchange.reusable);

        let exchange = conn.send(&request).unwrap();
        assert_eq!(exchange.response.status().code(), 404);
        assert!(exchange.reusable);
        assert_eq!(conn.exchanges(), 2);

        handle.join().unwrap();
    }

    #[test]
    fn test_chunked_with_interim_response() {
        let (base, handle) = serve(vec![
            "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n",
        ]);
        let mut conn = connect(&base);

        let request = Request::new(Method::Post, &format!("{}/upload", base)).unwrap();
        let exchange = conn.send(&request).unwrap();
        assert_eq!(exchange.response.status().code(), 200);
        assert_eq!(&exchange.response.body()[..], b"abc");
        assert!(exchange.reusable);

        handle.join().unwrap();
    }

    #[test]
    fn test_read_to_close() {
        let (base, handle) = serve(vec!["HTTP/1.0 200 OK\r\n\r\nall of it"]);
        let mut conn = connect(&base);

        let request = Request::new(Method::Get, &format!("{}/", base)).unwrap();
        let exchange = conn.send(&request).unwrap();
        assert_eq!(&exchange.response.body()[..], b"all of it");
        assert!(!exchange.reusable);

        handle.join().unwrap();
    }

    #[test]
    fn test_connection_close_not_reusable() {
        let (base, handle) = serve(vec![
            "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok",
        ]);
        let mut conn = connect(&base);

        let request = Request::new(Method::Get, &format!("{}/", base)).unwrap();
        assert!(!conn.send(&request).unwrap().reusable);

        handle.join().unwrap();
    }

    #[test]
    fn test_truncated_body_returns_partial_response() {
        let (base, handle) = serve(vec!["HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc"]);
        let mut conn = connect(&base);

        let request = Request::new(Method::Get, &format!("{}/", base)).unwrap();
        let err = conn.send(&request).unwrap_err();
        handle.join().unwrap();

        assert!(matches!(err.error(), Error::ConnectionClosed));
        let partial = err.response().unwrap();
        assert_eq!(partial.status().code(), 200);
        assert_eq!(&partial.body()[..], b"abc");
    }

    #[test]
    fn test_closed_before_response() {
        let (base, handle) = serve(vec![]);
        let mut conn = connect(&base);
        handle.join().unwrap();

        let request = Request::new(Method::Get, &format!("{}/", base)).unwrap();
        let err = conn.send(&request).unwrap_err();
        assert!(err.response().is_none());
    }
}
