use std::io::Error as IOError;
use std::time::Duration;

use native_tls::TlsConnector;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::url_parser::TrackerUrl;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `HttpHandler` struct to make tracker **HTTP(S)** requests.
///
/// To create a new `HttpHandler` use the method builder `new()`.
///
/// To make a request use `https_request()` or `http_request()`; both return
/// the raw response body (the bencoded announce dict).
#[derive(Debug)]
pub struct HttpHandler {
    tracker_url: TrackerUrl,
    query: String,
}

/// Possible `HttpHandler` errors.
#[derive(Debug)]
pub enum HttpHandlerError {
    CreateTlsConnectorError(native_tls::Error),
    TcpStreamConnectError(IOError),
    TlsStreamConnectError(native_tls::Error),
    ErrorWritingStream(IOError),
    ErrorReadingStream(IOError),
    Timeout,
}

impl HttpHandler {
    /// Builds a new `HttpHandler` from a **TrackerUrl** and a prebuilt query
    /// string (leading `?` included).
    pub fn new(tracker_url: TrackerUrl, query: String) -> Self {
        Self { tracker_url, query }
    }

    /// Makes an **HTTPS** request to the tracker url.
    ///
    /// It returns an `HttpHandlerError` if:
    /// - The TLS connector could not be created.
    /// - The TCP or TLS connection failed.
    /// - Writing or reading the stream failed, or timed out.
    pub async fn https_request(&self) -> Result<Vec<u8>, HttpHandlerError> {
        let connector =
            TlsConnector::new().map_err(HttpHandlerError::CreateTlsConnectorError)?;
        let connector = tokio_native_tls::TlsConnector::from(connector);

        let stream = self.connect_tcp_stream().await?;
        let stream = timeout(
            REQUEST_TIMEOUT,
            connector.connect(self.tracker_url.host.as_str(), stream),
        )
        .await
        .map_err(|_| HttpHandlerError::Timeout)?
        .map_err(HttpHandlerError::TlsStreamConnectError)?;

        self.request_and_decode(stream).await
    }

    /// Makes an **HTTP** request to the tracker url.
    ///
    /// It returns an `HttpHandlerError` if:
    /// - The TCP connection failed.
    /// - Writing or reading the stream failed, or timed out.
    pub async fn http_request(&self) -> Result<Vec<u8>, HttpHandlerError> {
        let stream = self.connect_tcp_stream().await?;
        self.request_and_decode(stream).await
    }

    async fn connect_tcp_stream(&self) -> Result<TcpStream, HttpHandlerError> {
        let connect_url = format!("{}:{}", self.tracker_url.host, self.tracker_url.port);
        timeout(REQUEST_TIMEOUT, TcpStream::connect(connect_url))
            .await
            .map_err(|_| HttpHandlerError::Timeout)?
            .map_err(HttpHandlerError::TcpStreamConnectError)
    }

    async fn request_and_decode<S>(&self, mut stream: S) -> Result<Vec<u8>, HttpHandlerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut request = format!(
            "GET /{}{} HTTP/1.1",
            self.tracker_url.endpoint, self.query
        );
        request.push_str("\r\n");
        request.push_str("Host: ");
        request.push_str(self.tracker_url.host.as_str());
        request.push_str("\r\n");
        request.push_str("User-Agent: storrent/0.1");
        request.push_str("\r\n");
        request.push_str("Connection: close");
        request.push_str("\r\n");
        request.push_str("\r\n");

        timeout(REQUEST_TIMEOUT, stream.write_all(request.as_bytes()))
            .await
            .map_err(|_| HttpHandlerError::Timeout)?
            .map_err(HttpHandlerError::ErrorWritingStream)?;

        let mut response = vec![];
        timeout(REQUEST_TIMEOUT, stream.read_to_end(&mut response))
            .await
            .map_err(|_| HttpHandlerError::Timeout)?
            .map_err(HttpHandlerError::ErrorReadingStream)?;

        Ok(Self::parse_http_response(&response).to_vec())
    }

    /// Strips the status line and headers, returning the body.
    fn parse_http_response(response: &[u8]) -> &[u8] {
        for i in 0..response.len().saturating_sub(3) {
            if &response[i..i + 4] == b"\r\n\r\n" {
                return &response[i + 4..];
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_response_strips_headers() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nd8:intervali60ee";

        assert_eq!(
            HttpHandler::parse_http_response(raw),
            b"d8:intervali60ee"
        );
    }

    #[test]
    fn test_parse_http_response_without_headers_is_passed_through() {
        let raw = b"d8:intervali60ee";

        assert_eq!(HttpHandler::parse_http_response(raw), raw);
    }
}
