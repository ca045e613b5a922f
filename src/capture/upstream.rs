//! Upstream MJPEG source connections

use std::future::Future;
use std::time::Duration;

use axum::http::Uri;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::constants::{MAX_LINE_BYTES, UPSTREAM_READ_BUFFER};
use crate::error::CaptureError;

/// Something the capture worker can open a multipart byte stream from
pub trait UpstreamSource: Send + Sync + 'static {
    type Stream: AsyncBufRead + Unpin + Send;

    /// Open a fresh connection positioned at the start of the multipart body
    fn connect(&self) -> impl Future<Output = Result<Self::Stream, CaptureError>> + Send;

    /// Human-readable target for logs
    fn describe(&self) -> String;
}

/// Plain HTTP/1.1 GET against the camera
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    host: String,
    port: u16,
    path: String,
    connect_timeout: Duration,
}

impl HttpUpstream {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, CaptureError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| CaptureError::InvalidUrl(format!("{url}: {e}")))?;

        match uri.scheme_str() {
            Some("http") => {}
            other => {
                return Err(CaptureError::InvalidUrl(format!(
                    "{url}: unsupported scheme {}",
                    other.unwrap_or("<none>")
                )))
            }
        }

        let host = uri
            .host()
            .ok_or_else(|| CaptureError::InvalidUrl(format!("{url}: missing host")))?
            .to_string();
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .filter(|pq| !pq.is_empty())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            host,
            port: uri.port_u16().unwrap_or(80),
            path,
            connect_timeout,
        })
    }

    fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    async fn open(&self) -> Result<BufReader<TcpStream>, CaptureError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| CaptureError::ConnectFailed(e.to_string()))?;
        stream.set_nodelay(true)?;

        let mut reader = BufReader::with_capacity(UPSTREAM_READ_BUFFER, stream);
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: mjpeg-relay/{}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
            self.path,
            self.host_header(),
            env!("CARGO_PKG_VERSION"),
        );
        reader.get_mut().write_all(request.as_bytes()).await?;

        read_response_head(&mut reader).await?;
        Ok(reader)
    }
}

impl UpstreamSource for HttpUpstream {
    type Stream = BufReader<TcpStream>;

    async fn connect(&self) -> Result<Self::Stream, CaptureError> {
        tokio::time::timeout(self.connect_timeout, self.open())
            .await
            .map_err(|_| CaptureError::Timeout)?
    }

    fn describe(&self) -> String {
        format!("http://{}{}", self.host_header(), self.path)
    }
}

/// Consume status line and headers, leaving the reader at the body
async fn read_response_head<R>(reader: &mut R) -> Result<(), CaptureError>
where
    R: AsyncBufRead + Unpin,
{
    let status_line = read_head_line(reader).await?;
    let status = parse_status(&status_line)?;
    if !(200..300).contains(&status) {
        return Err(CaptureError::BadStatus(status));
    }

    loop {
        let line = read_head_line(reader).await?;
        if line.is_empty() {
            return Ok(());
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("transfer-encoding")
                && value.to_ascii_lowercase().contains("chunked")
            {
                return Err(CaptureError::UnsupportedTransferEncoding(value.trim().to_string()));
            }
        }
    }
}

async fn read_head_line<R>(reader: &mut R) -> Result<String, CaptureError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = reader
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 || !buf.ends_with(b"\n") {
        return Err(CaptureError::Truncated);
    }
    Ok(String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string())
}

fn parse_status(line: &str) -> Result<u16, CaptureError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| CaptureError::InvalidHeader(format!("status line: {line}"))),
        _ => Err(CaptureError::InvalidHeader(format!("status line: {line}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one canned response and hand back the request text
    async fn serve_once(response: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/stream?res=vga", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 1024];
            let n = socket.read(&mut request).await.unwrap();
            socket.write_all(response).await.unwrap();
            String::from_utf8_lossy(&request[..n]).to_string()
        });
        (url, handle)
    }

    #[test]
    fn test_url_parsing() {
        let upstream = HttpUpstream::new("http://192.168.0.105/", Duration::from_secs(1)).unwrap();
        assert_eq!(upstream.port, 80);
        assert_eq!(upstream.path, "/");
        assert_eq!(upstream.describe(), "http://192.168.0.105/");

        let upstream = HttpUpstream::new("http://cam.local:81/stream", Duration::from_secs(1)).unwrap();
        assert_eq!(upstream.port, 81);
        assert_eq!(upstream.host_header(), "cam.local:81");

        let upstream = HttpUpstream::new("http://cam.local", Duration::from_secs(1)).unwrap();
        assert_eq!(upstream.path, "/");

        assert!(matches!(
            HttpUpstream::new("https://cam.local/", Duration::from_secs(1)),
            Err(CaptureError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpUpstream::new("not a url", Duration::from_secs(1)),
            Err(CaptureError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_status_line() {
        assert_eq!(parse_status("HTTP/1.1 200 OK").unwrap(), 200);
        assert_eq!(parse_status("HTTP/1.0 503 Service Unavailable").unwrap(), 503);
        assert!(parse_status("garbage").is_err());
    }

    #[tokio::test]
    async fn test_connect_returns_body() {
        let (url, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace;boundary=b\r\n\r\n--b\r\n",
        )
        .await;

        let upstream = HttpUpstream::new(&url, Duration::from_secs(2)).unwrap();
        let mut body = upstream.connect().await.unwrap();
        let mut first = String::new();
        body.read_line(&mut first).await.unwrap();
        assert_eq!(first, "--b\r\n");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /stream?res=vga HTTP/1.1\r\n"));
        assert!(request.contains("Host: 127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_bad_status() {
        let (url, server) = serve_once(b"HTTP/1.1 404 Not Found\r\n\r\n").await;
        let upstream = HttpUpstream::new(&url, Duration::from_secs(2)).unwrap();
        assert!(matches!(upstream.connect().await, Err(CaptureError::BadStatus(404))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_chunked_rejected() {
        let (url, server) =
            serve_once(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n").await;
        let upstream = HttpUpstream::new(&url, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            upstream.connect().await,
            Err(CaptureError::UnsupportedTransferEncoding(_))
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let upstream = HttpUpstream::new(&url, Duration::from_millis(100)).unwrap();
        assert!(matches!(upstream.connect().await, Err(CaptureError::Timeout)));
        server.abort();
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let upstream = HttpUpstream::new(&url, Duration::from_secs(2)).unwrap();
        let err = upstream.connect().await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
