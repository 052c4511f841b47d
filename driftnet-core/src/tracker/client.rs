//! HTTP tracker client with URL building and response parsing

use std::net::{Ipv4Addr, SocketAddrV4};

use async_trait::async_trait;

use super::types::{AnnounceRequest, AnnounceResponse, TrackerClient};
use crate::bencode::{self, Value};
use crate::config::TrackerConfig;
use crate::torrent::TorrentError;

/// HTTP tracker client implementation
pub struct HttpTrackerClient {
    announce_url: String,
    retries: u32,
    client: reqwest::Client,
}

impl HttpTrackerClient {
    /// Creates a client for the configured announce URL.
    ///
    /// # Errors
    ///
    /// - `TorrentError::UrlParsing` - Announce URL is not a valid URL
    /// - `TorrentError::TrackerConnectionFailed` - HTTP client could not be built
    pub fn new(config: &TrackerConfig) -> Result<Self, TorrentError> {
        url::Url::parse(&config.announce_url)?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TorrentError::TrackerConnectionFailed {
                url: format!("{}: {e}", config.announce_url),
            })?;

        Ok(Self {
            announce_url: config.announce_url.clone(),
            retries: config.retries,
            client,
        })
    }

    /// Build announce URL with query parameters
    pub(crate) fn build_announce_url(&self, request: &AnnounceRequest) -> String {
        // Raw bytes are escaped by hand; generic query encoders would double-encode them.
        let query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left=0&numwant={}&event={}&compact=1",
            Self::url_encode_bytes(request.info_hash.as_bytes()),
            Self::url_encode_bytes(request.peer_id.as_bytes()),
            request.port,
            request.numwant,
            request.event.as_str(),
        );

        let separator = if self.announce_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query}", self.announce_url)
    }

    /// URL encode bytes for tracker communication per RFC 3986.
    pub(crate) fn url_encode_bytes(bytes: &[u8]) -> String {
        bytes.iter().map(|&b| format!("%{b:02X}")).collect()
    }

    /// Parse compact peer list from tracker response
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - Length not a multiple of 6 bytes
    pub(crate) fn parse_compact_peers(peer_bytes: &[u8]) -> Result<Vec<SocketAddrV4>, TorrentError> {
        if !peer_bytes.len().is_multiple_of(6) {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "compact peer list of {} bytes is not a multiple of 6",
                    peer_bytes.len()
                ),
            });
        }

        Ok(peer_bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddrV4::new(ip, port)
            })
            .collect())
    }

    /// Parse tracker response from bencode data
    ///
    /// # Errors
    ///
    /// - `TorrentError::Bencode` - Body is not a single bencoded value
    /// - `TorrentError::TrackerRejected` - Response carried `failure reason`
    /// - `TorrentError::ProtocolError` - Not a dictionary or malformed `peers`
    pub(crate) fn parse_announce_response(
        response_bytes: &[u8],
    ) -> Result<AnnounceResponse, TorrentError> {
        let parsed = bencode::decode_exact(response_bytes)?;
        if parsed.as_dict().is_none() {
            return Err(TorrentError::ProtocolError {
                message: "tracker response is not a dictionary".to_string(),
            });
        }

        if let Some(reason) = parsed.get(b"failure reason").and_then(Value::as_bytes) {
            return Err(TorrentError::TrackerRejected {
                reason: String::from_utf8_lossy(reason).into_owned(),
            });
        }

        let interval = parsed
            .get(b"interval")
            .and_then(Value::as_integer)
            .and_then(|secs| u32::try_from(secs).ok());

        let peers = match parsed.get(b"peers") {
            Some(Value::Bytes(peer_data)) => Self::parse_compact_peers(peer_data)?,
            Some(_) => {
                return Err(TorrentError::ProtocolError {
                    message: "only compact peer lists are supported".to_string(),
                });
            }
            None => Vec::new(),
        };

        Ok(AnnounceResponse { interval, peers })
    }

    async fn announce_once(&self, url: &str) -> Result<AnnounceResponse, TorrentError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            tracing::warn!("HTTP request to {} failed: {}", self.announce_url, e);
            TorrentError::TrackerConnectionFailed {
                url: self.announce_url.clone(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                "Tracker {} returned error status: {}",
                self.announce_url,
                status
            );
            return Err(TorrentError::TrackerStatus {
                url: self.announce_url.clone(),
                status: status.as_u16(),
            });
        }

        let response_bytes = response.bytes().await.map_err(|e| {
            tracing::warn!(
                "Failed to read response body from {}: {}",
                self.announce_url,
                e
            );
            TorrentError::TrackerConnectionFailed {
                url: self.announce_url.clone(),
            }
        })?;

        Self::parse_announce_response(&response_bytes)
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    /// Announces with up to `retries` further attempts on transport errors.
    ///
    /// A tracker that answered (rejection, bad status, bad body) is not retried.
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, TorrentError> {
        let url = self.build_announce_url(&request);
        let mut attempt = 0;
        loop {
            tracing::debug!(
                "Announcing {} to {} (attempt {})",
                request.info_hash,
                self.announce_url,
                attempt + 1
            );
            match self.announce_once(&url).await {
                Ok(response) => {
                    tracing::debug!(
                        "Tracker {} returned {} peers for {}",
                        self.announce_url,
                        response.peers.len(),
                        request.info_hash
                    );
                    return Ok(response);
                }
                Err(TorrentError::TrackerConnectionFailed { .. }) if attempt < self.retries => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn tracker_url(&self) -> &str {
        &self.announce_url
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::protocol::PeerId;
    use crate::torrent::InfoHash;
    use crate::tracker::AnnounceEvent;

    fn config(announce_url: &str) -> TrackerConfig {
        TrackerConfig {
            announce_url: announce_url.to_string(),
            timeout: Duration::from_secs(2),
            retries: 1,
            ..TrackerConfig::default()
        }
    }

    fn request() -> AnnounceRequest {
        AnnounceRequest {
            info_hash: InfoHash::new([0xab; 20]),
            peer_id: PeerId::new(*b"-DN0001-abcdefghijkl"),
            port: 6881,
            event: AnnounceEvent::Started,
            numwant: 80,
        }
    }

    #[test]
    fn test_announce_url_query_layout() {
        let client = HttpTrackerClient::new(&config("http://tracker.test/announce")).unwrap();

        let url = client.build_announce_url(&request());

        let expected = format!(
            "http://tracker.test/announce?info_hash={}&peer_id={}&port=6881&uploaded=0&downloaded=0&left=0&numwant=80&event=started&compact=1",
            "%AB".repeat(20),
            "%2D%44%4E%30%30%30%31%2D%61%62%63%64%65%66%67%68%69%6A%6B%6C",
        );
        assert_eq!(url, expected);
    }

    #[test]
    fn test_invalid_announce_url_rejected() {
        assert!(matches!(
            HttpTrackerClient::new(&config("not a url")),
            Err(TorrentError::UrlParsing(_))
        ));
    }

    #[test]
    fn test_parse_compact_peers() {
        let data = [192, 168, 1, 100, 0x1a, 0xe1, 10, 0, 0, 1, 0x1a, 0xe2];

        let peers = HttpTrackerClient::parse_compact_peers(&data).unwrap();

        assert_eq!(
            peers,
            vec![
                SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 100), 6881),
                SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6882),
            ]
        );
    }

    #[test]
    fn test_parse_compact_peers_rejects_partial_entry() {
        assert!(matches!(
            HttpTrackerClient::parse_compact_peers(&[1, 2, 3, 4, 5]),
            Err(TorrentError::ProtocolError { .. })
        ));
    }

    #[test]
    fn test_parse_response_with_interval_and_peers() {
        let mut body = b"d8:intervali900e5:peers6:".to_vec();
        body.extend_from_slice(&[127, 0, 0, 1, 0x1a, 0xe1]);
        body.push(b'e');

        let response = HttpTrackerClient::parse_announce_response(&body).unwrap();

        assert_eq!(response.interval, Some(900));
        assert_eq!(
            response.peers,
            vec![SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881)]
        );
    }

    #[test]
    fn test_parse_response_failure_reason() {
        let result = HttpTrackerClient::parse_announce_response(b"d14:failure reason9:not founde");
        match result {
            Err(TorrentError::TrackerRejected { reason }) => assert_eq!(reason, "not found"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_response_without_peers_is_empty() {
        let response = HttpTrackerClient::parse_announce_response(b"de").unwrap();
        assert_eq!(response, AnnounceResponse::default());

        assert!(HttpTrackerClient::parse_announce_response(b"le").is_err());
        assert!(HttpTrackerClient::parse_announce_response(b"d5:peersi1ee").is_err());
    }

    /// Serves one canned HTTP response and returns the request line it saw.
    async fn serve_once(body: Vec<u8>) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).into_owned();
            let mut response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .into_bytes();
            response.extend_from_slice(&body);
            socket.write_all(&response).await.unwrap();
            head.lines().next().unwrap_or_default().to_string()
        });
        (format!("http://{addr}/announce"), handle)
    }

    #[tokio::test]
    async fn test_announce_against_local_tracker() {
        let mut body = b"d5:peers12:".to_vec();
        body.extend_from_slice(&[10, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0x1a, 0xe1]);
        body.push(b'e');
        let (url, server) = serve_once(body).await;
        let client = HttpTrackerClient::new(&config(&url)).unwrap();

        let response = client.announce(request()).await.unwrap();

        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.interval, None);
        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /announce?info_hash=%AB"));
        assert!(request_line.contains("&compact=1"));
    }

    #[tokio::test]
    async fn test_unreachable_tracker_fails_after_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = HttpTrackerClient::new(&config(&format!("http://{addr}/announce"))).unwrap();

        let result = client.announce(request()).await;

        assert!(matches!(
            result,
            Err(TorrentError::TrackerConnectionFailed { .. })
        ));
    }
}
