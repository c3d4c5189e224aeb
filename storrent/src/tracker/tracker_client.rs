use super::announce::{AnnounceOutcome, AnnounceRequest};
use super::http::http_handler::{HttpHandler, HttpHandlerError};
use super::http::query_params::QueryParams;
use super::http::url_parser::{ConnectionProtocol, TrackerUrl, TrackerUrlError};
use super::tracker_response::{FromTrackerResponseError, TrackerResponse};
use super::udp::udp_handler::{UdpTrackerClient, UdpTrackerError};

/// Possible `TrackerClient` errors.
#[derive(Debug)]
pub enum TrackerClientError {
    UrlParseError(TrackerUrlError),
    HttpHandlerError(HttpHandlerError),
    UdpTrackerError(UdpTrackerError),
    FromTrackerResponseError(FromTrackerResponseError),
}

/// Speaks to one tracker URL with whatever protocol its scheme names.
pub struct TrackerClient;

impl TrackerClient {
    /// Announces to a single tracker URL.
    ///
    /// It returns a `TrackerClientError` if:
    /// - The URL does not parse or uses an unsupported scheme.
    /// - The HTTP or UDP exchange failed.
    /// - The tracker reported a failure.
    pub async fn announce(
        url: &str,
        request: &AnnounceRequest,
    ) -> Result<AnnounceOutcome, TrackerClientError> {
        let tracker_url = TrackerUrl::parse(url).map_err(TrackerClientError::UrlParseError)?;

        match tracker_url.protocol {
            ConnectionProtocol::Udp => {
                let mut client = UdpTrackerClient::connect(&tracker_url.host, tracker_url.port)
                    .await
                    .map_err(TrackerClientError::UdpTrackerError)?;
                client
                    .announce(request)
                    .await
                    .map_err(TrackerClientError::UdpTrackerError)
            }
            ConnectionProtocol::Http | ConnectionProtocol::Https => {
                let query = QueryParams::new(request).build();
                let handler = HttpHandler::new(tracker_url.clone(), query);

                let body = match tracker_url.protocol {
                    ConnectionProtocol::Https => handler.https_request().await,
                    _ => handler.http_request().await,
                }
                .map_err(TrackerClientError::HttpHandlerError)?;

                let response = TrackerResponse::from(&body)
                    .map_err(TrackerClientError::FromTrackerResponseError)?;

                Ok(AnnounceOutcome {
                    interval: response.interval,
                    seeders: response.complete,
                    leechers: response.incomplete,
                    peers: response.peers,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::announce::AnnounceEvent;

    #[tokio::test]
    async fn test_announce_rejects_bad_url() {
        let request = AnnounceRequest {
            info_hash: [1; 20],
            peer_id: [2; 20],
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 0,
            event: AnnounceEvent::Started,
            key: 0,
            num_want: -1,
        };

        assert!(matches!(
            TrackerClient::announce("wss://tracker.example/announce", &request).await,
            Err(TrackerClientError::UrlParseError(_))
        ));
    }
}
