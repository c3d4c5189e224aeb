use url_encoder::url_encoder::encode;

use crate::tracker::announce::AnnounceRequest;

/// `QueryParams` struct building the announce query string.
///
/// To create a new `QueryParams` use the method builder `new()`.
///
/// To build the query string use the method `build()`.
#[derive(Debug)]
pub struct QueryParams<'a> {
    request: &'a AnnounceRequest,
}

impl<'a> QueryParams<'a> {
    pub fn new(request: &'a AnnounceRequest) -> Self {
        Self { request }
    }

    /// Builds the query string, percent-encoding the raw info_hash and
    /// peer_id bytes. `compact=1` asks for the 6-byte-per-peer list.
    pub fn build(&self) -> String {
        let mut query = format!(
            "?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            encode(&self.request.info_hash),
            encode(&self.request.peer_id),
            self.request.port,
            self.request.uploaded,
            self.request.downloaded,
            self.request.left,
        );
        if self.request.num_want >= 0 {
            query.push_str(&format!("&numwant={}", self.request.num_want));
        }
        if let Some(event) = self.request.event.as_str() {
            query.push_str(&format!("&event={}", event));
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::announce::AnnounceEvent;

    #[test]
    fn test_query_params_build() {
        let request = create_test_request(AnnounceEvent::Started);
        let query = QueryParams::new(&request).build();

        assert!(query.starts_with("?info_hash=%01%01"));
        assert!(query.contains("&port=6881"));
        assert!(query.contains("&uploaded=10"));
        assert!(query.contains("&downloaded=20"));
        assert!(query.contains("&left=30"));
        assert!(query.contains("&compact=1"));
        assert!(query.ends_with("&event=started"));
    }

    #[test]
    fn test_query_params_without_event() {
        let request = create_test_request(AnnounceEvent::None);
        let query = QueryParams::new(&request).build();

        assert!(!query.contains("&event="));
    }

    // Auxiliary functions

    fn create_test_request(event: AnnounceEvent) -> AnnounceRequest {
        AnnounceRequest {
            info_hash: [1; 20],
            peer_id: [2; 20],
            port: 6881,
            uploaded: 10,
            downloaded: 20,
            left: 30,
            event,
            key: 42,
            num_want: -1,
        }
    }
}
