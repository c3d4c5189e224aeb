/// `TrackerUrl` struct containing a tracker url information.
///
/// To create a new `TrackerUrl` use the method builder `parse()`.
#[derive(Debug, PartialEq, Clone)]
pub struct TrackerUrl {
    pub protocol: ConnectionProtocol,
    pub host: String,
    pub port: u16,
    pub endpoint: String,
}

/// Possible `TrackerUrl` Connection Protocol values.
#[derive(Debug, PartialEq, Clone)]
pub enum ConnectionProtocol {
    Http,
    Https,
    Udp,
}

/// Possible `TrackerUrl` Errors.
#[derive(Debug, PartialEq)]
pub enum TrackerUrlError {
    InvalidTrackerUrl,
    UnsupportedConnectionProtocol,
    InvalidPortNumber,
}

impl TrackerUrl {
    /// Builds a new `TrackerUrl` from a &str tracker url.
    ///
    /// On success it returns a `TrackerUrl` containing the tracker's url information.
    ///
    /// It returns a `TrackerUrlError` if:
    /// - the url format is invalid.
    /// - the url connection protocol is unsupported.
    /// - the url port number is not a number.
    pub fn parse(url: &str) -> Result<Self, TrackerUrlError> {
        let (url_without_protocol, protocol) = Self::identify_and_remove_protocol(url)?;

        let (authority, endpoint) = match url_without_protocol.split_once('/') {
            Some((authority, endpoint)) => (authority.to_string(), endpoint.to_string()),
            // udp tracker urls commonly omit the path entirely
            None => (url_without_protocol, String::new()),
        };

        if authority.is_empty() {
            return Err(TrackerUrlError::InvalidTrackerUrl);
        }

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse()
                    .map_err(|_| TrackerUrlError::InvalidPortNumber)?,
            ),
            None => {
                let default_port = match protocol {
                    ConnectionProtocol::Https => 443,
                    ConnectionProtocol::Http => 80,
                    ConnectionProtocol::Udp => return Err(TrackerUrlError::InvalidTrackerUrl),
                };
                (authority, default_port)
            }
        };

        if host.is_empty() {
            return Err(TrackerUrlError::InvalidTrackerUrl);
        }

        Ok(Self {
            protocol,
            host,
            port,
            endpoint,
        })
    }

    fn identify_and_remove_protocol(
        url: &str,
    ) -> Result<(String, ConnectionProtocol), TrackerUrlError> {
        let (protocol_name, rest) = url
            .split_once("://")
            .ok_or(TrackerUrlError::InvalidTrackerUrl)?;

        let protocol = match protocol_name {
            "http" => ConnectionProtocol::Http,
            "https" => ConnectionProtocol::Https,
            "udp" => ConnectionProtocol::Udp,
            _ => return Err(TrackerUrlError::UnsupportedConnectionProtocol),
        };

        Ok((rest.to_string(), protocol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_no_port() {
        let parsed = TrackerUrl::parse("https://www.example.org/ann").unwrap();

        assert_eq!(ConnectionProtocol::Https, parsed.protocol);
        assert_eq!("www.example.org", parsed.host);
        assert_eq!(443, parsed.port);
        assert_eq!("ann", parsed.endpoint);
    }

    #[test]
    fn test_http_no_port() {
        let parsed = TrackerUrl::parse("http://tracker.example.org/announce").unwrap();

        assert_eq!(ConnectionProtocol::Http, parsed.protocol);
        assert_eq!(80, parsed.port);
        assert_eq!("announce", parsed.endpoint);
    }

    #[test]
    fn test_http_with_port() {
        let parsed = TrackerUrl::parse("http://tracker.example.org:8080/announce").unwrap();

        assert_eq!(8080, parsed.port);
    }

    #[test]
    fn test_udp_with_port() {
        let parsed = TrackerUrl::parse("udp://tracker.example.org:6969/announce").unwrap();

        assert_eq!(ConnectionProtocol::Udp, parsed.protocol);
        assert_eq!("tracker.example.org", parsed.host);
        assert_eq!(6969, parsed.port);
    }

    #[test]
    fn test_udp_without_endpoint() {
        let parsed = TrackerUrl::parse("udp://tracker.example.org:6969").unwrap();

        assert_eq!(6969, parsed.port);
        assert_eq!("", parsed.endpoint);
    }

    #[test]
    fn test_udp_without_port_is_rejected() {
        assert_eq!(
            TrackerUrl::parse("udp://tracker.example.org"),
            Err(TrackerUrlError::InvalidTrackerUrl)
        );
    }

    #[test]
    fn test_unsupported_protocol() {
        assert_eq!(
            TrackerUrl::parse("wss://tracker.example.org/announce"),
            Err(TrackerUrlError::UnsupportedConnectionProtocol)
        );
    }

    #[test]
    fn test_bad_port() {
        assert_eq!(
            TrackerUrl::parse("http://tracker.example.org:abc/announce"),
            Err(TrackerUrlError::InvalidPortNumber)
        );
    }
}
