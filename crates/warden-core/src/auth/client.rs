use std::net::{IpAddr, Ipv4Addr};

use axum::http::HeaderMap;

const UNKNOWN_AGENT: &str = "Unknown";

/// Where a request came from, as far as audit and throttling care.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Address resolved from forwarding headers, then the peer.
    pub ip: IpAddr,
    /// Address of the directly connected peer, when known.
    pub peer_ip: Option<IpAddr>,
    pub user_agent: String,
}

impl ClientInfo {
    /// Build from request headers and the socket peer address.
    pub fn from_parts(headers: &HeaderMap, peer_ip: Option<IpAddr>) -> Self {
        let user_agent = headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN_AGENT)
            .to_string();

        ClientInfo {
            ip: resolve_client_ip(headers, peer_ip),
            peer_ip,
            user_agent,
        }
    }

    /// A client with no request behind it (CLI, maintenance tasks).
    pub fn local() -> Self {
        ClientInfo {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            peer_ip: None,
            user_agent: "warden-cli".to_string(),
        }
    }

    /// Identifier the login throttle is keyed by.
    ///
    /// Forwarding headers are client-controlled, so the direct peer wins
    /// whenever it is known.
    pub fn throttle_key(&self) -> String {
        self.peer_ip.unwrap_or(self.ip).to_string()
    }
}

/// Resolve the originating address: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the peer. Candidates that do not parse as an IP are
/// skipped; with nothing usable the result is `0.0.0.0`.
pub fn resolve_client_ip(headers: &HeaderMap, peer_ip: Option<IpAddr>) -> IpAddr {
    ["x-forwarded-for", "x-real-ip"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(',').next())
        .find_map(|candidate| candidate.trim().parse::<IpAddr>().ok())
        .or(peer_ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn forwarded_for_takes_precedence() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        let peer = Some("127.0.0.1".parse().unwrap());
        assert_eq!(resolve_client_ip(&h, peer), "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn malformed_forwarded_for_falls_through_to_real_ip() {
        let h = headers(&[("x-forwarded-for", "not-an-ip"), ("x-real-ip", "198.51.100.2")]);
        assert_eq!(resolve_client_ip(&h, None), "198.51.100.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn peer_then_unspecified() {
        let peer: IpAddr = "::1".parse().unwrap();
        assert_eq!(resolve_client_ip(&HeaderMap::new(), Some(peer)), peer);
        assert_eq!(
            resolve_client_ip(&HeaderMap::new(), None),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
    }

    #[test]
    fn throttle_key_prefers_peer() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7"), ("user-agent", "curl/8")]);
        let client = ClientInfo::from_parts(&h, Some("192.0.2.10".parse().unwrap()));
        assert_eq!(client.ip.to_string(), "203.0.113.7");
        assert_eq!(client.throttle_key(), "192.0.2.10");
        assert_eq!(client.user_agent, "curl/8");
    }

    #[test]
    fn missing_user_agent_is_unknown() {
        let client = ClientInfo::from_parts(&HeaderMap::new(), None);
        assert_eq!(client.user_agent, "Unknown");
    }
}
