//! Outbound HTTP safety policy.
//!
//! Applied to every URL the adapter dials: upstream APIs, MCP servers, spec
//! locations, and the credential platform. Only `http`/`https` schemes are
//! ever allowed; host allowlisting and private-network restrictions are
//! policy choices of the deployment.

use crate::HttpToolsError;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::net::lookup_host;
use url::Url;

#[derive(Debug, Clone)]
pub struct OutboundHttpSafety {
    /// If set, only these hosts may be dialed (compared case-insensitively).
    pub allowed_hosts: Option<HashSet<String>>,
    /// Allow loopback/private/link-local destinations. On for standalone
    /// deployments, off when the adapter fronts untrusted tool definitions.
    pub allow_private_networks: bool,
    /// Upper bound on any response body read through [`read_body_limited`].
    pub max_response_bytes: usize,
}

impl OutboundHttpSafety {
    /// Policy for standalone deployments: any host, bounded bodies.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allowed_hosts: None,
            allow_private_networks: true,
            max_response_bytes: 4 * 1024 * 1024,
        }
    }

    /// Policy for deployments executing tool definitions the operator does
    /// not fully control.
    #[must_use]
    pub fn restricted() -> Self {
        Self {
            allowed_hosts: None,
            allow_private_networks: false,
            max_response_bytes: 1024 * 1024,
        }
    }

    /// Validate a URL before dialing it.
    ///
    /// # Errors
    ///
    /// Returns [`HttpToolsError::Blocked`] for non-http(s) schemes, hosts
    /// outside the allowlist, and hosts that are (or resolve to) denied IP
    /// ranges when private networks are disallowed.
    pub async fn check_url(&self, url: &Url) -> crate::Result<()> {
        check_scheme(url)?;

        let Some(host) = url.host_str() else {
            return Err(HttpToolsError::Blocked("missing URL host".to_string()));
        };

        if let Some(allowed) = &self.allowed_hosts
            && !allowed.contains(&host.to_ascii_lowercase())
        {
            return Err(HttpToolsError::Blocked(format!(
                "host '{host}' not in allowlist"
            )));
        }

        if self.allow_private_networks {
            return Ok(());
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            if is_denied_ip(ip) {
                return Err(HttpToolsError::Blocked(format!(
                    "destination IP '{ip}' is not allowed"
                )));
            }
            return Ok(());
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let addrs = lookup_host((host, port)).await.map_err(|e| {
            HttpToolsError::Transport(format!("DNS lookup failed for host '{host}': {e}"))
        })?;

        let mut saw_any = false;
        for addr in addrs {
            saw_any = true;
            if is_denied_ip(addr.ip()) {
                return Err(HttpToolsError::Blocked(format!(
                    "host '{host}' resolved to disallowed IP '{}'",
                    addr.ip()
                )));
            }
        }
        if !saw_any {
            return Err(HttpToolsError::Transport(format!(
                "DNS lookup returned no addresses for host '{host}'"
            )));
        }

        Ok(())
    }
}

/// Reject every scheme other than `http`/`https`.
///
/// # Errors
///
/// Returns [`HttpToolsError::Blocked`] for any other scheme.
pub fn check_scheme(url: &Url) -> crate::Result<()> {
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(HttpToolsError::Blocked(format!(
            "unsupported URL scheme '{scheme}'"
        )));
    }
    Ok(())
}

/// Read a response body, failing once it exceeds `max` bytes.
///
/// # Errors
///
/// Returns [`HttpToolsError::TooLarge`] if the declared or streamed length
/// exceeds the limit, or [`HttpToolsError::Transport`] on read failure.
pub async fn read_body_limited(mut response: reqwest::Response, max: usize) -> crate::Result<Vec<u8>> {
    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(HttpToolsError::TooLarge(max));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| HttpToolsError::Transport(sanitize_reqwest_error(&e)))?
    {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(HttpToolsError::TooLarge(max));
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Strip credentials, query, and fragment from a URL for display.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

/// Render a reqwest error without leaking query strings or userinfo.
#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

fn is_denied_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_denied_ipv4(v4),
        IpAddr::V6(v6) => is_denied_ipv6(v6),
    }
}

fn is_denied_ipv4(ip: Ipv4Addr) -> bool {
    if ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
    {
        return true;
    }

    let oct = ip.octets();
    // Carrier-grade NAT (100.64.0.0/10) and reserved (240.0.0.0/4).
    (oct[0] == 100 && (64..=127).contains(&oct[1])) || oct[0] >= 240
}

fn is_denied_ipv6(ip: Ipv6Addr) -> bool {
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || ip.is_unique_local()
        || ip.is_unicast_link_local()
}
