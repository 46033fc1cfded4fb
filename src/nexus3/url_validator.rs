//! SSRF protection for outbound URLs.
//!
//! Applied twice by design: once when external-API configuration is loaded,
//! and again immediately before every outbound request. Only http/https
//! URLs with a public host pass by default; loopback and private/link-local
//! addresses need their respective opt-in flags.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

/// A URL was rejected by the security policy.
///
/// The message never includes a resolved address, only the policy that
/// rejected the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSecurityError(String);

impl fmt::Display for UrlSecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "URL rejected: {}", self.0)
    }
}

impl std::error::Error for UrlSecurityError {}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_link_local()
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    // Unique-local fc00::/7 and link-local fe80::/10.
    (ip.segments()[0] & 0xfe00) == 0xfc00 || (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Validate a URL against the SSRF policy.
///
/// Returns the input string unchanged on success so callers can validate
/// in-place during config parsing.
pub fn validate_url(
    raw: &str,
    allow_localhost: bool,
    allow_private: bool,
) -> Result<String, UrlSecurityError> {
    let parsed = Url::parse(raw)
        .map_err(|e| UrlSecurityError(format!("malformed URL ({})", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(UrlSecurityError(format!(
                "scheme '{}' is not allowed (http/https only)",
                other
            )))
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| UrlSecurityError("missing host".to_string()))?;

    match host {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            if (domain == "localhost" || domain.ends_with(".localhost")) && !allow_localhost {
                return Err(UrlSecurityError("localhost is not allowed".to_string()));
            }
        }
        Host::Ipv4(ip) => {
            if ip.is_loopback() && !allow_localhost {
                return Err(UrlSecurityError("loopback address is not allowed".to_string()));
            }
            if is_private_v4(ip) && !allow_private {
                return Err(UrlSecurityError(
                    "private or link-local address is not allowed".to_string(),
                ));
            }
            if ip == Ipv4Addr::UNSPECIFIED {
                return Err(UrlSecurityError("unspecified address is not allowed".to_string()));
            }
        }
        Host::Ipv6(ip) => {
            if ip.is_loopback() && !allow_localhost {
                return Err(UrlSecurityError("loopback address is not allowed".to_string()));
            }
            if is_private_v6(ip) && !allow_private {
                return Err(UrlSecurityError(
                    "private or link-local address is not allowed".to_string(),
                ));
            }
            if ip == Ipv6Addr::UNSPECIFIED {
                return Err(UrlSecurityError("unspecified address is not allowed".to_string()));
            }
        }
    }

    Ok(raw.to_string())
}
