//! Reverse-proxy gateway payloads.

use std::fmt;
use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;
use crate::error::{TypesError, TypesResult};
use crate::workload::{WorkloadData, WorkloadGetter};

static FQDN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-.]+$").expect("fqdn pattern compiles"));

static PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+$").expect("gateway name pattern compiles"));

/// Upstream address: `ip:port` for tls passthrough, `http://ip[:port]` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Backend(pub String);

impl Backend {
    pub fn valid(&self, tls_passthrough: bool) -> TypesResult<()> {
        let host = if tls_passthrough {
            let addr: SocketAddr = self.0.parse().map_err(|e| {
                TypesError::invalid(format!("failed to parse backend '{}': {e}", self.0))
            })?;
            addr.ip()
        } else {
            let rest = self
                .0
                .strip_prefix("http://")
                .ok_or_else(|| TypesError::invalid("backend scheme expected to be http"))?;
            let authority = rest.split('/').next().unwrap_or_default();
            parse_host(authority)
                .ok_or_else(|| TypesError::invalid(format!("invalid ip address in backend: {authority}")))?
        };

        if host.is_loopback() {
            return Err(TypesError::invalid(format!(
                "loopback address in backend: {host}"
            )));
        }
        Ok(())
    }
}

/// Host part of `ip`, `ip:port` or `[v6]:port`.
fn parse_host(authority: &str) -> Option<IpAddr> {
    if let Ok(addr) = authority.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    authority
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn valid_backends(backends: &[Backend], tls_passthrough: bool) -> TypesResult<()> {
    if backends.is_empty() {
        return Err(TypesError::invalid("backends list can not be empty"));
    }
    for backend in backends {
        backend.valid(tls_passthrough).map_err(|e| {
            TypesError::invalid(format!("failed to validate backend '{backend}': {e}"))
        })?;
    }
    Ok(())
}

fn write_backends(w: &mut dyn Write, tls_passthrough: bool, backends: &[Backend]) -> io::Result<()> {
    write!(w, "{tls_passthrough}")?;
    for backend in backends {
        write!(w, "{backend}")?;
    }
    Ok(())
}

/// Proxy for `<name>.<gateway domain>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayNameProxy {
    pub name: String,
    #[serde(default)]
    pub tls_passthrough: bool,
    pub backends: Vec<Backend>,
}

impl WorkloadData for GatewayNameProxy {
    fn valid(&self, _getter: &dyn WorkloadGetter) -> TypesResult<()> {
        if !PREFIX_RE.is_match(&self.name) {
            return Err(TypesError::invalid(format!(
                "invalid gateway name '{}'",
                self.name
            )));
        }
        valid_backends(&self.backends, self.tls_passthrough)
    }

    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.name)?;
        write_backends(w, self.tls_passthrough, &self.backends)
    }

    fn capacity(&self) -> TypesResult<Capacity> {
        Ok(Capacity::zero())
    }
}

/// Proxy for a tenant-owned fully qualified domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayFqdnProxy {
    pub fqdn: String,
    #[serde(default)]
    pub tls_passthrough: bool,
    pub backends: Vec<Backend>,
}

impl WorkloadData for GatewayFqdnProxy {
    fn valid(&self, _getter: &dyn WorkloadGetter) -> TypesResult<()> {
        if !FQDN_RE.is_match(&self.fqdn) {
            return Err(TypesError::invalid(format!("invalid fqdn '{}'", self.fqdn)));
        }
        if self.fqdn.ends_with('.') {
            return Err(TypesError::invalid("fqdn can't end with a dot"));
        }
        valid_backends(&self.backends, self.tls_passthrough)
    }

    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.fqdn)?;
        write_backends(w, self.tls_passthrough, &self.backends)
    }

    fn capacity(&self) -> TypesResult<Capacity> {
        Ok(Capacity::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::Deployment;

    #[test]
    fn backend_forms() {
        assert!(Backend("http://10.0.0.1:8080".into()).valid(false).is_ok());
        assert!(Backend("http://10.0.0.1".into()).valid(false).is_ok());
        assert!(Backend("http://[2a02::1]:80/path".into()).valid(false).is_ok());
        assert!(Backend("https://10.0.0.1".into()).valid(false).is_err());
        assert!(Backend("http://127.0.0.1:80".into()).valid(false).is_err());
        assert!(Backend("http://example.com".into()).valid(false).is_err());

        assert!(Backend("10.0.0.1:443".into()).valid(true).is_ok());
        assert!(Backend("10.0.0.1".into()).valid(true).is_err());
    }

    #[test]
    fn fqdn_rules() {
        let getter = Deployment::default();
        let mut gw = GatewayFqdnProxy {
            fqdn: "app.example.com".into(),
            tls_passthrough: false,
            backends: vec![Backend("http://10.0.0.1:80".into())],
        };
        assert!(gw.valid(&getter).is_ok());

        gw.fqdn = "app.example.com.".into();
        assert!(gw.valid(&getter).is_err());

        gw.fqdn = "app.example.com".into();
        gw.backends.clear();
        assert!(gw.valid(&getter).is_err());
    }

    #[test]
    fn name_proxy_rules() {
        let getter = Deployment::default();
        let gw = GatewayNameProxy {
            name: "Bad_Name".into(),
            tls_passthrough: false,
            backends: vec![Backend("http://10.0.0.1:80".into())],
        };
        assert!(gw.valid(&getter).is_err());
    }
}
