//! Where a node agent accepts hub connections

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use tracing::warn;

/// Port a node listens on unless `NODE_PORT` says otherwise
pub const DEFAULT_PORT: u16 = 50000;

const ADDR_VAR: &str = "NODE_ADDR";
const PORT_VAR: &str = "NODE_PORT";

pub(crate) fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Listen address from `NODE_ADDR` and `NODE_PORT`
///
/// Unset or unparsable variables fall back to `0.0.0.0:50000`.
pub fn listen_addr() -> SocketAddr {
    listen_addr_from(|key| std::env::var(key).ok())
}

fn listen_addr_from(lookup: impl Fn(&str) -> Option<String>) -> SocketAddr {
    let ip = parse_or(ADDR_VAR, lookup(ADDR_VAR), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let port = parse_or(PORT_VAR, lookup(PORT_VAR), DEFAULT_PORT);
    SocketAddr::new(ip, port)
}

fn parse_or<T>(key: &str, value: Option<String>, fallback: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = value else {
        return fallback;
    };

    match value.trim().parse() {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("ignoring {key}={value:?}: {e}");
            fallback
        }
    }
}
