//! Source address access control.
//!
//! The admission pipeline only sees the [`Acl`] predicate; [`AddressAcl`]
//! is the allow/deny list implementation configured from YAML.
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use log::*;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Decides whether a peer may connect at all.
pub trait Acl: Send + Sync {
    fn allowed(&self, peer: &SocketAddr) -> bool;
}

impl<F> Acl for F
where
    F: Fn(&SocketAddr) -> bool + Send + Sync,
{
    fn allowed(&self, peer: &SocketAddr) -> bool {
        self(peer)
    }
}

/// ip network, e.g. 192.168.0.0/16
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNet {
    addr: IpAddr,
    prefix: u8,
}

impl IpNet {
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, Error> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix <= max {
            Ok(Self { addr, prefix })
        } else {
            Err(Error::InvalidPrefix { addr, prefix })
        }
    }

    /// network of exactly one address
    pub fn host(addr: IpAddr) -> Self {
        let prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        Self { addr, prefix }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.addr, addr.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let bmask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & bmask == u32::from(addr) & bmask
            }
            (IpAddr::V6(net), _) => match addr {
                IpAddr::V6(addr) => {
                    let bmask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                    u128::from(net) & bmask == u128::from(*addr) & bmask
                }
                IpAddr::V4(_) => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for IpNet {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((addr, prefix)) => {
                let addr = addr.trim().parse().map_err(|_| Error::invalid_address(s))?;
                let prefix = prefix.trim().parse().map_err(|_| Error::invalid_address(s))?;
                IpNet::new(addr, prefix)
            }
            None => s
                .trim()
                .parse()
                .map(IpNet::host)
                .map_err(|_| Error::invalid_address(s)),
        }
    }
}

impl Serialize for IpNet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpNet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Allow/deny lists of networks.
///
/// * a peer matching any `deny` network is rejected, even if it is allowed
/// * an empty `allow` list allows every peer not denied
///
/// # Example
/// ```
/// # use portcullis::acl::{Acl, AddressAcl};
/// let acl = AddressAcl::new(
///     vec!["192.168.0.0/16".parse().unwrap()],
///     vec!["192.168.9.0/24".parse().unwrap()],
/// );
/// assert!(acl.allowed(&"192.168.0.2:5000".parse().unwrap()));
/// assert!(!acl.allowed(&"192.168.9.2:5000".parse().unwrap()));
/// assert!(!acl.allowed(&"10.0.0.1:5000".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct AddressAcl {
    allow: Vec<IpNet>,
    deny: Vec<IpNet>,
}

impl AddressAcl {
    pub fn new(allow: Vec<IpNet>, deny: Vec<IpNet>) -> Self {
        Self { allow, deny }
    }

    /// allow all peers
    pub fn any() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, net: IpNet) -> &mut Self {
        self.allow.push(net);
        self
    }

    pub fn deny(&mut self, net: IpNet) -> &mut Self {
        self.deny.push(net);
        self
    }
}

impl Acl for AddressAcl {
    fn allowed(&self, peer: &SocketAddr) -> bool {
        let ip = peer.ip();
        if let Some(net) = self.deny.iter().find(|net| net.contains(&ip)) {
            trace!("match(deny): {}: {}", net, peer);
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        match self.allow.iter().find(|net| net.contains(&ip)) {
            Some(net) => {
                trace!("match(allow): {}: {}", net, peer);
                true
            }
            None => false,
        }
    }
}
