//! Global and per-source-host rate limiters built on [`TokenBucket`].
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::*;

use crate::rate::Rate;
use crate::token_bucket::TokenBucket;

/// Rate limiter host identity: the peer address without port.
///
/// IPv4-mapped IPv6 peers share a bucket with their IPv4 form.
pub fn host_key(peer: &SocketAddr) -> IpAddr {
    peer.ip().to_canonical()
}

// Both limiters keep plain numbers behind their locks and never panic
// while holding them, so a poisoned lock still guards consistent state.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One bucket shared by every connection to a listener.
#[derive(Debug)]
pub struct GlobalLimiter {
    rate: Rate,
    bucket: Mutex<TokenBucket>,
}

impl GlobalLimiter {
    pub fn new(rate: Rate, now: Instant) -> Self {
        Self {
            rate,
            bucket: Mutex::new(TokenBucket::new(rate, now)),
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn try_consume(&self, now: Instant) -> bool {
        lock(&self.bucket).try_consume(now)
    }
}

#[derive(Debug)]
struct HostEntry {
    bucket: TokenBucket,
    last_access: Instant,
}

#[derive(Debug)]
struct Hosts {
    entries: HashMap<IpAddr, HostEntry>,
    last_sweep: Instant,
}

impl Hosts {
    fn evict_idle(&mut self, now: Instant, idle_timeout: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, ent| now.saturating_duration_since(ent.last_access) < idle_timeout);
        self.last_sweep = now;
        before - self.entries.len()
    }
}

/// Independent token buckets keyed by source host.
///
/// Buckets are created full on the first connection from a host.
/// Entries idle for `idle_timeout` are dropped: at most once per
/// `idle_timeout` a lookup sweeps the whole map, so memory is bounded
/// by the hosts seen within roughly two idle windows.
///
/// `idle_timeout` is raised to at least the rate's period: a bucket idle
/// that long is full again, so dropping it admits nothing extra.
#[derive(Debug)]
pub struct HostLimiterRegistry {
    rate: Rate,
    idle_timeout: Duration,
    hosts: Mutex<Hosts>,
}

impl HostLimiterRegistry {
    pub fn new(rate: Rate, idle_timeout: Duration, now: Instant) -> Self {
        let idle_timeout = if idle_timeout < rate.period() {
            debug!(
                "host idle timeout {:?} raised to ratelimit period {:?}",
                idle_timeout,
                rate.period()
            );
            rate.period()
        } else {
            idle_timeout
        };
        Self {
            rate,
            idle_timeout,
            hosts: Mutex::new(Hosts {
                entries: HashMap::new(),
                last_sweep: now,
            }),
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn try_consume(&self, host: IpAddr, now: Instant) -> bool {
        let mut hosts = lock(&self.hosts);
        if now.saturating_duration_since(hosts.last_sweep) >= self.idle_timeout {
            let evicted = hosts.evict_idle(now, self.idle_timeout);
            if evicted > 0 {
                trace!("evicted {} idle host limiter(s)", evicted);
            }
        }
        let rate = self.rate;
        let entry = hosts.entries.entry(host).or_insert_with(|| HostEntry {
            bucket: TokenBucket::new(rate, now),
            last_access: now,
        });
        entry.last_access = entry.last_access.max(now);
        entry.bucket.try_consume(now)
    }

    /// Drop every entry idle for at least `idle_timeout`.
    ///
    /// Returns the number of evicted hosts.
    pub fn evict_idle(&self, now: Instant) -> usize {
        lock(&self.hosts).evict_idle(now, self.idle_timeout)
    }

    /// Number of tracked hosts
    pub fn len(&self) -> usize {
        lock(&self.hosts).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
