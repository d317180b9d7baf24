use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use derive_more::Display;

use crate::acl::Acl;
use crate::limiter::{host_key, GlobalLimiter, HostLimiterRegistry};
use crate::rate::Rate;
use crate::shutdown::ShutdownToken;

/// Why a connection was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Rejection {
    #[display(fmt = "shutting down")]
    ShuttingDown,
    #[display(fmt = "global ratelimit reached")]
    GlobalRateLimit,
    #[display(fmt = "per-host ratelimit reached")]
    HostRateLimit,
    #[display(fmt = "ACL failure")]
    AclDenied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

/// Checks applied to every accepted connection, in order:
///
/// 1. shutdown signal
/// 2. global ratelimit
/// 3. per-host ratelimit
/// 4. ACL
///
/// The first failing check decides; later checks are not consulted,
/// so a connection rejected by the global limit costs no per-host token.
pub struct AdmissionPipeline {
    shutdown: ShutdownToken,
    global: GlobalLimiter,
    per_host: HostLimiterRegistry,
    acl: Arc<dyn Acl>,
}

impl AdmissionPipeline {
    pub fn new(
        shutdown: ShutdownToken,
        global: Rate,
        per_host: Rate,
        host_idle_timeout: Duration,
        acl: Arc<dyn Acl>,
    ) -> Self {
        let now = Instant::now();
        Self {
            shutdown,
            global: GlobalLimiter::new(global, now),
            per_host: HostLimiterRegistry::new(per_host, host_idle_timeout, now),
            acl,
        }
    }

    pub fn global(&self) -> &GlobalLimiter {
        &self.global
    }

    pub fn per_host(&self) -> &HostLimiterRegistry {
        &self.per_host
    }

    pub fn admit(&self, peer: &SocketAddr, now: Instant) -> Verdict {
        use Rejection::*;
        if self.shutdown.is_signaled() {
            return Verdict::Reject(ShuttingDown);
        }
        if !self.global.try_consume(now) {
            return Verdict::Reject(GlobalRateLimit);
        }
        if !self.per_host.try_consume(host_key(peer), now) {
            return Verdict::Reject(HostRateLimit);
        }
        if !self.acl.allowed(peer) {
            return Verdict::Reject(AclDenied);
        }
        Verdict::Admit
    }
}
