//! Connection admission control in front of a TCP proxy listener.
//!
//! Every accepted connection passes through an ordered set of checks
//! before the proxy sees it:
//!
//! 1. shutdown in progress
//! 2. global rate limit (token bucket shared by all clients)
//! 3. per-host rate limit (one token bucket per client address)
//! 4. access control list
//!
//! A connection failing any check is closed immediately; nothing is read
//! from or written to it.
//!
//! # Rate Limit
//!
//! Rates are token buckets with lazy refill: a bucket of capacity `N`
//! refilled at `N / period` tokens per second. Idle per-host buckets are
//! dropped after `host_idle_timeout`, so a returning host starts again
//! with a full bucket.
//!
//! # Usage
//!
//! ```rust
//! use std::net::{SocketAddr, TcpStream};
//! use std::{sync::Arc, time::Duration};
//! use portcullis::*;
//!
//! let mut config = ListenConfig::default();
//! config.listen = "127.0.0.1:0".parse().unwrap();
//! config.set_accept_timeout(Duration::from_millis(100));
//!
//! let handler = |_conn: TcpStream, peer: SocketAddr| println!("admitted: {}", peer);
//! let mut gate = Gate::bind(&config, Arc::new(AddressAcl::any()), handler).unwrap();
//! gate.start().unwrap();
//! assert_eq!(gate.state(), State::Running);
//! gate.stop().unwrap();
//! assert_eq!(gate.state(), State::Stopped);
//! ```

pub mod acceptor;
pub mod acl;
pub mod admission;
pub mod config;
pub mod error;
pub mod limiter;
pub mod rate;
pub mod raw_listener;
pub mod relay;
pub mod server;
pub mod shutdown;
mod thread;
pub mod token_bucket;

pub use acl::{Acl, AddressAcl, IpNet};
pub use admission::{AdmissionPipeline, Rejection, Verdict};
pub use config::*;
pub use error::Error;
pub use rate::Rate;
pub use relay::TcpRelay;
pub use server::*;
