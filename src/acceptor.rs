use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::*;

use crate::admission::{AdmissionPipeline, Verdict};
use crate::error::Error;
use crate::raw_listener::{is_transient, RawListener};
use crate::shutdown::ShutdownToken;

/// Accept loop of one listener.
///
/// Every accept is bounded by `accept_timeout` so the shutdown signal
/// is observed even when no client connects.
pub struct Acceptor<L> {
    name: String,
    listener: L,
    pipeline: AdmissionPipeline,
    /// receive termination message
    shutdown: ShutdownToken,
    /// timeout for accept
    accept_timeout: Duration,
}

impl<L: RawListener> Acceptor<L> {
    pub fn new(
        name: String,
        listener: L,
        pipeline: AdmissionPipeline,
        shutdown: ShutdownToken,
        accept_timeout: Duration,
    ) -> Self {
        Self {
            name,
            listener,
            pipeline,
            shutdown,
            accept_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &AdmissionPipeline {
        &self.pipeline
    }

    /// Wait for the next admitted connection.
    ///
    /// Returns `Error::ShuttingDown` once shutdown is signaled, and any
    /// non-transient accept error as is. Rejected connections are closed
    /// without reading or writing anything.
    pub fn accept(&mut self) -> Result<(L::Stream, SocketAddr), Error> {
        loop {
            let accepted = self.listener.accept_timeout(self.accept_timeout);

            if self.shutdown.is_signaled() {
                if let Ok((strm, peer)) = accepted {
                    debug!("{}: shutting down: {}", self.name, peer);
                    drop(strm);
                }
                return Err(Error::ShuttingDown);
            }

            let (strm, peer) = match accepted {
                Ok(x) => x,
                Err(err) if is_transient(&err) => {
                    trace!("{}: accept: {}", self.name, err);
                    continue;
                }
                Err(err) => {
                    error!("{}: accept error: {}", self.name, err);
                    trace!("{}: accept error: {:?}", self.name, err);
                    return Err(err.into());
                }
            };

            match self.pipeline.admit(&peer, Instant::now()) {
                Verdict::Admit => return Ok((strm, peer)),
                Verdict::Reject(why) => {
                    debug!("{}: {}: {}", self.name, why, peer);
                    drop(strm);
                }
            }
        }
    }
}
