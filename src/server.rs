use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use derive_more::Display;
use log::*;

use crate::acceptor::Acceptor;
use crate::acl::Acl;
use crate::admission::AdmissionPipeline;
use crate::config::ListenConfig;
use crate::error::Error;
use crate::raw_listener::{self, RawListener};
use crate::shutdown::{self, ShutdownTrigger};
use crate::thread::{join_thread, spawn_thread};

/// Anything started and stopped like a proxy listener
pub trait Proxy {
    /// Begin serving in the background; returns immediately.
    fn start(&mut self) -> Result<(), Error>;
    /// Request shutdown and wait until serving has finished.
    fn stop(&mut self) -> Result<(), Error>;
}

/// Receives admitted connections.
///
/// `handle` runs on the accept thread, so it should hand the connection
/// off (e.g. to a new thread) rather than serve it inline.
pub trait ConnectionHandler<S>: Send + 'static {
    fn handle(&mut self, strm: S, peer: SocketAddr);
}

impl<S, F> ConnectionHandler<S> for F
where
    F: FnMut(S, SocketAddr) + Send + 'static,
{
    fn handle(&mut self, strm: S, peer: SocketAddr) {
        self(strm, peer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum State {
    /// constructed, not started
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

/// A listener guarded by the admission pipeline.
///
/// `start` spawns the accept thread; admitted connections are passed to
/// the handler. `stop` fires the shutdown signal and joins the thread.
pub struct Gate<L: RawListener, H> {
    name: String,
    local_addr: SocketAddr,
    /// moved to the accept thread on `start`
    serving: Option<(Acceptor<L>, H)>,
    /// send termination message to the acceptor
    trigger: ShutdownTrigger,
    handle: Option<JoinHandle<Result<(), Error>>>,
    state: State,
}

impl<H> Gate<TcpListener, H>
where
    H: ConnectionHandler<TcpStream>,
{
    /// Bind `config.listen` and build a ready-to-start gate.
    pub fn bind(config: &ListenConfig, acl: Arc<dyn Acl>, handler: H) -> Result<Self, Error> {
        let listener = raw_listener::bind(config.listen)?;
        Self::with_listener(listener, config, acl, handler)
    }
}

impl<L, H> Gate<L, H>
where
    L: RawListener + 'static,
    H: ConnectionHandler<L::Stream>,
{
    pub fn with_listener(
        listener: L,
        config: &ListenConfig,
        acl: Arc<dyn Acl>,
        handler: H,
    ) -> Result<Self, Error> {
        if config.accept_timeout.is_zero() {
            return Err(Error::invalid_timeout("accept timeout", config.accept_timeout));
        }
        let local_addr = listener.local_addr()?;
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| local_addr.to_string());
        let (trigger, token) = shutdown::channel();
        let ratelimit = &config.ratelimit;
        let pipeline = AdmissionPipeline::new(
            token.clone(),
            ratelimit.global,
            ratelimit.per_host,
            ratelimit.host_idle_timeout,
            acl,
        );
        let acceptor = Acceptor::new(
            name.clone(),
            listener,
            pipeline,
            token,
            config.accept_timeout,
        );
        Ok(Self {
            name,
            local_addr,
            serving: Some((acceptor, handler)),
            trigger,
            handle: None,
            state: State::Idle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> State {
        match &self.handle {
            // the loop can end on its own after a fatal accept error
            Some(handle) if self.state == State::Running && handle.is_finished() => State::Stopped,
            _ => self.state,
        }
    }
}

impl<L, H> Proxy for Gate<L, H>
where
    L: RawListener + 'static,
    H: ConnectionHandler<L::Stream>,
{
    fn start(&mut self) -> Result<(), Error> {
        let (acceptor, handler) = self
            .serving
            .take()
            .ok_or_else(|| Error::already_started(self.name.clone()))?;
        {
            let pipeline = acceptor.pipeline();
            info!("{}: starting on {}", self.name, self.local_addr);
            info!(
                "{}: ratelimit: global {}, per-host {}",
                self.name,
                pipeline.global().rate(),
                pipeline.per_host().rate()
            );
            for (kind, rate) in [
                ("global", pipeline.global().rate()),
                ("per-host", pipeline.per_host().rate()),
            ] {
                if !rate.admits_any() {
                    warn!(
                        "{}: {} ratelimit {} is below one connection: every connection will be rejected",
                        self.name, kind, rate
                    );
                }
            }
        }
        self.handle = Some(spawn_thread(&format!("accept:{}", self.name), move || {
            serve(acceptor, handler)
        })?);
        self.state = State::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        if self.state == State::Stopped {
            return Ok(());
        }
        self.state = State::ShuttingDown;
        trace!("{}: stopping accept thread...", self.name);
        self.trigger.fire();
        let result = match self.handle.take() {
            Some(handle) => join_thread(handle).and_then(|served| served),
            None => Ok(()),
        };
        self.serving = None;
        self.state = State::Stopped;
        info!("{}: shutdown", self.name);
        result
    }
}

/// accept loop: hand every admitted connection to `handler`
fn serve<L, H>(mut acceptor: Acceptor<L>, mut handler: H) -> Result<(), Error>
where
    L: RawListener,
    H: ConnectionHandler<L::Stream>,
{
    loop {
        match acceptor.accept() {
            Ok((strm, peer)) => {
                debug!("{}: accepted: {}", acceptor.name(), peer);
                handler.handle(strm, peer);
            }
            Err(Error::ShuttingDown) => {
                debug!("{}: accept loop finished", acceptor.name());
                return Ok(());
            }
            Err(err) => {
                error!("{}: accept loop aborted: {}", acceptor.name(), err);
                return Err(err);
            }
        }
    }
}

impl<L: RawListener, H> Drop for Gate<L, H> {
    fn drop(&mut self) {
        // a still running loop observes the closed channel and exits
        self.trigger.fire();
    }
}
