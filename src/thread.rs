use std::thread::{self, JoinHandle};

use crate::error::Error;

/// spawn `name`d thread performs `f`
pub fn spawn_thread<F, R>(name: &str, f: F) -> Result<JoinHandle<R>, Error>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    Ok(thread::Builder::new().name(name.into()).spawn(f)?)
}

/// join a thread, reporting a panic as `Error::Panicked`
pub fn join_thread<R>(handle: JoinHandle<R>) -> Result<R, Error> {
    let name = handle.thread().name().unwrap_or("<unnamed>").to_owned();
    handle.join().map_err(|_| Error::panicked(name))
}
