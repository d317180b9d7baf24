//! One-shot shutdown signal.
//!
//! The signal is the closing of a channel: once the trigger is fired (or
//! dropped) every token observes it on every later check. No message is
//! ever sent, so checks never consume the signal.
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};

use log::*;

use crate::error::Error;

/// Create a connected trigger/token pair.
pub fn channel() -> (ShutdownTrigger, ShutdownToken) {
    let (tx, rx) = mpsc::sync_channel(0);
    (
        ShutdownTrigger { tx: Some(tx) },
        ShutdownToken {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: Option<SyncSender<()>>,
}

impl ShutdownTrigger {
    /// Signal shutdown. Firing more than once is a no-op.
    pub fn fire(&mut self) {
        if self.tx.take().is_some() {
            trace!("shutdown signaled");
        }
    }

    pub fn is_fired(&self) -> bool {
        self.tx.is_none()
    }
}

/// Non-blocking view of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: Arc<Mutex<Receiver<()>>>,
}

impl ShutdownToken {
    fn check(&self) -> Result<bool, Error> {
        match self.rx.lock()?.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => Ok(true),
            Err(TryRecvError::Empty) => Ok(false),
        }
    }

    /// Has shutdown been requested?
    ///
    /// A poisoned token counts as signaled.
    pub fn is_signaled(&self) -> bool {
        self.check().unwrap_or_else(|err| {
            warn!("shutdown token: {}", err);
            true
        })
    }
}
