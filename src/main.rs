//! Connection admission daemon
//!
//! Portcullisd guards one or more TCP listeners with rate limits and
//! address ACLs, relaying admitted connections to their upstream.
//!
use std::io;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::*;

use portcullis::{self as pc, Proxy};

#[derive(Parser, Debug)]
#[command(name = "portcullisd", version)]
struct Opt {
    /// Log at debug level regardless of RUST_LOG and the config file
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Path to the configuration file (format: yaml)
    config: PathBuf,
}

fn set_handler(signals: &[i32], handler: impl Fn(i32) + Send + 'static) -> io::Result<()> {
    let mut signals = signal_hook::iterator::Signals::new(signals)?;
    std::thread::spawn(move || signals.forever().for_each(handler));
    Ok(())
}

fn init_logger(opt: &Opt, config: &pc::Config) {
    use env_logger::{Builder, Env};
    let mut builder = if opt.debug {
        let mut builder = Builder::new();
        builder.filter_level(LevelFilter::Debug);
        builder
    } else {
        let level = config.log_level.as_deref().unwrap_or("info");
        Builder::from_env(Env::default().default_filter_or(level))
    };
    builder.format_timestamp_micros().init();
}

fn main() -> anyhow::Result<()> {
    use signal_hook::consts::*;

    let opt = Opt::parse();
    let config = pc::Config::from_file(&opt.config)
        .with_context(|| format!("loading config: {}", opt.config.display()))?;
    init_logger(&opt, &config);
    info!("portcullisd {}", env!("CARGO_PKG_VERSION"));
    debug!("option: {:?}", opt);
    if config.listeners.is_empty() {
        warn!("no listeners configured");
    }

    let mut gates = vec![];
    for listen in &config.listeners {
        let relay = pc::TcpRelay::new(listen.upstream, listen.connect_timeout);
        let gate = pc::Gate::bind(listen, Arc::new(listen.acl()), relay)
            .with_context(|| format!("binding {}", listen.listen))?;
        gates.push(gate);
    }

    let (tx, rx) = mpsc::channel();
    set_handler(&[SIGTERM, SIGINT, SIGHUP, SIGQUIT], move |sig| {
        tx.send(sig).ok();
    })
    .context("setting signal handler")?;

    for gate in &mut gates {
        gate.start()
            .with_context(|| format!("starting {}", gate.name()))?;
    }

    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(sig) => {
                info!("signal received: {}", sig);
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if gates.iter().any(|gate| gate.state() == pc::State::Stopped) {
                    error!("listener stopped unexpectedly");
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let mut failed = false;
    for gate in &mut gates {
        if let Err(err) = gate.stop() {
            error!("{}: {}", gate.name(), err);
            failed = true;
        }
    }
    info!("shutdown complete");
    if failed {
        anyhow::bail!("listener failed");
    }
    Ok(())
}
