//! OS signal handling.
//!
//! - SIGINT / SIGTERM: graceful shutdown; a second one exits immediately
//! - SIGHUP: configuration reload

use crate::lifecycle::Shutdown;

/// Listen for signals until the process ends.
pub async fn listen<F>(shutdown: Shutdown, on_reload: F)
where
    F: Fn() + Send + 'static,
{
    let mut signals = match Signals::install() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::warn!(error = %e, "Signal handlers unavailable");
            return;
        }
    };

    let mut stop_requests = 0u32;
    loop {
        match signals.next().await {
            Signal::Reload => {
                tracing::info!("SIGHUP received, reloading configuration");
                on_reload();
            }
            Signal::Stop(name) => {
                stop_requests += 1;
                if stop_requests > 1 {
                    tracing::warn!(signal = name, "Second stop signal, exiting immediately");
                    std::process::exit(130);
                }
                tracing::info!(signal = name, "Shutdown signal received");
                shutdown.trigger();
            }
        }
    }
}

enum Signal {
    Stop(&'static str),
    #[cfg_attr(not(unix), allow(dead_code))]
    Reload,
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::Stop("SIGINT"),
            _ = self.terminate.recv() => Signal::Stop("SIGTERM"),
            _ = self.hangup.recv() => Signal::Reload,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Signal {
        let _ = tokio::signal::ctrl_c().await;
        Signal::Stop("ctrl-c")
    }
}
