//! Agent wiring
//!
//! Builds the dispatcher, host loop, connection, interpreter and session
//! for one host and runs them until the server goes away or shutdown is
//! requested. Host-side work runs on a `LocalSet` on the calling thread;
//! socket I/O runs on the surrounding tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::LocalSet;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::host::{Dispatcher, HostBindings, HostLoop};
use crate::interpreter::Interpreter;
use crate::session::Session;
use crate::transport::{Connection, ConnectionEvent};

/// One agent bound to one host
pub struct Agent {
    config: Config,
    host: HostBindings,
}

impl Agent {
    pub fn new(config: Config, host: HostBindings) -> Self {
        Self { config, host }
    }

    /// Connect and serve until disconnected or `shutdown` is cancelled
    ///
    /// The returned future is not `Send`; await it on the thread that owns
    /// the host.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let local = LocalSet::new();
        local.run_until(self.serve(shutdown)).await
    }

    async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let dispatcher = Dispatcher::new();
        let host_loop = HostLoop::new(dispatcher.clone(), self.config.host.tick_interval());
        let stop_loop = host_loop.stop_token();
        let ticking = tokio::task::spawn_local(async move { host_loop.run().await });

        let connection = Arc::new(Connection::new(dispatcher));
        let mut events = connection
            .take_event_receiver()
            .ok_or_else(|| Error::Internal("connection events already taken".to_string()))?;
        let interpreter = Interpreter::new(self.host, self.config.timeouts.clone());
        let session = Session::new(Arc::clone(&connection), interpreter, &self.config);

        if let Err(e) = connection
            .connect(&self.config.server.url, Arc::new(session.clone()))
            .await
        {
            stop_loop.cancel();
            let _ = ticking.await;
            return Err(e);
        }

        let mut heartbeat = heartbeat_interval(self.config.session.heartbeat_interval_secs);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested");
                    connection.disconnect().await;
                    session.on_disconnected();
                    break;
                }
                event = events.recv() => match event {
                    Some(ConnectionEvent::Connected) => {
                        if let Err(e) = session.send_session_ready().await {
                            tracing::warn!("Failed to announce session: {}", e);
                        }
                    }
                    Some(ConnectionEvent::Error(message)) => {
                        tracing::warn!("Connection error: {}", message);
                    }
                    Some(ConnectionEvent::Disconnected) | None => {
                        session.on_disconnected();
                        break;
                    }
                },
                _ = next_heartbeat(&mut heartbeat) => {
                    if let Err(e) = session.send_heartbeat().await {
                        tracing::debug!("Heartbeat not sent: {}", e);
                    }
                }
            }
        }

        // Let a command that is already running finish before the host
        // loop goes away.
        session.wait_idle().await;
        stop_loop.cancel();
        ticking
            .await
            .map_err(|e| Error::Internal(format!("host loop task failed: {}", e)))?;

        tracing::info!("Agent stopped");
        Ok(())
    }
}

fn heartbeat_interval(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_heartbeat(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryHost;

    #[tokio::test(start_paused = true)]
    async fn test_zero_disables_heartbeat() {
        let mut disabled = heartbeat_interval(0);
        assert!(disabled.is_none());
        let idle = tokio::time::timeout(Duration::from_secs(3600), next_heartbeat(&mut disabled)).await;
        assert!(idle.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_waits_one_period() {
        let mut heartbeat = heartbeat_interval(30);
        let start = tokio::time::Instant::now();
        next_heartbeat(&mut heartbeat).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }

    #[tokio::test]
    async fn test_connect_failure_is_returned() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::default();
        config.server.url = format!("ws://{}/testbridge", listener.local_addr().unwrap());
        drop(listener);

        let host = Arc::new(MemoryHost::from_yaml("elements: []").unwrap());
        let agent = Agent::new(config, HostBindings::from_host(host));
        let err = agent.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
