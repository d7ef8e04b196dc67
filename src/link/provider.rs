//! Network association providers
//!
//! A provider turns the machine's commands into real association attempts and
//! reports the outcome later as [`LinkSignal`]s through the supervisor queue.
//! No provider method may block the caller.

use super::machine::LinkSignal;
use crate::supervisor::SignalSender;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Credentials for the network the device associates with
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkCredentials {
    pub network_id: String,
    pub secret: Option<String>,
}

impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("network_id", &self.network_id)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Network association provider
///
/// Completion of every call arrives later as a [`LinkSignal`], never as a
/// return value.
pub trait NetworkProvider: Send {
    /// Bring the radio up; answered by [`LinkSignal::Started`]
    fn start(&mut self);

    /// Associate after `delay`; answered by `AddressAcquired` or `Lost`
    fn associate(&mut self, attempt: u32, delay: Duration);

    /// Drop the association and stop reporting
    fn stop(&mut self);
}

/// Provider for hosts where the OS owns the interface
///
/// "Association" means obtaining a routable local address towards the probe
/// target. Once up, the route is re-probed periodically and a failed probe is
/// reported as a loss.
pub struct HostNetworkProvider {
    credentials: NetworkCredentials,
    probe_target: String,
    probe_interval: Duration,
    signals: SignalSender,
    task: Option<JoinHandle<()>>,
}

impl HostNetworkProvider {
    pub fn new(
        credentials: NetworkCredentials,
        probe_target: impl Into<String>,
        probe_interval: Duration,
        signals: SignalSender,
    ) -> Self {
        Self {
            credentials,
            probe_target: probe_target.into(),
            probe_interval,
            signals,
            task: None,
        }
    }

    fn replace_task(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.task.replace(task) {
            previous.abort();
        }
    }
}

impl NetworkProvider for HostNetworkProvider {
    fn start(&mut self) {
        info!(network_id = %self.credentials.network_id, "Starting network interface");
        let signals = self.signals.clone();
        self.replace_task(tokio::spawn(async move {
            signals.link(LinkSignal::Started);
        }));
    }

    fn associate(&mut self, attempt: u32, delay: Duration) {
        info!(
            network_id = %self.credentials.network_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Associating"
        );

        let signals = self.signals.clone();
        let target = self.probe_target.clone();
        let interval = self.probe_interval;

        self.replace_task(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            match probe_local_address(&target).await {
                Ok(address) => {
                    debug!(%address, %target, "Route to probe target available");
                    signals.link(LinkSignal::AddressAcquired(address));
                }
                Err(e) => {
                    warn!(%target, error = %e, "Association probe failed");
                    signals.link(LinkSignal::Lost);
                    return;
                }
            }

            monitor_route(&target, interval, &signals).await;
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!(network_id = %self.credentials.network_id, "Network interface stopped");
    }
}

impl Drop for HostNetworkProvider {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Re-probe until the route disappears, then report the loss once
async fn monitor_route(target: &str, interval: Duration, signals: &SignalSender) {
    loop {
        tokio::time::sleep(interval).await;
        if let Err(e) = probe_local_address(target).await {
            warn!(%target, error = %e, "Route to probe target lost");
            signals.link(LinkSignal::Lost);
            return;
        }
    }
}

/// Local address the OS would use to reach `target`
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub async fn probe_local_address(target: &str) -> io::Result<IpAddr> {
    let remote = tokio::net::lookup_host(target)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "probe target did not resolve"))?;

    let bind_addr = if remote.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(remote).await?;

    let address = socket.local_addr()?.ip();
    if address.is_unspecified() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no local address for probe target",
        ));
    }
    Ok(address)
}
