use std::{net::SocketAddr, time::Duration};

use anyhow::{Result, Context, bail};
use tokio::net::lookup_host;
use url::Url;

use crate::heatpump::SimulatedHeatPump;
use crate::link::LinkPolicy;
use crate::uplink::NetworkUplink;


/// Default Modbus TCP port, used when a `tcp://` peer URL has none.
pub const MODBUS_TCP_PORT: u16 = 502;


/// Where the heat pump is reached.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEndpoint {
    /// `sim://?room=21.5&failure_rate=0.05`
    Simulated {
        room_temperature: f32,
        failure_rate: f64
    }
}

impl DeviceEndpoint {
    pub fn parse(url: &Url) -> Result<Self> {
        match url.scheme() {
            "sim" => {
                let mut room_temperature = 20.0;
                let mut failure_rate = 0.0;

                for (key, value) in url.query_pairs() {
                    match key.as_ref() {
                        "room" => room_temperature = value.parse()
                            .with_context(|| format!("invalid room temperature in {url}"))?,
                        "failure_rate" => failure_rate = value.parse()
                            .with_context(|| format!("invalid failure rate in {url}"))?,
                        other => bail!("unknown option {other} in {url}")
                    }
                }

                if !(0.0..=1.0).contains(&failure_rate) {
                    bail!("failure_rate must be between 0 and 1: {url}");
                }

                Ok(Self::Simulated { room_temperature, failure_rate })
            },
            "serial" => {
                bail!("no heat pump protocol driver for {url} is built into this binary, use sim://")
            },
            other => {
                bail!("url scheme {other} not supported");
            }
        }
    }

    pub fn open(&self) -> SimulatedHeatPump {
        match self {
            DeviceEndpoint::Simulated { room_temperature, failure_rate } => {
                let mut hp = SimulatedHeatPump::new(*room_temperature);
                hp.failure_rate = *failure_rate;
                hp
            }
        }
    }
}


/// `host:port` of a `tcp://host[:port]` URL.
pub fn tcp_target(url: &Url, default_port: Option<u16>) -> Result<String> {
    if url.scheme() != "tcp" {
        bail!("url scheme {} not supported, expected tcp://host:port", url.scheme());
    }

    let host = url.host_str()
        .with_context(|| format!("tcp requires a host to be specified in the url: {url}"))?;

    let port = url.port().or(default_port)
        .with_context(|| format!("tcp requires a port number to be specified in the url: {url}"))?;

    Ok(format!("{host}:{port}"))
}

/// Resolve a `tcp://host[:port]` Modbus peer URL.
pub async fn resolve_peer(url: &Url) -> Result<SocketAddr> {
    let target = tcp_target(url, Some(MODBUS_TCP_PORT))?;

    let addr = lookup_host(&target).await
        .with_context(|| format!("failed to resolve modbus peer {target}"))?
        .next()
        .with_context(|| format!("modbus peer {target} resolved to no address"));
    addr
}


/// Uplink reachability probe: `tcp://host:port`, or unmonitored when absent.
pub fn uplink(probe: Option<&Url>, io_timeout: Duration) -> Result<NetworkUplink> {
    match probe {
        Some(url) => Ok(NetworkUplink::TcpProbe {
            target: tcp_target(url, None)?,
            timeout: io_timeout
        }),
        None => Ok(NetworkUplink::Unmonitored)
    }
}


/// Timing of the bridge loop and its links.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Continuous uplink loss after which the bridge shuts the pump down and restarts.
    pub uplink_retry_window: Duration,

    /// Minimum time between two connect attempts (and between uplink probes).
    pub reconnect_interval: Duration,

    pub peer_read_interval: Duration,
    pub peer_write_interval: Duration,

    /// Maximum age of a peer power demand that may still be applied.
    pub freshness: Duration,

    /// Attempts per read/write before a link is marked down.
    pub io_attempts: u32,
    pub io_retry_delay: Duration,

    /// Idle time at the end of each loop iteration.
    pub loop_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            uplink_retry_window: Duration::from_millis(20_000),
            reconnect_interval: Duration::from_millis(1000),
            peer_read_interval: Duration::from_millis(1000),
            peer_write_interval: Duration::from_millis(1000),
            freshness: Duration::from_secs(60),
            io_attempts: 3,
            io_retry_delay: Duration::from_millis(100),
            loop_interval: Duration::from_millis(50)
        }
    }
}

impl BridgeConfig {
    fn link_policy(&self, fatal_after: Option<Duration>) -> LinkPolicy {
        LinkPolicy {
            retry_interval: self.reconnect_interval,
            attempts: self.io_attempts,
            attempt_delay: self.io_retry_delay,
            fatal_after
        }
    }

    pub fn uplink_policy(&self) -> LinkPolicy {
        self.link_policy(Some(self.uplink_retry_window))
    }

    pub fn peer_policy(&self) -> LinkPolicy {
        self.link_policy(None)
    }

    pub fn device_policy(&self) -> LinkPolicy {
        self.link_policy(None)
    }
}
