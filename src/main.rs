use std::{net::SocketAddr, time::Duration};

use anyhow::{Result, Context, bail};
use clap::Parser;
use hvac2modbus::{
    bridge::{Bridge, Restart},
    bus,
    config::{self, BridgeConfig, DeviceEndpoint},
    peer::TcpModbusPeer,
    server, web,
};
use log::{error, info, warn};
use tokio::net::TcpListener;
use url::Url;


/// Bridges a heat pump to a Modbus TCP peer, with a local Modbus server and web UI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the heat pump
    ///
    /// sim://?room=21.5&failure_rate=0.0 runs against a simulated unit
    #[arg(long, default_value = "sim://")]
    device: Url,

    /// Modbus TCP peer to read the power demand from and write status to (tcp://host:port)
    #[arg(long)]
    peer: Option<Url>,

    /// Unit id used for requests to the peer
    #[arg(long, default_value_t = 1)]
    peer_unit: u8,

    /// Address and port the local Modbus server listens on
    #[arg(long, default_value = "0.0.0.0:502")]
    modbus_listen: SocketAddr,

    /// Do not run the local Modbus server
    #[arg(long)]
    no_modbus_server: bool,

    /// Address and port the web UI listens on
    #[arg(long, default_value = "0.0.0.0:80")]
    http_listen: SocketAddr,

    /// tcp://host:port that must accept connections while the network is up.
    /// Without a probe the network is assumed to be up.
    #[arg(long)]
    uplink_probe: Option<Url>,

    /// Restart after the network has been down this long
    #[arg(long, default_value_t = 20_000)]
    uplink_retry_ms: u64,

    /// Interval between power demand reads from the peer
    #[arg(long, default_value_t = 1000)]
    read_interval_ms: u64,

    /// Interval between status writes to the peer
    #[arg(long, default_value_t = 1000)]
    write_interval_ms: u64,

    /// Power demands older than this are not applied
    #[arg(long, default_value_t = 60)]
    freshness_secs: u64,

    /// Minimum interval between connect attempts
    #[arg(long, default_value_t = 1000)]
    reconnect_interval_ms: u64,

    /// Attempts per read/write before a link is considered down
    #[arg(long, default_value_t = 3)]
    io_attempts: u32,

    #[arg(long, default_value_t = 100)]
    io_retry_delay_ms: u64,

    /// Timeout of a single network request
    #[arg(long, default_value_t = 1000)]
    io_timeout_ms: u64,

    #[arg(long, default_value_t = 50)]
    loop_interval_ms: u64,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

impl Args {
    fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            uplink_retry_window: Duration::from_millis(self.uplink_retry_ms),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            peer_read_interval: Duration::from_millis(self.read_interval_ms),
            peer_write_interval: Duration::from_millis(self.write_interval_ms),
            freshness: Duration::from_secs(self.freshness_secs),
            io_attempts: self.io_attempts,
            io_retry_delay: Duration::from_millis(self.io_retry_delay_ms),
            loop_interval: Duration::from_millis(self.loop_interval_ms)
        }
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let io_timeout = Duration::from_millis(args.io_timeout_ms);

    let hp = DeviceEndpoint::parse(&args.device)?.open();

    let peer = match &args.peer {
        Some(url) => {
            let addr = config::resolve_peer(url).await?;
            info!("modbus peer {addr} (unit {})", args.peer_unit);
            Some(TcpModbusPeer::new(addr, args.peer_unit, io_timeout))
        },
        None => {
            warn!("no modbus peer configured, modbus client disabled");
            None
        }
    };

    let uplink = config::uplink(args.uplink_probe.as_ref(), io_timeout)?;

    let (handle, requests) = bus::channel(32);

    if !args.no_modbus_server {
        let listener = TcpListener::bind(args.modbus_listen).await
            .with_context(|| format!("failed to bind modbus server to {}", args.modbus_listen))?;

        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(err) = server::serve(listener, handle).await {
                error!("modbus server stopped: {err}");
            }
        });
    }

    let listener = TcpListener::bind(args.http_listen).await
        .with_context(|| format!("failed to bind http server to {}", args.http_listen))?;

    tokio::spawn(async move {
        if let Err(err) = web::serve(listener, handle).await {
            error!("http server stopped: {err:#}");
        }
    });

    let mut bridge = Bridge::new(args.bridge_config(), hp, peer, uplink, requests);
    let restart = bridge.run().await;

    // let the servers answer the request that triggered the restart
    if let Restart::Requested { .. } = restart {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    restart_process()
}

#[cfg(unix)]
fn restart_process() -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("failed to locate current executable")?;

    info!("re-executing {}", exe.display());

    let err = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .exec();

    bail!("failed to restart {}: {err}", exe.display())
}

#[cfg(not(unix))]
fn restart_process() -> Result<()> {
    bail!("restart required")
}
