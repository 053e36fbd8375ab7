use std::time::Duration;

use anyhow::{Result, Context, anyhow};
use clap::Parser;
use colored::{Colorize, ColoredString};
use hvac2modbus::{config::{tcp_target, MODBUS_TCP_PORT}, protocol::{addresses::*, registers::decode_temperature, settings::*}};
use tokio::net::lookup_host;
use tokio_modbus::{client::Context as ModbusContext, prelude::*};
use url::Url;


/// Dump the coils and holding registers of a running bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Modbus server of the bridge (tcp://host:port)
    target: Url,

    /// Unit id
    #[arg(long, default_value_t = 1)]
    unit: u8,

    /// Keep dumping at this interval instead of exiting after one dump
    #[arg(long)]
    watch_ms: Option<u64>,
}


fn name(address: u16) -> &'static str {
    match address {
        HOLDING_POWER_DEMAND => "power demand",
        HOLDING_TIMEOUT_COUNTER => "timeout counter",
        HOLDING_TEMPERATURE => "set temperature",
        HOLDING_POWER => "power",
        HOLDING_MODE => "mode",
        HOLDING_FAN => "fan",
        HOLDING_VANE => "vane",
        HOLDING_WIDE_VANE => "wide vane",
        HOLDING_CONNECTED => "connected",
        HOLDING_ROOM_TEMPERATURE => "room temperature",
        HOLDING_OPERATING => "operating",
        HOLDING_MILLIS_SINCE_LAST_COMMS => "ms since last comms",
        _ => "unknown"
    }
}

fn label<T>(table: &Table<T>, value: u16) -> Option<String> where
    T: Copy + PartialEq + Into<&'static str>
{
    table.label(value).map(str::to_string)
}

/// Decoded value, `None` if the register holds the invalid sentinel or an out of range index.
fn describe(address: u16, value: u16) -> Option<String> {
    match address {
        HOLDING_POWER_DEMAND | HOLDING_POWER => label(&POWER_TABLE, value),
        HOLDING_MODE => label(&MODE_TABLE, value),
        HOLDING_FAN => label(&FAN_TABLE, value),
        HOLDING_VANE => label(&VANE_TABLE, value),
        HOLDING_WIDE_VANE => label(&WIDE_VANE_TABLE, value),
        HOLDING_TEMPERATURE | HOLDING_ROOM_TEMPERATURE => Some(format!("{:.1}°C", decode_temperature(value))),
        HOLDING_CONNECTED | HOLDING_OPERATING => match value {
            0 => Some("no".to_string()),
            1 => Some("yes".to_string()),
            _ => None
        },
        HOLDING_MILLIS_SINCE_LAST_COMMS if value == INVALID_REGISTER => Some("never (or > 65534 ms)".to_string()),
        _ => Some(value.to_string())
    }
}

fn coloured(address: u16, line: String, valid: bool) -> ColoredString {
    if !valid {
        return line.on_red().bright_white();
    }

    match address {
        HOLDING_POWER_DEMAND => line.bright_cyan(),
        HOLDING_CONNECTED | HOLDING_MILLIS_SINCE_LAST_COMMS => line.bright_yellow(),
        _ => line.normal()
    }
}

async fn dump(ctx: &mut ModbusContext) -> Result<()> {
    let coils = ctx.read_coils(0, COILS_LEN).await?
        .map_err(|exception| anyhow!("coil read rejected: {exception:?}"))?;

    let registers = ctx.read_holding_registers(0, HOLDING_LEN).await?
        .map_err(|exception| anyhow!("holding register read rejected: {exception:?}"))?;

    for (address, value) in coils.iter().enumerate() {
        let desc = if address as u16 == COIL_RESET { "reset" } else { "reboot" };
        println!("{}", format!("coil    {address:2}: {desc: <20} {value}").dimmed());
    }

    for (address, value) in registers.iter().enumerate() {
        let address = address as u16;
        let decoded = describe(address, *value);
        let valid = decoded.is_some();

        let line = format!("holding {address:2}: {: <20} {value:5}  {}", name(address), decoded.unwrap_or_else(|| "invalid".to_string()));
        println!("{}", coloured(address, line, valid));
    }

    Ok(())
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let target = tcp_target(&args.target, Some(MODBUS_TCP_PORT))?;
    let addr = lookup_host(&target).await?
        .next()
        .with_context(|| format!("{target} resolved to no address"))?;

    let mut ctx = tcp::connect_slave(addr, Slave(args.unit)).await
        .with_context(|| format!("failed to connect to {addr}"))?;

    match args.watch_ms {
        None => dump(&mut ctx).await?,
        Some(interval) => loop {
            println!("{}", format!("--- {addr} ---").bold());
            dump(&mut ctx).await?;
            tokio::time::sleep(Duration::from_millis(interval)).await;
        }
    }

    ctx.disconnect().await?;

    Ok(())
}
