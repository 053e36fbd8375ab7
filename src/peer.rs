//! Client side of the bridge: the remote Modbus TCP peer (usually a PLC).
//!
//! The peer owns holding register 0 (power demand); the bridge writes its
//! status block into registers 1..=11 of the peer.

use std::{net::SocketAddr, time::Duration};

use log::debug;
use tokio::time::timeout;
use tokio_modbus::{client::Context, prelude::*};

use crate::link::{Link, LinkError};
use crate::protocol::addresses::*;


#[allow(async_fn_in_trait)]
pub trait ModbusPeer: Link {
    /// Read the power demand register.
    async fn read_demand(&mut self) -> Result<u16, LinkError>;

    /// Write the status registers, starting at [HOLDING_READ_COUNT].
    async fn write_status(&mut self, values: &[u16; HOLDING_WRITE_COUNT]) -> Result<(), LinkError>;
}


pub struct TcpModbusPeer {
    addr: SocketAddr,
    unit: Slave,
    timeout: Duration,
    ctx: Option<Context>,
}

impl TcpModbusPeer {
    pub fn new(addr: SocketAddr, unit: u8, timeout: Duration) -> Self {
        Self {
            addr,
            unit: Slave(unit),
            timeout,
            ctx: None
        }
    }

    fn context(&mut self) -> Result<&mut Context, LinkError> {
        self.ctx.as_mut().ok_or(LinkError::NotConnected)
    }
}

fn flatten<T>(result: Result<tokio_modbus::Result<T>, tokio::time::error::Elapsed>, limit: Duration) -> Result<T, LinkError> {
    match result {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(exception))) => Err(LinkError::Exception(format!("{exception:?}"))),
        Ok(Err(err)) => Err(LinkError::Transport(err.to_string())),
        Err(_) => Err(LinkError::Timeout(limit)),
    }
}

impl Link for TcpModbusPeer {
    async fn connect(&mut self) -> Result<(), LinkError> {
        debug!("connecting to modbus peer {}", self.addr);

        let ctx = timeout(self.timeout, tcp::connect_slave(self.addr, self.unit)).await
            .map_err(|_| LinkError::Timeout(self.timeout))??;

        self.ctx = Some(ctx);
        Ok(())
    }

    async fn reset(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            let _ = ctx.disconnect().await;
        }
    }
}

impl ModbusPeer for TcpModbusPeer {
    async fn read_demand(&mut self) -> Result<u16, LinkError> {
        let limit = self.timeout;
        let ctx = self.context()?;

        let values = flatten(timeout(limit, ctx.read_holding_registers(HOLDING_POWER_DEMAND, HOLDING_READ_COUNT)).await, limit)?;

        values.first()
            .copied()
            .ok_or_else(|| LinkError::Transport("empty register response".to_string()))
    }

    async fn write_status(&mut self, values: &[u16; HOLDING_WRITE_COUNT]) -> Result<(), LinkError> {
        let limit = self.timeout;
        let ctx = self.context()?;

        flatten(timeout(limit, ctx.write_multiple_registers(HOLDING_READ_COUNT, values)).await, limit)
    }
}
