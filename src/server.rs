//! Local Modbus TCP server.
//!
//! Exposes the bridge's coils and holding registers to local clients.
//! Requests are forwarded over the [bus](crate::bus) and answered by the
//! bridge loop, so the register callbacks run on the loop's single thread
//! of control.
//!
//! | Table | Address | Access | Meaning |
//! |-------|---------|--------|---------|
//! | Coil | 0 | write | reset (write 1) |
//! | Coil | 1 | write | reboot (write 1) |
//! | Holding | 0 | read/write | power demand |
//! | Holding | 1..=11 | read | status, see [registers](crate::protocol::registers) |

use std::{io, net::SocketAddr};

use futures::{future::BoxFuture, FutureExt};
use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

use crate::bus::{BridgeGone, BridgeHandle};
use crate::protocol::registers::{RejectedRead, RejectedWrite};


pub struct BridgeModbusService {
    bridge: BridgeHandle
}

impl BridgeModbusService {
    pub fn new(bridge: BridgeHandle) -> Self {
        Self { bridge }
    }
}

fn read_exception(rejected: RejectedRead) -> ExceptionCode {
    warn!("client tried to read {rejected}");
    ExceptionCode::IllegalDataAddress
}

fn write_exception(rejected: RejectedWrite) -> ExceptionCode {
    warn!("client write rejected: {rejected}");
    match rejected {
        RejectedWrite::ReadOnly => ExceptionCode::IllegalFunction,
        RejectedWrite::UnknownAddress => ExceptionCode::IllegalDataAddress,
    }
}

fn gone(_: BridgeGone) -> ExceptionCode {
    error!("modbus request dropped: bridge loop is not running");
    ExceptionCode::ServerDeviceFailure
}

async fn handle(bridge: BridgeHandle, req: Request<'static>) -> Result<Response, ExceptionCode> {
    match req {
        Request::ReadCoils(addr, cnt) => {
            bridge.read_coils(addr, cnt).await
                .map_err(gone)?
                .map(Response::ReadCoils)
                .map_err(read_exception)
        },
        Request::WriteSingleCoil(addr, value) => {
            bridge.write_coils(addr, vec![value]).await
                .map_err(gone)?
                .map(|_| Response::WriteSingleCoil(addr, value))
                .map_err(write_exception)
        },
        Request::WriteMultipleCoils(addr, values) => {
            let cnt = values.len() as u16;
            bridge.write_coils(addr, values.into_owned()).await
                .map_err(gone)?
                .map(|_| Response::WriteMultipleCoils(addr, cnt))
                .map_err(write_exception)
        },
        Request::ReadHoldingRegisters(addr, cnt) => {
            bridge.read_holding(addr, cnt).await
                .map_err(gone)?
                .map(Response::ReadHoldingRegisters)
                .map_err(read_exception)
        },
        Request::WriteSingleRegister(addr, value) => {
            bridge.write_holding(addr, vec![value]).await
                .map_err(gone)?
                .map(|_| Response::WriteSingleRegister(addr, value))
                .map_err(write_exception)
        },
        Request::WriteMultipleRegisters(addr, values) => {
            let cnt = values.len() as u16;
            bridge.write_holding(addr, values.into_owned()).await
                .map_err(gone)?
                .map(|_| Response::WriteMultipleRegisters(addr, cnt))
                .map_err(write_exception)
        },
        _ => {
            error!("Exception::IllegalFunction - Unimplemented function code in request: {req:?}");
            Err(ExceptionCode::IllegalFunction)
        }
    }
}

impl tokio_modbus::server::Service for BridgeModbusService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("modbus request: {req:?}");

        handle(self.bridge.clone(), req).boxed()
    }
}


/// Serve Modbus TCP on `listener` until the listener fails.
pub async fn serve(listener: TcpListener, bridge: BridgeHandle) -> io::Result<()> {
    info!("modbus server listening on {}", listener.local_addr()?);

    let server = Server::new(listener);

    let on_connected = move |stream, socket_addr: SocketAddr| {
        let bridge = bridge.clone();

        async move {
            debug!("modbus client connected from {socket_addr}");
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(BridgeModbusService::new(bridge.clone())))
            })
        }
    };

    let on_process_error = |err| {
        error!("modbus server error: {err}");
    };

    server.serve(&on_connected, on_process_error).await
}
