//! Request bus into the bridge loop.
//!
//! The Modbus server and HTTP tasks never touch device state themselves.
//! They hold a [BridgeHandle] and post requests on the bus; the bridge
//! loop drains it once per iteration and answers each request on its own
//! oneshot channel. This keeps the bridge loop the single writer of the
//! device settings and pending command.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::registers::{RejectedRead, RejectedWrite};


/// Resolved template variables for one page render.
pub type PageVariables = BTreeMap<&'static str, String>;

/// Form fields of an HTTP request (query string or body).
pub type FormFields = HashMap<String, String>;

#[derive(Debug)]
pub enum BridgeRequest {
    ReadCoils {
        address: u16,
        count: u16,
        reply: oneshot::Sender<Result<Vec<bool>, RejectedRead>>
    },
    WriteCoils {
        address: u16,
        values: Vec<bool>,
        reply: oneshot::Sender<Result<(), RejectedWrite>>
    },
    ReadHolding {
        address: u16,
        count: u16,
        reply: oneshot::Sender<Result<Vec<u16>, RejectedRead>>
    },
    WriteHolding {
        address: u16,
        values: Vec<u16>,
        reply: oneshot::Sender<Result<(), RejectedWrite>>
    },
    Page {
        form: FormFields,
        reply: oneshot::Sender<PageVariables>
    },
}


#[derive(Error, Debug)]
#[error("bridge loop is not running")]
pub struct BridgeGone;


/// Sending side of the bus. Cheap to clone, one per server task.
#[derive(Clone)]
pub struct BridgeHandle {
    requests: mpsc::Sender<BridgeRequest>
}

/// Receiving side of the bus, owned by the bridge loop.
pub struct BridgeRequests {
    requests: mpsc::Receiver<BridgeRequest>
}

pub fn channel(capacity: usize) -> (BridgeHandle, BridgeRequests) {
    let (send, recv) = mpsc::channel(capacity);

    (BridgeHandle { requests: send }, BridgeRequests { requests: recv })
}

impl BridgeHandle {
    async fn call<T>(&self, request: impl FnOnce(oneshot::Sender<T>) -> BridgeRequest) -> Result<T, BridgeGone> {
        let (reply, response) = oneshot::channel();

        self.requests.send(request(reply)).await.map_err(|_| BridgeGone)?;

        response.await.map_err(|_| BridgeGone)
    }

    pub async fn read_coils(&self, address: u16, count: u16) -> Result<Result<Vec<bool>, RejectedRead>, BridgeGone> {
        self.call(|reply| BridgeRequest::ReadCoils { address, count, reply }).await
    }

    pub async fn write_coils(&self, address: u16, values: Vec<bool>) -> Result<Result<(), RejectedWrite>, BridgeGone> {
        self.call(|reply| BridgeRequest::WriteCoils { address, values, reply }).await
    }

    pub async fn read_holding(&self, address: u16, count: u16) -> Result<Result<Vec<u16>, RejectedRead>, BridgeGone> {
        self.call(|reply| BridgeRequest::ReadHolding { address, count, reply }).await
    }

    pub async fn write_holding(&self, address: u16, values: Vec<u16>) -> Result<Result<(), RejectedWrite>, BridgeGone> {
        self.call(|reply| BridgeRequest::WriteHolding { address, values, reply }).await
    }

    pub async fn page(&self, form: FormFields) -> Result<PageVariables, BridgeGone> {
        self.call(|reply| BridgeRequest::Page { form, reply }).await
    }
}

impl BridgeRequests {
    /// Next queued request, without waiting.
    pub fn try_next(&mut self) -> Option<BridgeRequest> {
        self.requests.try_recv().ok()
    }
}
