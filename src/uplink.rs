use std::time::Duration;

use log::debug;
use tokio::{net::TcpStream, time::timeout};

use crate::link::{Link, LinkError};


/// The network the bridge reaches its peers through.
///
/// Connecting probes reachability; the supervisor re-probes a connected
/// uplink every retry interval.
pub enum NetworkUplink {
    /// A TCP connect to `target` must succeed within `timeout`.
    TcpProbe {
        target: String,
        timeout: Duration
    },

    /// No probe configured: the uplink is assumed to be up.
    Unmonitored
}

impl Link for NetworkUplink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        match self {
            NetworkUplink::TcpProbe { target, timeout: limit } => {
                let stream = timeout(*limit, TcpStream::connect(target.as_str())).await
                    .map_err(|_| LinkError::Timeout(*limit))??;

                debug!("uplink probe to {target} ok ({:?})", stream.peer_addr().ok());
                Ok(())
            },
            NetworkUplink::Unmonitored => Ok(())
        }
    }

    async fn reset(&mut self) {}
}


#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();

        let mut uplink = NetworkUplink::TcpProbe { target, timeout: Duration::from_secs(1) };
        assert!(uplink.connect().await.is_ok());

        drop(listener);
        assert!(uplink.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_unmonitored_is_always_up() {
        assert!(NetworkUplink::Unmonitored.connect().await.is_ok());
    }
}
