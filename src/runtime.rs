// RPC runtime
// Receives `{id, func, args}` requests over zenoh, runs each one on its own
// task and publishes one reply per request.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::interval; // tokio is an async runtime for Rust
use tracing::{debug, info, warn};

// local imports
use crate::config::{REQUEST_POLL_PERIOD, TOPIC_RPC_REPLY, TOPIC_RPC_REQUEST};
use crate::dispatch::dispatch;
use crate::messages::{RpcReply, RpcRequest};
use crate::motor::MotorDriver;

/// Decode one request payload, run it and build the reply
pub async fn handle_request(driver: &MotorDriver, payload: &[u8]) -> RpcReply {
    let request = match serde_json::from_slice::<RpcRequest>(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to parse request: {}", e);
            return RpcReply::failure(0, format!("Invalid request: {}", e), "InvalidRequest");
        }
    };

    match dispatch(driver, &request.func, &request.args).await {
        Ok(result) => RpcReply::success(request.id, result),
        Err(e) => {
            warn!("Request {} failed: {}", request.id, e);
            let status = e.status().and_then(|status| serde_json::to_value(status).ok());
            RpcReply::failure(request.id, e.to_string(), e.kind()).with_status(status)
        }
    }
}

pub async fn run(driver: Arc<MotorDriver>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_RPC_REQUEST).await?;
    let pub_reply = session.declare_publisher(TOPIC_RPC_REPLY).await?;

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<RpcReply>();
    let mut tick = interval(REQUEST_POLL_PERIOD);

    info!("Subscribed to: {}", TOPIC_RPC_REQUEST);
    info!("Publishing to: {}", TOPIC_RPC_REPLY);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                // Drain all pending requests (non-blocking), one task each
                while let Ok(Some(sample)) = subscriber.try_recv() {
                    let payload = sample.payload().to_bytes().into_owned();
                    let driver = driver.clone();
                    let reply_tx = reply_tx.clone();
                    tokio::spawn(async move {
                        let reply = handle_request(&driver, &payload).await;
                        // Receiver only goes away when the runtime stops
                        let _ = reply_tx.send(reply);
                    });
                }
            }
            Some(reply) = reply_rx.recv() => {
                debug!("Reply {}: ok={}", reply.id, reply.ok);
                let reply_json = serde_json::to_string(&reply)?;
                pub_reply.put(reply_json).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBus;
    use crate::config::BusConfig;
    use crate::motor::Registry;
    use serde_json::json;

    fn driver() -> (Arc<MockBus>, MotorDriver) {
        let bus = Arc::new(MockBus::new());
        let registry = Registry::new(&BusConfig::default()).unwrap();
        (bus.clone(), MotorDriver::new(registry, bus))
    }

    #[tokio::test]
    async fn test_handle_request_success() {
        let (bus, driver) = driver();
        let payload = json!({"id": 7, "func": "home", "args": ["Z"]}).to_string();

        let reply = handle_request(&driver, payload.as_bytes()).await;
        assert_eq!(reply, RpcReply::success(7, serde_json::Value::Null));
        assert_eq!(bus.writes_to(0x09), vec![vec![0x10]]);
    }

    #[tokio::test]
    async fn test_handle_request_reports_kind() {
        let (bus, driver) = driver();
        bus.push_response(0x08, &[0x0F, 0x00, 0x00]);
        let payload = json!({"id": 8, "func": "getMiscState", "args": ["R"]}).to_string();

        let reply = handle_request(&driver, payload.as_bytes()).await;
        assert!(!reply.ok);
        assert_eq!(reply.id, 8);
        assert_eq!(reply.kind.as_deref(), Some("ProtocolMismatch"));
        assert_eq!(reply.status, None);
    }

    #[tokio::test]
    async fn test_handle_request_fault_carries_status() {
        let (bus, driver) = driver();
        bus.push_response(0x09, &[0x53, 0x00, 0x2A]);
        let payload = json!({"id": 9, "func": "getStatus", "args": ["Z"]}).to_string();

        let reply = handle_request(&driver, payload.as_bytes()).await;
        assert!(!reply.ok);
        assert_eq!(reply.kind.as_deref(), Some("MotorFault"));
        let status = reply.status.expect("fault reply carries the status");
        assert_eq!(status["name"], "Z");
        assert_eq!(status["pos"], 42);
        assert_eq!(status["homed"], true);
        // Every motor was reset
        assert_eq!(bus.writes_to(0x08), vec![vec![0x14]]);
    }

    #[tokio::test]
    async fn test_handle_request_malformed() {
        let (_bus, driver) = driver();
        let reply = handle_request(&driver, b"not json").await;
        assert!(!reply.ok);
        assert_eq!(reply.kind.as_deref(), Some("InvalidRequest"));
    }
}
