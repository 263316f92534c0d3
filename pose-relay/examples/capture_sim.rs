//! Simulated capture device
//!
//! Connects to a running relay as a `mobile` peer, joins a room and streams
//! a synthetic landmark set at a fixed frame rate. Pair it with any display
//! client joined to the same room.
//!
//! ## Running
//!
//! ```bash
//! cargo run --bin pose-relay &
//! cargo run --example capture_sim -- ws://localhost:8080/ws AB12CD
//! ```

use std::time::Duration;

use pose_relay::client::{ConnectionState, PeerConfig, PeerEvent, RelayPeer};
use pose_relay::relay::protocol::{FrameMetadata, Landmark, PoseFrame};
use pose_relay::relay::DeviceClass;
use serde_json::{json, Map};

const FPS: u64 = 30;
const LANDMARKS: usize = 33;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "ws://localhost:8080/ws".to_string());
    let room = args.next().unwrap_or_else(|| "AB12CD".to_string());

    let config = PeerConfig::new(&url, DeviceClass::Mobile)?.with_room(room);
    let (peer, mut events) = RelayPeer::start(config);

    let mut ticker = tokio::time::interval(Duration::from_millis(1000 / FPS));
    let mut streaming = false;
    let mut frame = 0u64;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PeerEvent::StateChanged(state)) => {
                    tracing::info!(%state, "Peer state");
                    streaming = state == ConnectionState::InRoom;
                }
                Some(PeerEvent::Envelope(value)) if value["type"] == "pairing_success" => {
                    tracing::info!(room = %value["roomId"], "Paired with a display");
                }
                Some(PeerEvent::Failed { attempts }) => {
                    anyhow::bail!("relay unreachable after {attempts} attempts");
                }
                Some(_) => {}
                None => break,
            },
            _ = ticker.tick(), if streaming => {
                frame += 1;
                peer.send_frame(&synthetic_frame(frame))?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    peer.shutdown().await;
    Ok(())
}

fn synthetic_frame(frame: u64) -> PoseFrame {
    let phase = frame as f64 / FPS as f64;
    let landmarks = (0..LANDMARKS)
        .map(|i| {
            let offset = i as f64 / LANDMARKS as f64;
            Landmark {
                id: Some(json!(i)),
                x: 0.5 + 0.1 * (phase + offset).sin(),
                y: offset,
                z: 0.05 * (phase * 2.0).cos(),
                visibility: Some(0.95),
                extra: Map::new(),
            }
        })
        .collect();

    PoseFrame {
        landmarks,
        timestamp: chrono::Utc::now().timestamp_millis() as f64,
        metadata: Some(FrameMetadata {
            confidence: Some(0.9),
            fps: Some(FPS as f64),
            orientation: None,
            battery: None,
            extra: Map::new(),
        }),
        extra: Map::new(),
    }
}
