//! The run loop (§5): a single Tokio task owns the [`Engine`] exclusively
//! and drives it from three sources — inbound bus frames, operator gateway
//! events, and a housekeeping tick — applying every [`EngineAction`] it
//! returns before moving on to the next event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;

use canmaster_proto::Frame;

use crate::bus::BusPort;
use crate::engine::{Engine, EngineAction};
use crate::gateway::{GatewayEvent, GatewayRegistry};
use crate::storage::Storage;

/// How often [`Engine::process_tick`] runs when the bus is quiet.
const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Capacity of the gateway event channel.
const GATEWAY_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Run the engine loop until `bus` closes. Owns `engine` and `gateway` for
/// the duration of the run; nothing else touches engine state (§4.3: no
/// internal locking, one writer).
pub async fn run<S: Storage, B: BusPort>(
    mut engine: Engine<S>,
    mut bus: B,
    gateway: Arc<GatewayRegistry>,
    mut gateway_events: mpsc::Receiver<GatewayEvent>,
    now_fn: impl Fn() -> u64,
) {
    let mut tick = interval(TICK_INTERVAL);
    tick.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            frame = bus.recv() => {
                match frame {
                    Some(frame) => {
                        let now = now_fn();
                        let actions = engine.process_bus_frame(&frame, now);
                        apply_actions(&bus, &gateway, actions).await;
                    }
                    None => {
                        tracing::warn!("bus channel closed, stopping engine loop");
                        return;
                    }
                }
            }
            event = gateway_events.recv() => {
                match event {
                    Some(GatewayEvent::Connected { session_id }) => {
                        let message = engine.on_gateway_connect();
                        gateway.send_to(session_id, &message).await;
                    }
                    Some(GatewayEvent::Message { session_id, message }) => {
                        let now = now_fn();
                        let actions = engine.process_gateway_msg(session_id, message, now);
                        apply_actions(&bus, &gateway, actions).await;
                    }
                    Some(GatewayEvent::Disconnected { .. }) => {}
                    None => {
                        tracing::warn!("gateway event channel closed, stopping engine loop");
                        return;
                    }
                }
            }
            _ = tick.tick() => {
                let now = now_fn();
                let actions = engine.process_tick(now);
                apply_actions(&bus, &gateway, actions).await;
            }
        }
    }
}

async fn apply_actions<B: BusPort>(bus: &B, gateway: &GatewayRegistry, actions: Vec<EngineAction>) {
    for action in actions {
        apply_action(bus, gateway, action).await;
    }
}

async fn apply_action<B: BusPort>(bus: &B, gateway: &GatewayRegistry, action: EngineAction) {
    match action {
        EngineAction::SendBusFrame(frame) => send_bus_frame(bus, frame).await,
        EngineAction::SendGateway { session_id, message } => gateway.send_to(session_id, &message).await,
        EngineAction::BroadcastGateway(message) => gateway.broadcast(&message).await,
    }
}

async fn send_bus_frame<B: BusPort>(bus: &B, frame: Frame) {
    bus.send(frame).await;
}
