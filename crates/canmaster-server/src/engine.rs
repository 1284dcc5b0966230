//! The engine: ties the Sans-IO domain logic together with the Definition
//! Registry and the persistence layer, and exposes the action-pattern
//! entry points a single Tokio task drives (§5). Grounded on the teacher's
//! `ServerDriver` in `lockframe-server::driver`.

use std::path::Path;

use canmaster_core::model::parse_node_id_hex;
use canmaster_core::{config_writer, housekeeping, interview, EngineError, Inventory, NodeId};
use canmaster_proto::gateway::{InboundMessage, OutboundMessage};
use canmaster_proto::Frame;

use crate::definitions::DefinitionRegistry;
use crate::error::ServerError;
use crate::snapshot::{audit_rows, node_snapshots};
use crate::storage::Storage;

/// Effects a caller must carry out after one `Engine` call returns.
#[derive(Debug, Clone)]
pub enum EngineAction {
    /// Transmit a frame on the CAN bus.
    SendBusFrame(Frame),
    /// Send a message to one operator connection.
    SendGateway {
        /// The connection to address.
        session_id: u64,
        /// The message to send.
        message: OutboundMessage,
    },
    /// Send a message to every connected operator.
    BroadcastGateway(OutboundMessage),
}

/// Orchestrates the Inventory Store, the interview state machine, the
/// config writer, housekeeping timers, and the persistence layer. Owned
/// exclusively by the server's engine task; no internal locking (§4.3).
pub struct Engine<S: Storage> {
    inventory: Inventory,
    definitions: DefinitionRegistry,
    housekeeping: housekeeping::HousekeepingTimers,
    storage: S,
    master_id: NodeId,
}

impl<S: Storage> Engine<S> {
    /// Restore the inventory from `storage` and build an engine ready to
    /// process frames.
    ///
    /// The definition registry is seeded from `definitions_csv` if given —
    /// in which case the ingested rows are also persisted to `storage`'s
    /// `message_definitions` table — or otherwise from whatever was
    /// persisted there on a previous run.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the inventory can't be loaded, the CSV
    /// can't be read, or the persisted definitions can't be read back.
    pub fn restore(
        storage: S,
        master_id: NodeId,
        now: u64,
        definitions_csv: Option<&Path>,
    ) -> Result<Self, ServerError> {
        let mut inventory = Inventory::new();
        for node in storage.load_all_nodes()? {
            let slot = inventory.get_or_create(node.node_id, node.node_type_msg, node.first_seen);
            *slot = node;
        }

        let definitions = match definitions_csv {
            Some(path) => {
                let registry = DefinitionRegistry::load_from_csv(path)?;
                storage.replace_definitions(&registry.all())?;
                registry
            }
            None => DefinitionRegistry::from_definitions(storage.load_definitions()?),
        };

        Ok(Self {
            inventory,
            definitions,
            housekeeping: housekeeping::HousekeepingTimers::new(now),
            storage,
            master_id,
        })
    }

    /// The message a freshly connected operator should receive immediately:
    /// the full inventory snapshot (§4.7).
    #[must_use]
    pub fn on_gateway_connect(&self) -> OutboundMessage {
        self.database_update()
    }

    fn database_update(&self) -> OutboundMessage {
        OutboundMessage::DatabaseUpdate { payload: node_snapshots(&self.inventory.snapshot_all()) }
    }

    fn audit_log_update(&self) -> OutboundMessage {
        let rows = self.storage.recent_audit_with_comments(canmaster_proto::gateway::AUDIT_LOG_PAGE_SIZE);
        OutboundMessage::AuditLogUpdate { payload: audit_rows(&rows.unwrap_or_default()) }
    }

    fn housekeeping_actions(&mut self, now: u64) -> Vec<EngineAction> {
        self.housekeeping.check(self.master_id, now).into_iter().map(EngineAction::SendBusFrame).collect()
    }

    /// Process one inbound CAN frame (§4.4, §4.6).
    pub fn process_bus_frame(&mut self, frame: &Frame, now: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if canmaster_core::ids::NODE_INTRO_RANGE.contains(&frame.id()) {
            match interview::handle_node_intro(&mut self.inventory, frame.id(), frame.data(), now) {
                Ok(outcome) => {
                    if let Err(e) =
                        self.storage.commit_node_intro(&outcome.node, outcome.drift_snapshot.as_ref())
                    {
                        tracing::error!(error = %e, node_id = %outcome.node.node_id, "failed to persist node-intro");
                    }
                    actions.push(EngineAction::BroadcastGateway(self.database_update()));
                    if let Some(ack) = outcome.ack {
                        actions.push(EngineAction::SendBusFrame(ack));
                    }
                }
                Err(e) => log_dropped_frame(&e, frame),
            }
        } else if canmaster_core::ids::SUBMOD_INTRO_RANGE.contains(&frame.id()) {
            match interview::handle_submodule_intro(&mut self.inventory, frame.id(), frame.data(), now) {
                Ok(outcome) => {
                    if outcome.newly_completed {
                        if let Err(e) = self.storage.commit_node_intro(&outcome.node, None) {
                            tracing::error!(error = %e, node_id = %outcome.node.node_id, "failed to persist sub-module completion");
                        }
                        actions.push(EngineAction::BroadcastGateway(self.database_update()));
                    }
                    if let Some(ack) = outcome.ack {
                        actions.push(EngineAction::SendBusFrame(ack));
                    }
                }
                Err(e) => log_dropped_frame(&e, frame),
            }
        } else {
            actions.push(EngineAction::BroadcastGateway(self.decode_live_message(frame, now)));
        }

        actions.extend(self.housekeeping_actions(now));
        actions
    }

    fn decode_live_message(&self, frame: &Frame, now: u64) -> OutboundMessage {
        let name = self
            .definitions
            .name_for(u32::from(frame.id()))
            .unwrap_or(canmaster_proto::gateway::UNKNOWN_MESSAGE_NAME)
            .to_string();
        OutboundMessage::CanMessage {
            id: frame.id(),
            name,
            data: frame.data().to_vec(),
            timestamp: now,
        }
    }

    /// Process one inbound operator message (§4.7).
    pub fn process_gateway_msg(
        &mut self,
        session_id: u64,
        msg: InboundMessage,
        now: u64,
    ) -> Vec<EngineAction> {
        match msg {
            InboundMessage::UpdateNodeConfig { node_id, payload } => {
                self.handle_update_node_config(session_id, &node_id, &payload, now)
            }
            InboundMessage::RequestNodeInterview { node_id } => {
                self.handle_request_node_interview(&node_id)
            }
            InboundMessage::SaveAuditComment { audit_id, comment } => {
                self.handle_save_audit_comment(audit_id, &comment)
            }
            InboundMessage::GetDefinitions => {
                vec![EngineAction::SendGateway {
                    session_id,
                    message: OutboundMessage::DefinitionsList { payload: self.definitions.all() },
                }]
            }
            InboundMessage::SaveToBus { node_id } => {
                // Reserved: the wire protocol names this message but leaves its
                // persist semantics unspecified. Logged and otherwise ignored.
                tracing::warn!(node_id, "SAVE_TO_BUS has no defined behavior; ignoring");
                Vec::new()
            }
            InboundMessage::RemoveNode { node_id } => self.handle_remove_node(&node_id),
        }
    }

    fn handle_remove_node(&mut self, node_id_hex: &str) -> Vec<EngineAction> {
        let Ok(node_id) = parse_node_id_hex(node_id_hex) else {
            tracing::warn!(node_id = node_id_hex, "malformed node id in REMOVE_NODE");
            return Vec::new();
        };

        if self.inventory.remove(&node_id).is_none() {
            tracing::warn!(node_id = %node_id, "removal targets unknown node");
            return Vec::new();
        }

        if let Err(e) = self.storage.remove_node(&node_id) {
            tracing::error!(error = %e, node_id = %node_id, "failed to persist node removal");
        }

        vec![EngineAction::BroadcastGateway(self.database_update())]
    }

    fn handle_update_node_config(
        &mut self,
        session_id: u64,
        node_id_hex: &str,
        payload: &canmaster_proto::gateway::UpdateNodeConfigPayload,
        now: u64,
    ) -> Vec<EngineAction> {
        let Ok(node_id) = parse_node_id_hex(node_id_hex) else {
            tracing::warn!(node_id = node_id_hex, "malformed node id in UPDATE_NODE_CONFIG");
            return Vec::new();
        };

        match config_writer::apply_update(&mut self.inventory, node_id, payload, now) {
            Ok(outcome) if outcome.audit_entries.is_empty() => Vec::new(),
            Ok(outcome) => {
                let history = outcome.history.as_ref().expect("non-empty diff always produces a history row");
                if let Err(e) = self.storage.commit_config_write(&outcome.node, history, &outcome.audit_entries) {
                    tracing::error!(error = %e, node_id = %node_id, "failed to persist config write");
                }

                let sub_mod_idx = match payload {
                    canmaster_proto::gateway::UpdateNodeConfigPayload::Submodule { sub_mod_idx, .. } => {
                        Some(*sub_mod_idx)
                    }
                    canmaster_proto::gateway::UpdateNodeConfigPayload::Parent { .. } => None,
                };

                let mut actions: Vec<EngineAction> =
                    outcome.frames.into_iter().map(EngineAction::SendBusFrame).collect();
                actions.push(EngineAction::SendGateway {
                    session_id,
                    message: OutboundMessage::UpdateAck {
                        node_id: node_id.hex(),
                        sub_mod_idx,
                        success: true,
                    },
                });
                actions.push(EngineAction::BroadcastGateway(self.audit_log_update()));
                actions
            }
            Err(EngineError::UnknownNodeOnUpdate(id)) => {
                tracing::warn!(node_id = %id, "config write targets unknown node");
                vec![EngineAction::SendGateway {
                    session_id,
                    message: OutboundMessage::UpdateAck { node_id: id.hex(), sub_mod_idx: None, success: false },
                }]
            }
            Err(e) => {
                tracing::warn!(error = %e, node_id = %node_id, "config write rejected");
                vec![EngineAction::SendGateway {
                    session_id,
                    message: OutboundMessage::UpdateAck { node_id: node_id.hex(), sub_mod_idx: None, success: false },
                }]
            }
        }
    }

    fn handle_request_node_interview(&mut self, node_id_hex: &str) -> Vec<EngineAction> {
        let Ok(node_id) = parse_node_id_hex(node_id_hex) else {
            tracing::warn!(node_id = node_id_hex, "malformed node id in REQUEST_NODE_INTERVIEW");
            return Vec::new();
        };

        match interview::request_reinterview(&mut self.inventory, node_id) {
            Ok((_, frame)) => {
                vec![
                    EngineAction::BroadcastGateway(self.database_update()),
                    EngineAction::SendBusFrame(frame),
                ]
            }
            Err(e) => {
                tracing::warn!(error = %e, node_id = %node_id, "interview reset rejected");
                Vec::new()
            }
        }
    }

    fn handle_save_audit_comment(&mut self, audit_id: u64, comment: &str) -> Vec<EngineAction> {
        if let Err(e) = self.storage.upsert_comment(audit_id, comment) {
            tracing::error!(error = %e, audit_id, "failed to persist audit comment");
            return Vec::new();
        }
        vec![EngineAction::BroadcastGateway(self.audit_log_update())]
    }

    /// Process a housekeeping tick (§4.6). Frame dispatch also triggers this
    /// check; a dedicated tick is only a fallback for quiet buses.
    pub fn process_tick(&mut self, now: u64) -> Vec<EngineAction> {
        self.housekeeping_actions(now)
    }
}

fn log_dropped_frame(error: &EngineError, frame: &Frame) {
    tracing::debug!(id = frame.id(), %error, "dropped inbound frame");
}
