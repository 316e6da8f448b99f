//! Chat Hub (C5): a single process-wide actor holding the authoritative
//! `user -> connections` and `conversation -> connections` maps. All
//! mutation goes through the actor's mailbox, so register/join/leave calls
//! from concurrent connections never race each other.
//!
//! Grounded on the teacher's `actors/registry.rs` (`ractor::Actor` trait,
//! `DashMap`-backed lookups, `Arc<ActorRef<_>>` handles) but restructured
//! from "one actor per conversation" to "one hub actor, many rooms", per the
//! single-logical-actor invariant in the spec's concurrency model.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use uuid::Uuid;

use crate::realtime::connection::{ConnectionHandle, OutboundEvent};

pub enum ChatHubMsg {
    Register {
        handle: ConnectionHandle,
        reply: RpcReplyPort<RegisterOutcome>,
    },
    Unregister {
        conn_id: Uuid,
        user_id: Uuid,
    },
    Join {
        conversation_id: Uuid,
        conn_id: Uuid,
        user_id: Uuid,
    },
    Leave {
        conversation_id: Uuid,
        conn_id: Uuid,
        user_id: Uuid,
    },
    LeaveAll {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    PublishLocal {
        conversation_id: Uuid,
        event: OutboundEvent,
    },
    Deliver {
        user_id: Uuid,
        event: OutboundEvent,
    },
    ConnectionCount {
        reply: RpcReplyPort<usize>,
    },
    BroadcastAll {
        event: OutboundEvent,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Accepted,
    HubAtCapacity,
}

pub struct ChatHub {
    pub max_conns_per_user: usize,
    pub max_total_conns: usize,
}

pub struct ChatHubState {
    // conversation_id -> connection ids currently subscribed to it
    rooms: HashMap<Uuid, HashSet<Uuid>>,
    // user_id -> live connection handles (capped at max_conns_per_user)
    connections_by_user: DashMap<Uuid, Vec<ConnectionHandle>>,
    // conn_id -> user_id, for O(1) reverse lookup on unregister
    conn_owner: HashMap<Uuid, Uuid>,
}

impl ractor::Actor for ChatHub {
    type Msg = ChatHubMsg;
    type State = ChatHubState;
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        _args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(ChatHubState {
            rooms: HashMap::new(),
            connections_by_user: DashMap::new(),
            conn_owner: HashMap::new(),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ChatHubMsg::Register { handle, reply } => {
                let total: usize = state.connections_by_user.iter().map(|e| e.value().len()).sum();
                if total >= self.max_total_conns {
                    let _ = reply.send(RegisterOutcome::HubAtCapacity);
                    return Ok(());
                }
                let mut entry = state.connections_by_user.entry(handle.user_id).or_default();
                // Evict the eldest connection rather than reject the newest: the
                // per-user cap bounds live connections, it doesn't queue them.
                while entry.len() >= self.max_conns_per_user {
                    let evicted = entry.remove(0);
                    state.conn_owner.remove(&evicted.conn_id);
                    for members in state.rooms.values_mut() {
                        members.remove(&evicted.conn_id);
                    }
                }
                state.conn_owner.insert(handle.conn_id, handle.user_id);
                entry.push(handle);
                let _ = reply.send(RegisterOutcome::Accepted);
            }
            ChatHubMsg::Unregister { conn_id, user_id } => {
                if let Some(mut conns) = state.connections_by_user.get_mut(&user_id) {
                    conns.retain(|c| c.conn_id != conn_id);
                }
                state.conn_owner.remove(&conn_id);
                for members in state.rooms.values_mut() {
                    members.remove(&conn_id);
                }
            }
            ChatHubMsg::Join {
                conversation_id,
                conn_id,
                ..
            } => {
                state.rooms.entry(conversation_id).or_default().insert(conn_id);
            }
            ChatHubMsg::Leave {
                conversation_id,
                conn_id,
                ..
            } => {
                if let Some(members) = state.rooms.get_mut(&conversation_id) {
                    members.remove(&conn_id);
                }
            }
            ChatHubMsg::LeaveAll {
                conversation_id,
                user_id,
            } => {
                if let Some(members) = state.rooms.get_mut(&conversation_id) {
                    if let Some(conns) = state.connections_by_user.get(&user_id) {
                        let owned: Vec<Uuid> = conns.iter().map(|c| c.conn_id).collect();
                        members.retain(|conn_id| !owned.contains(conn_id));
                    }
                }
            }
            ChatHubMsg::PublishLocal {
                conversation_id,
                event,
            } => {
                if let Some(members) = state.rooms.get(&conversation_id) {
                    for conn_id in members {
                        if let Some(user_id) = state.conn_owner.get(conn_id) {
                            if let Some(conns) = state.connections_by_user.get(user_id) {
                                for conn in conns.iter().filter(|c| c.conn_id == *conn_id) {
                                    conn.send(event.clone());
                                }
                            }
                        }
                    }
                }
            }
            ChatHubMsg::Deliver { user_id, event } => {
                if let Some(conns) = state.connections_by_user.get(&user_id) {
                    for conn in conns.iter() {
                        conn.send(event.clone());
                    }
                }
            }
            ChatHubMsg::ConnectionCount { reply } => {
                let total: usize = state.connections_by_user.iter().map(|e| e.value().len()).sum();
                let _ = reply.send(total);
            }
            ChatHubMsg::BroadcastAll { event } => {
                for entry in state.connections_by_user.iter() {
                    for conn in entry.value() {
                        conn.send(event.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Cheap-to-clone client handle around the hub's `ActorRef`.
#[derive(Clone)]
pub struct ChatHubHandle {
    actor: ActorRef<ChatHubMsg>,
}

impl ChatHubHandle {
    pub async fn spawn(max_conns_per_user: usize, max_total_conns: usize) -> anyhow::Result<Self> {
        let (actor, _handle) = Actor::spawn(
            None,
            ChatHub {
                max_conns_per_user,
                max_total_conns,
            },
            (),
        )
        .await?;
        Ok(Self { actor })
    }

    pub async fn register(&self, handle: ConnectionHandle) -> anyhow::Result<RegisterOutcome> {
        let result = self
            .actor
            .call(|reply| ChatHubMsg::Register { handle, reply }, None)
            .await?;
        unwrap_call(result)
    }

    pub fn unregister(&self, conn_id: Uuid, user_id: Uuid) {
        let _ = self.actor.cast(ChatHubMsg::Unregister { conn_id, user_id });
    }

    pub fn join(&self, conversation_id: Uuid, conn_id: Uuid, user_id: Uuid) {
        let _ = self.actor.cast(ChatHubMsg::Join {
            conversation_id,
            conn_id,
            user_id,
        });
    }

    pub fn leave(&self, conversation_id: Uuid, conn_id: Uuid, user_id: Uuid) {
        let _ = self.actor.cast(ChatHubMsg::Leave {
            conversation_id,
            conn_id,
            user_id,
        });
    }

    pub fn leave_all(&self, conversation_id: Uuid, user_id: Uuid) {
        let _ = self.actor.cast(ChatHubMsg::LeaveAll {
            conversation_id,
            user_id,
        });
    }

    pub fn publish_local(&self, conversation_id: Uuid, event: OutboundEvent) {
        let _ = self.actor.cast(ChatHubMsg::PublishLocal {
            conversation_id,
            event,
        });
    }

    pub fn deliver(&self, user_id: Uuid, event: OutboundEvent) {
        let _ = self.actor.cast(ChatHubMsg::Deliver { user_id, event });
    }

    pub fn broadcast_all(&self, event: OutboundEvent) {
        let _ = self.actor.cast(ChatHubMsg::BroadcastAll { event });
    }

    pub async fn connection_count(&self) -> anyhow::Result<usize> {
        let result = self
            .actor
            .call(|reply| ChatHubMsg::ConnectionCount { reply }, None)
            .await?;
        unwrap_call(result)
    }
}

fn unwrap_call<T>(result: ractor::rpc::CallResult<T>) -> anyhow::Result<T> {
    match result {
        ractor::rpc::CallResult::Success(value) => Ok(value),
        ractor::rpc::CallResult::Timeout => Err(anyhow::anyhow!("chat hub call timed out")),
        ractor::rpc::CallResult::SenderError => {
            Err(anyhow::anyhow!("chat hub actor is no longer running"))
        }
    }
}
