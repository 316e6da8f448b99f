//! Notification Hub (C6): per-user connection set across every device,
//! best-effort delivery with no durable replay. Same actor mechanism as
//! [`crate::realtime::chat_hub`] minus the room dimension.

use std::collections::HashMap;

use dashmap::DashMap;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use uuid::Uuid;

use crate::realtime::connection::{ConnectionHandle, OutboundEvent};

pub enum NotificationHubMsg {
    Register {
        handle: ConnectionHandle,
        reply: RpcReplyPort<bool>,
    },
    Unregister {
        conn_id: Uuid,
        user_id: Uuid,
    },
    Deliver {
        user_id: Uuid,
        event: OutboundEvent,
    },
}

pub struct NotificationHub {
    pub max_conns_per_user: usize,
}

pub struct NotificationHubState {
    connections_by_user: DashMap<Uuid, Vec<ConnectionHandle>>,
    conn_owner: HashMap<Uuid, Uuid>,
}

impl ractor::Actor for NotificationHub {
    type Msg = NotificationHubMsg;
    type State = NotificationHubState;
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        _args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(NotificationHubState {
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
            NotificationHubMsg::Register { handle, reply } => {
                let mut entry = state.connections_by_user.entry(handle.user_id).or_default();
                if entry.len() >= self.max_conns_per_user {
                    let _ = reply.send(false);
                    return Ok(());
                }
                state.conn_owner.insert(handle.conn_id, handle.user_id);
                entry.push(handle);
                let _ = reply.send(true);
            }
            NotificationHubMsg::Unregister { conn_id, user_id } => {
                if let Some(mut conns) = state.connections_by_user.get_mut(&user_id) {
                    conns.retain(|c| c.conn_id != conn_id);
                }
                state.conn_owner.remove(&conn_id);
            }
            NotificationHubMsg::Deliver { user_id, event } => {
                if let Some(conns) = state.connections_by_user.get(&user_id) {
                    for conn in conns.iter() {
                        conn.send(event.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationHubHandle {
    actor: ActorRef<NotificationHubMsg>,
}

impl NotificationHubHandle {
    pub async fn spawn(max_conns_per_user: usize) -> anyhow::Result<Self> {
        let (actor, _handle) =
            Actor::spawn(None, NotificationHub { max_conns_per_user }, ()).await?;
        Ok(Self { actor })
    }

    pub async fn register(&self, handle: ConnectionHandle) -> anyhow::Result<bool> {
        let result = self
            .actor
            .call(|reply| NotificationHubMsg::Register { handle, reply }, None)
            .await?;
        match result {
            ractor::rpc::CallResult::Success(value) => Ok(value),
            _ => Ok(false),
        }
    }

    pub fn unregister(&self, conn_id: Uuid, user_id: Uuid) {
        let _ = self
            .actor
            .cast(NotificationHubMsg::Unregister { conn_id, user_id });
    }

    pub fn deliver(&self, user_id: Uuid, event: OutboundEvent) {
        let _ = self.actor.cast(NotificationHubMsg::Deliver { user_id, event });
    }
}
