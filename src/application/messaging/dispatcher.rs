//! Message dispatcher - Routes messages to handlers organised in priority groups
//!
//! Groups run in ascending order. Within a group the first handler that
//! matches a message handles it, then dispatch moves on to the next group.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::domain::entities::Message;
use crate::domain::traits::Handler;

/// A handler plus the plugin that owns it
#[derive(Clone)]
pub struct RegisteredHandler {
    pub id: Uuid,
    pub handler: Arc<dyn Handler>,
    /// Owning plugin; `None` for handlers installed by the host itself
    pub owner: Option<String>,
}

impl RegisteredHandler {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            id: Uuid::new_v4(),
            handler,
            owner: None,
        }
    }

    pub fn owned_by(handler: Arc<dyn Handler>, owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Self::new(handler)
        }
    }
}

impl std::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("id", &self.id)
            .field("handler", &self.handler.name())
            .field("owner", &self.owner)
            .finish()
    }
}

/// Handler groups of one client
#[derive(Default)]
pub struct Dispatcher {
    groups: RwLock<BTreeMap<i32, Vec<RegisteredHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<i32, Vec<RegisteredHandler>>> {
        self.groups.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<i32, Vec<RegisteredHandler>>> {
        self.groups.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_handler(&self, handler: RegisteredHandler, group: i32) {
        tracing::debug!(
            "Adding handler {} to group {} (owner: {:?})",
            handler.handler.name(),
            group,
            handler.owner
        );
        self.write().entry(group).or_default().push(handler);
    }

    pub fn remove_handler(&self, id: Uuid, group: i32) -> bool {
        let mut groups = self.write();
        let Some(handlers) = groups.get_mut(&group) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| h.id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            groups.remove(&group);
        }
        removed
    }

    /// Remove every handler owned by `owner` from every group
    pub fn remove_owned(&self, owner: &str) -> usize {
        let mut groups = self.write();
        let mut removed = 0;
        for handlers in groups.values_mut() {
            let before = handlers.len();
            handlers.retain(|h| h.owner.as_deref() != Some(owner));
            removed += before - handlers.len();
        }
        groups.retain(|_, handlers| !handlers.is_empty());
        removed
    }

    pub fn count_owned(&self, owner: &str) -> usize {
        self.read()
            .values()
            .flatten()
            .filter(|h| h.owner.as_deref() == Some(owner))
            .count()
    }

    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the groups in dispatch order
    pub fn groups(&self) -> Vec<(i32, Vec<RegisteredHandler>)> {
        self.read()
            .iter()
            .map(|(group, handlers)| (*group, handlers.clone()))
            .collect()
    }

    /// Run a message through the groups, collecting replies
    pub async fn dispatch(&self, message: &Message) -> Vec<String> {
        let mut replies = Vec::new();

        // The lock is not held across handler calls; plugins may be
        // attached or detached while a message is in flight.
        for (group, handlers) in self.groups() {
            let Some(entry) = handlers.iter().find(|h| h.handler.matches(message)) else {
                continue;
            };
            match entry.handler.handle(message).await {
                Ok(Some(reply)) => replies.push(reply),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    "Handler {} in group {} failed: {}",
                    entry.handler.name(),
                    group,
                    e
                ),
            }
        }

        replies
    }
}
