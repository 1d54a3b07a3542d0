use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;

use crate::ports::AccessPointRegistry;

/// Access points held in memory and swapped atomically on update, so
/// acceptors read a consistent snapshot without locking.
#[derive(Debug, Default)]
pub struct InMemoryAccessPointRegistry {
    hosts: ArcSwap<HashMap<String, Vec<String>>>,
}

impl InMemoryAccessPointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hosts(&self, environment_id: &str, hosts: Vec<String>) {
        self.hosts.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(environment_id.to_string(), hosts.clone());
            next
        });
        tracing::debug!("Access points updated for environment {}", environment_id);
    }

    pub fn remove(&self, environment_id: &str) {
        self.hosts.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(environment_id);
            next
        });
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, Vec<String>>> {
        self.hosts.load_full()
    }
}

impl AccessPointRegistry for InMemoryAccessPointRegistry {
    fn hosts(&self, environment_id: &str) -> Vec<String> {
        self.hosts
            .load()
            .get(environment_id)
            .cloned()
            .unwrap_or_default()
    }
}
