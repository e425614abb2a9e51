//! # Path Resolution
//!
//! Maps path strings to [`ActorRef`]s. Lookups go through a bounded cache first;
//! on a miss the resolver walks up the path to the nearest cached ancestor (the
//! root, at worst) and sends it a resolve request carrying the remaining
//! segments. Each actor on the way either answers (no segments left), forwards to
//! the named child, or answers "not found".
//!
//! Failed lookups never error: they produce a dead-letter reference, which is not
//! cached. Entries are evicted when their actor stops.
//!
//! The resolver also keeps the constructor cache used by
//! [`ActorSystem::register_props`](crate::ActorSystem::register_props).

use crate::actor_ref::ActorRef;
use crate::message::SystemMessage;
use crate::path::{self, RemoteAddress};
use crate::props::Props;
use crate::system::SystemShared;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub(crate) struct Resolver {
    cache: DashMap<String, ActorRef>,
    capacity: usize,
    constructors: DashMap<String, Props>,
    constructor_capacity: usize,
    timeout: Duration,
}

impl Resolver {
    pub(crate) fn new(capacity: usize, constructor_capacity: usize, timeout: Duration) -> Self {
        Resolver {
            cache: DashMap::new(),
            capacity: capacity.max(1),
            constructors: DashMap::new(),
            constructor_capacity: constructor_capacity.max(1),
            timeout,
        }
    }

    pub(crate) fn cached(&self, path: &str) -> Option<ActorRef> {
        self.cache.get(path).map(|entry| entry.value().clone())
    }

    pub(crate) fn cache(&self, actor: &ActorRef) {
        if actor.is_dead_letter() {
            return;
        }
        bounded_insert(&self.cache, self.capacity, actor.path().to_string(), actor.clone());
    }

    pub(crate) fn decache(&self, path: &str) {
        self.cache.remove(path);
    }

    #[cfg(test)]
    pub(crate) fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub(crate) fn register_props(&self, type_name: &str, props: Props) {
        bounded_insert(
            &self.constructors,
            self.constructor_capacity,
            type_name.to_string(),
            props,
        );
    }

    pub(crate) fn registered_props(&self, type_name: &str) -> Option<Props> {
        self.constructors
            .get(type_name)
            .map(|entry| entry.value().clone())
    }

    /// Resolves an absolute local path or a remote path.
    pub(crate) async fn resolve(&self, system: &Arc<SystemShared>, target: &str) -> ActorRef {
        let target = if path::is_remote(target) {
            match self.resolve_remote(system, target) {
                Ok(remote) => return remote,
                Err(local_path) => local_path,
            }
        } else {
            path::normalize(target)
        };

        let Some(root) = system.root.get().cloned() else {
            return ActorRef::new_dead_letter(target, Arc::downgrade(system));
        };
        if target == "/" {
            return root;
        }
        if let Some(hit) = self.cached(&target) {
            if !hit.is_terminated() {
                return hit;
            }
        }

        // Walk up to the closest ancestor we already know.
        let mut start = root;
        let mut prefix = "/".to_string();
        let mut cursor = target.clone();
        while let Some(parent) = path::parent_of(&cursor) {
            if parent == "/" {
                break;
            }
            if let Some(hit) = self.cached(&parent) {
                start = hit;
                prefix = parent;
                break;
            }
            cursor = parent;
        }

        let remaining: VecDeque<String> = path::segments(&target[prefix.len()..]).into();
        self.resolve_from(system, start, remaining, &target).await
    }

    /// Asks `start` to resolve `remaining` below itself.
    pub(crate) async fn resolve_from(
        &self,
        system: &Arc<SystemShared>,
        start: ActorRef,
        remaining: VecDeque<String>,
        target: &str,
    ) -> ActorRef {
        let (reply, answer) = oneshot::channel();
        start.send_system(SystemMessage::Resolve { remaining, reply }, None);

        match tokio::time::timeout(self.timeout, answer).await {
            Ok(Ok(Some(found))) => {
                self.cache(&found);
                found
            }
            Ok(_) => {
                debug!(path = target, "Path not found, using dead letters");
                ActorRef::new_dead_letter(target.to_string(), Arc::downgrade(system))
            }
            Err(_) => {
                warn!(path = target, timeout = ?self.timeout, "Resolution timed out, using dead letters");
                ActorRef::new_dead_letter(target.to_string(), Arc::downgrade(system))
            }
        }
    }

    /// A reference for a remote path, or `Err(local_path)` when the path actually
    /// points into this system.
    fn resolve_remote(&self, system: &Arc<SystemShared>, target: &str) -> Result<ActorRef, String> {
        let address = match RemoteAddress::parse(target) {
            Ok(address) => address,
            Err(e) => {
                warn!(path = target, error = %e, "Malformed remote path");
                return Ok(ActorRef::new_dead_letter(target.to_string(), Arc::downgrade(system)));
            }
        };
        if system.is_local_address(&address) {
            return Err(address.path);
        }
        let key = address.to_path();
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }
        let remote = ActorRef::new_remote(address, Arc::downgrade(system));
        self.cache(&remote);
        Ok(remote)
    }
}

/// Inserts, evicting an arbitrary entry first when the map is full.
fn bounded_insert<V>(map: &DashMap<String, V>, capacity: usize, key: String, value: V) {
    if map.len() >= capacity && !map.contains_key(&key) {
        let victim = map.iter().next().map(|entry| entry.key().clone());
        if let Some(victim) = victim {
            map.remove(&victim);
        }
    }
    map.insert(key, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    fn dead(path: &str) -> ActorRef {
        ActorRef::new_dead_letter(path.to_string(), Weak::new())
    }

    #[test]
    fn cache_is_bounded() {
        let map = DashMap::new();
        for i in 0..10 {
            bounded_insert(&map, 4, format!("/user/{i}/"), i);
        }
        assert_eq!(map.len(), 4);
        assert!(map.contains_key("/user/9/"));
    }

    #[test]
    fn dead_letter_references_are_never_cached() {
        let resolver = Resolver::new(8, 8, Duration::from_secs(1));
        resolver.cache(&dead("/user/ghost/"));
        assert_eq!(resolver.cache_len(), 0);
        assert!(resolver.cached("/user/ghost/").is_none());
    }
}
