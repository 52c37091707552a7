//! Live (method, path) → endpoint map.
//!
//! Reads load an immutable snapshot and never block. Writes copy the current
//! map, apply one change and swap the new snapshot in, so a reader sees
//! either the old endpoint or the new one and never a missing or partial
//! entry.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RegistryError;
use crate::template::EndpointSpec;

type RouteKey = (Method, String);
type Routes = HashMap<RouteKey, Arc<EndpointSpec>>;

/// What `register` does when the key is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Swap the new endpoint in; later requests are served by it.
    #[default]
    Replace,
    /// Keep the existing endpoint and report a conflict.
    Reject,
}

pub struct EndpointRegistry {
    routes: ArcSwap<Routes>,
    policy: OverwritePolicy,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(OverwritePolicy::default())
    }
}

impl EndpointRegistry {
    pub fn new(policy: OverwritePolicy) -> Self {
        Self {
            routes: ArcSwap::from_pointee(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> OverwritePolicy {
        self.policy
    }

    /// Install `spec` under its (method, path) key.
    ///
    /// Returns the endpoint it replaced, if any.
    pub fn register(&self, spec: EndpointSpec) -> Result<Option<Arc<EndpointSpec>>, RegistryError> {
        let spec = Arc::new(spec);
        let key = spec.key();
        let mut conflict = false;

        let before = self.routes.rcu(|current| {
            conflict = self.policy == OverwritePolicy::Reject && current.contains_key(&key);
            if conflict {
                return Arc::clone(current);
            }
            let mut next = Routes::clone(current);
            next.insert(key.clone(), Arc::clone(&spec));
            Arc::new(next)
        });

        if conflict {
            return Err(RegistryError::Conflict {
                method: key.0,
                path: key.1,
            });
        }

        let replaced = before.get(&key).cloned();
        info!(
            method = %key.0,
            path = %key.1,
            revision = spec.revision(),
            replaced = replaced.as_ref().map(|old| old.revision()),
            "endpoint registered"
        );
        Ok(replaced)
    }

    pub fn resolve(&self, method: &Method, path: &str) -> Option<Arc<EndpointSpec>> {
        self.routes
            .load()
            .get(&(method.clone(), path.to_string()))
            .cloned()
    }

    /// Remove an endpoint. Unknown keys are a no-op.
    pub fn deregister(&self, method: &Method, path: &str) -> Option<Arc<EndpointSpec>> {
        let key = (method.clone(), path.to_string());
        let before = self.routes.rcu(|current| {
            if !current.contains_key(&key) {
                return Arc::clone(current);
            }
            let mut next = Routes::clone(current);
            next.remove(&key);
            Arc::new(next)
        });

        let removed = before.get(&key).cloned();
        if let Some(spec) = &removed {
            info!(method = %method, path = %path, revision = spec.revision(), "endpoint removed");
        }
        removed
    }

    /// Every registered endpoint, sorted by path.
    pub fn list(&self) -> Vec<Arc<EndpointSpec>> {
        let mut specs: Vec<_> = self.routes.load().values().cloned().collect();
        specs.sort_by(|a, b| a.path().cmp(b.path()));
        specs
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.load().is_empty()
    }
}
