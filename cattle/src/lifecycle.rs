//! Create-once hooks driven by a resource watch
//!
//! A [`Driver`] calls [`Lifecycle::create`] the first time it sees an object and
//! then marks the object with a `lifecycle.cattle.io/create.<name>` annotation, so
//! that later events (including those replayed after a restart) call
//! [`Lifecycle::updated`] instead.

use crate::{metrics::Metrics, store::ObjectStore};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use std::marker::PhantomData;

/// The prefix of the annotation that records a completed create hook.
pub const CREATE_ANNOTATION_PREFIX: &str = "lifecycle.cattle.io/create.";

/// Hooks run as objects of type `K` are created, updated, and removed
#[async_trait]
pub trait Lifecycle<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    type Error: std::error::Error + Send + Sync + 'static;

    /// Handles an object the lifecycle has not seen before.
    async fn create(&self, obj: &K) -> Result<(), Self::Error>;

    async fn updated(&self, _obj: &K) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn remove(&self, _obj: &K) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Indicates that a lifecycle hook failed
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
    /// The hook itself failed
    #[error("{hook} hook failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: E,
    },

    /// The create hook succeeded but its marker could not be recorded
    #[error("failed to mark {name} as created: {source}")]
    Annotate {
        name: String,
        #[source]
        source: crate::store::Error,
    },
}

/// Dispatches watch events for objects of type `K` to a [`Lifecycle`]
#[derive(Debug)]
pub struct Driver<K, L, S> {
    name: String,
    annotation: String,
    lifecycle: L,
    store: S,
    metrics: Metrics,
    _marker: PhantomData<fn(K)>,
}

// === impl Driver ===

impl<K, L, S> Driver<K, L, S>
where
    K: Resource + Send + Sync + 'static,
    L: Lifecycle<K>,
    S: ObjectStore<K>,
{
    /// Creates a driver that records its create marker under `name`.
    pub fn new(name: impl Into<String>, lifecycle: L, store: S) -> Self {
        let name = name.into();
        Self {
            annotation: format!("{CREATE_ANNOTATION_PREFIX}{name}"),
            name,
            lifecycle,
            store,
            metrics: Metrics::default(),
            _marker: PhantomData,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// The annotation set on objects once the create hook has run.
    pub fn annotation(&self) -> &str {
        &self.annotation
    }

    /// Handles an object that was added or modified.
    ///
    /// Objects that are being deleted are ignored.
    pub async fn applied(&self, obj: &K) -> Result<(), Error<L::Error>> {
        if obj.meta().deletion_timestamp.is_some() {
            tracing::trace!(name = %obj.name_any(), "Skipping terminating object");
            return Ok(());
        }

        if self.is_created(obj) {
            let res = self.lifecycle.updated(obj).await.map_err(|source| Error::Hook {
                hook: "updated",
                source,
            });
            self.metrics.record_run(&self.name, res.is_ok());
            return res;
        }

        let res = self.create(obj).await;
        self.metrics.record_run(&self.name, res.is_ok());
        res
    }

    /// Handles an object that was deleted.
    pub async fn deleted(&self, obj: &K) -> Result<(), Error<L::Error>> {
        let res = self
            .lifecycle
            .remove(obj)
            .await
            .map_err(|source| Error::Hook {
                hook: "remove",
                source,
            });
        self.metrics.record_run(&self.name, res.is_ok());
        res
    }

    fn is_created(&self, obj: &K) -> bool {
        obj.annotations()
            .get(&self.annotation)
            .is_some_and(|v| v == "true")
    }

    async fn create(&self, obj: &K) -> Result<(), Error<L::Error>> {
        let name = obj.name_any();
        tracing::debug!(%name, lifecycle = %self.name, "Creating");
        self.lifecycle
            .create(obj)
            .await
            .map_err(|source| Error::Hook {
                hook: "create",
                source,
            })?;

        let namespace = obj.namespace().unwrap_or_default();
        self.store
            .annotate(&namespace, &name, &self.annotation, "true")
            .await
            .map_err(|source| Error::Annotate { name, source })?;
        Ok(())
    }
}
