//! Seeds built-in ("precanned") alert groups and rules
//!
//! Seeding is a series of get-or-create operations, so a seeder may be run any
//! number of times against the same store. Failures on individual objects are logged
//! and reported but never abort seeding of the remaining objects.

use crate::{
    metrics::Metrics,
    store::{Error, ObjectStore},
};
use kube::{Resource, ResourceExt};

mod cluster;
mod project;
pub mod table;

pub use self::{
    cluster::ClusterSeeder,
    project::{ProjectLifecycle, PROJECT_LIFECYCLE},
};
pub(crate) use self::cluster::cluster_rule;

/// What happened to a single precanned object
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The object was created.
    Created,
    /// The object already existed and was left alone.
    Existing,
    /// The object could not be looked up or created.
    Failed,
}

/// A precanned object handled by a seeder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Seeded {
    /// The object's kind, e.g. `ClusterAlertRule`.
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub outcome: Outcome,
}

/// The outcomes of a seeding run, in the order objects were handled
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    seeded: Vec<Seeded>,
}

// === impl Outcome ===

impl Outcome {
    /// The label value used for this outcome in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Existing => "existing",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Report ===

impl Report {
    /// Iterates over every handled object.
    pub fn iter(&self) -> impl Iterator<Item = &Seeded> + '_ {
        self.seeded.iter()
    }

    /// Returns the number of handled objects with the given outcome.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.seeded.iter().filter(|s| s.outcome == outcome).count()
    }

    /// Returns the outcome for the named object, if it was handled.
    pub fn outcome(&self, name: &str) -> Option<Outcome> {
        self.seeded
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.outcome)
    }

    /// Returns true if no object failed.
    pub fn is_complete(&self) -> bool {
        self.count(Outcome::Failed) == 0
    }

    pub fn len(&self) -> usize {
        self.seeded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeded.is_empty()
    }

    fn record<K>(&mut self, metrics: &Metrics, obj: &K, outcome: Outcome)
    where
        K: Resource,
        K::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).into_owned();
        metrics.record_object(&kind, outcome);
        self.seeded.push(Seeded {
            kind,
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
            outcome,
        });
    }
}

impl IntoIterator for Report {
    type Item = Seeded;
    type IntoIter = std::vec::IntoIter<Seeded>;

    fn into_iter(self) -> Self::IntoIter {
        self.seeded.into_iter()
    }
}

// === helpers ===

/// Creates `obj` unless an object with its key already exists.
async fn get_or_create<K, S>(store: &S, what: &str, obj: K) -> (K, Outcome)
where
    K: Resource + Send + Sync,
    S: ObjectStore<K> + ?Sized,
{
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    match store.get(&namespace, &name).await {
        Ok(Some(_)) => {
            tracing::trace!(%namespace, %name, "Already exists");
            (obj, Outcome::Existing)
        }
        Ok(None) => create(store, what, obj).await,
        Err(error) => {
            tracing::warn!(%error, %namespace, %name, "Failed to get precan {what}");
            (obj, Outcome::Failed)
        }
    }
}

/// Creates `obj`, treating a conflict as success.
async fn create<K, S>(store: &S, what: &str, obj: K) -> (K, Outcome)
where
    K: Resource + Send + Sync,
    S: ObjectStore<K> + ?Sized,
{
    match store.create(&obj).await {
        Ok(_) => {
            tracing::info!(namespace = ?obj.namespace(), name = %obj.name_any(), "Created precan {what}");
            (obj, Outcome::Created)
        }
        Err(error) if error.is_already_exists() => (obj, Outcome::Existing),
        Err(error) => {
            log_create_error(&error, what, &obj);
            (obj, Outcome::Failed)
        }
    }
}

fn log_create_error<K: Resource>(error: &Error, what: &str, obj: &K) {
    tracing::warn!(
        %error,
        namespace = ?obj.namespace(),
        name = %obj.name_any(),
        "Failed to create precan {what}",
    );
}
