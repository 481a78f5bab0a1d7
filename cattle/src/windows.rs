//! Provisions the Windows disk alert once a cluster has Windows nodes

use crate::{
    metrics::Metrics,
    precan::{
        cluster_rule,
        table::{NODE_ALERT_GROUP, WINDOWS_DISK_RULE},
        Outcome,
    },
    resource::ClusterAlertRule,
    store::{self, Lister, ObjectStore},
};
use k8s_openapi::api::core::v1::Node;
use kube::core::{Expression, Selector};

/// The label that identifies a node's operating system.
pub const OS_LABEL: &str = "kubernetes.io/os";

/// Selects Windows nodes.
pub const WINDOWS_NODE_LABEL: (&str, &str) = (OS_LABEL, "windows");

const HOOK: &str = "windows-node-sync";

/// Indicates that the Windows alert could not be provisioned
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to list nodes")]
    ListNodes(#[source] store::Error),

    #[error("failed to get alert rule {name}")]
    GetRule {
        name: &'static str,
        #[source]
        source: store::Error,
    },

    #[error("failed to create precan rule {name}")]
    CreateRule {
        name: &'static str,
        #[source]
        source: store::Error,
    },
}

/// Ensures the Windows disk alert rule exists whenever a Windows node does
///
/// The rule is never removed when the last Windows node leaves the cluster.
#[derive(Clone, Debug)]
pub struct WindowsNodeSync<N, R> {
    cluster_name: String,
    nodes: N,
    rules: R,
    metrics: Metrics,
}

/// Returns a selector matching nodes labeled [`WINDOWS_NODE_LABEL`].
pub fn windows_nodes() -> Selector {
    let (key, value) = WINDOWS_NODE_LABEL;
    Selector::from(Expression::Equal(key.to_string(), value.to_string()))
}

// === impl WindowsNodeSync ===

impl<N, R> WindowsNodeSync<N, R>
where
    N: Lister<Node>,
    R: ObjectStore<ClusterAlertRule>,
{
    pub fn new(cluster_name: impl Into<String>, nodes: N, rules: R) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            nodes,
            rules,
            metrics: Metrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Checks the node cache and creates the Windows disk rule if needed.
    ///
    /// Returns `None` when the cluster has no Windows nodes. The same sync runs for
    /// every node change, so the node that triggered it does not matter.
    pub async fn sync(&self) -> Result<Option<Outcome>, Error> {
        let res = self.sync_inner().await;
        self.metrics.record_run(HOOK, res.is_ok());
        res
    }

    async fn sync_inner(&self) -> Result<Option<Outcome>, Error> {
        let windows = self.nodes.list(&windows_nodes()).map_err(Error::ListNodes)?;
        if windows.is_empty() {
            return Ok(None);
        }
        tracing::trace!(nodes = windows.len(), "Found Windows nodes");

        let name = WINDOWS_DISK_RULE.name;
        let existing = self
            .rules
            .get(&self.cluster_name, name)
            .await
            .map_err(|source| Error::GetRule { name, source })?;
        if existing.is_some() {
            return Ok(Some(Outcome::Existing));
        }

        let rule = cluster_rule(&self.cluster_name, NODE_ALERT_GROUP, &WINDOWS_DISK_RULE);
        let outcome = match self.rules.create(&rule).await {
            Ok(_) => {
                tracing::info!(cluster = %self.cluster_name, %name, "Created Windows alert rule");
                Outcome::Created
            }
            Err(error) if error.is_already_exists() => Outcome::Existing,
            Err(source) => {
                self.metrics.record_object("ClusterAlertRule", Outcome::Failed);
                return Err(Error::CreateRule { name, source });
            }
        };
        self.metrics.record_object("ClusterAlertRule", outcome);
        Ok(Some(outcome))
    }
}
