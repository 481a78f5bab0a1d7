//! Prometheus metrics for seeding and sync hooks

use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Counts the outcomes of precanned object seeding and node syncs
///
/// Metrics that are never registered still count, so a default instance can be
/// used where no registry is available.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    objects: Family<ObjectLabels, Counter>,
    syncs: Family<SyncLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ObjectLabels {
    kind: String,
    outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SyncLabels {
    hook: String,
    result: String,
}

impl Metrics {
    /// Registers metrics with the given registry.
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "precan_objects",
            "Precanned alert objects handled, by kind and outcome",
            metrics.objects.clone(),
        );
        prom.register(
            "hook_runs",
            "Lifecycle and sync hook runs, by hook and result",
            metrics.syncs.clone(),
        );
        metrics
    }

    pub(crate) fn record_object(&self, kind: &str, outcome: crate::Outcome) {
        self.objects
            .get_or_create(&ObjectLabels {
                kind: kind.to_string(),
                outcome: outcome.as_str().to_string(),
            })
            .inc();
    }

    /// Records a run of the named hook.
    pub fn record_run(&self, hook: &str, ok: bool) {
        self.syncs
            .get_or_create(&SyncLabels {
                hook: hook.to_string(),
                result: if ok { "ok" } else { "error" }.to_string(),
            })
            .inc();
    }

    /// Returns the number of objects of a kind handled with the given outcome.
    pub fn objects(&self, kind: &str, outcome: crate::Outcome) -> u64 {
        self.objects
            .get_or_create(&ObjectLabels {
                kind: kind.to_string(),
                outcome: outcome.as_str().to_string(),
            })
            .get()
    }

    /// Returns the number of runs of the named hook with the given result.
    pub fn runs(&self, hook: &str, ok: bool) -> u64 {
        self.syncs
            .get_or_create(&SyncLabels {
                hook: hook.to_string(),
                result: if ok { "ok" } else { "error" }.to_string(),
            })
            .get()
    }
}
