#![deny(warnings, rust_2018_idioms)]

use cattle::{
    lifecycle::Driver,
    resource::{
        ClusterAlertGroup, ClusterAlertRule, Project, ProjectAlertGroup, ProjectAlertRule,
        ProjectSpec,
    },
    ClusterSeeder, InMemory, Metrics, Outcome, ProjectLifecycle, WindowsNodeSync,
    PROJECT_LIFECYCLE,
};
use k8s_openapi::api::core::v1::Node;
use kube::{core::ObjectMeta, ResourceExt};
use maplit::{btreemap, convert_args};
use std::sync::Arc;

const CLUSTER: &str = "c-abcde";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cattle=trace".into()),
        )
        .try_init();
}

fn node(name: &str, os: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(convert_args!(btreemap!("kubernetes.io/os" => os))),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn project(name: &str) -> Project {
    Project {
        metadata: ObjectMeta {
            namespace: Some(CLUSTER.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: ProjectSpec {
            display_name: name.to_string(),
            cluster_name: CLUSTER.to_string(),
            ..Default::default()
        },
    }
}

#[tokio::test(flavor = "current_thread")]
async fn cluster_lifecycle() {
    init_tracing();
    let metrics = Metrics::default();

    let cluster_groups = Arc::new(InMemory::<ClusterAlertGroup>::default());
    let cluster_rules = Arc::new(InMemory::<ClusterAlertRule>::default());
    let seeder = ClusterSeeder::new(cluster_groups.clone(), cluster_rules.clone())
        .with_metrics(metrics.clone());

    // The cluster is seeded on startup, and again after every restart.
    let report = seeder.seed(CLUSTER).await;
    assert!(report.is_complete());
    assert_eq!(report.count(Outcome::Created), 14);
    let report = seeder.seed(CLUSTER).await;
    assert_eq!(report.count(Outcome::Created), 0);
    assert_eq!(metrics.objects("ClusterAlertGroup", Outcome::Existing), 4);
    assert_eq!(
        cluster_groups.names(CLUSTER),
        ["etcd-alert", "event-alert", "kube-components-alert", "node-alert"]
    );

    // Projects are seeded once, when first observed.
    let project_groups = Arc::new(InMemory::<ProjectAlertGroup>::default());
    let project_rules = Arc::new(InMemory::<ProjectAlertRule>::default());
    let projects = Arc::new(InMemory::with_objects([project("p-xyz12")]));
    let lifecycle = ProjectLifecycle::new(project_groups.clone(), project_rules.clone())
        .with_metrics(metrics.clone());
    let driver =
        Driver::new(PROJECT_LIFECYCLE, lifecycle, projects.clone()).with_metrics(metrics.clone());

    driver.applied(&project("p-xyz12")).await.expect("create");
    let marked = projects.peek(CLUSTER, "p-xyz12").expect("project");
    assert_eq!(
        marked
            .annotations()
            .get("lifecycle.cattle.io/create.project-precan-alert-controller")
            .map(String::as_str),
        Some("true")
    );
    assert_eq!(project_rules.names("p-xyz12").len(), 2);

    // A user deletes a precanned rule; later updates leave it deleted.
    project_rules.remove("p-xyz12", "memory-close-to-resource-limited");
    driver.applied(&marked).await.expect("update");
    assert_eq!(
        project_rules.names("p-xyz12"),
        ["less-than-half-workload-available"]
    );
    assert_eq!(metrics.runs(PROJECT_LIFECYCLE, true), 2);

    // The Windows rule appears once a Windows node joins.
    let nodes = Arc::new(InMemory::with_objects([node("linux-0", "linux")]));
    let sync = WindowsNodeSync::new(CLUSTER, nodes.clone(), cluster_rules.clone())
        .with_metrics(metrics.clone());
    assert_eq!(sync.sync().await.expect("sync"), None);
    assert!(cluster_rules
        .peek(CLUSTER, "windows-node-disk-running-full")
        .is_none());

    nodes.insert(node("win-0", "windows"));
    assert_eq!(sync.sync().await.expect("sync"), Some(Outcome::Created));
    let rule = cluster_rules
        .peek(CLUSTER, "windows-node-disk-running-full")
        .expect("windows rule");
    assert_eq!(rule.spec.group_name, "c-abcde:node-alert");
    assert!(cluster_groups.peek(CLUSTER, "node-alert").is_some());

    // The rule is kept after the Windows nodes leave.
    nodes.remove("", "win-0");
    assert_eq!(sync.sync().await.expect("sync"), None);
    assert_eq!(cluster_rules.len(), 11);
}
