#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{bail, Result};
use cattle::{
    catalog::{
        self, ApiContext, BaseUrlBuilder, KubeProxyStore, ResourceStore, Schemas, ServerVersion,
        TemplateStore, TransformStore,
    },
    lifecycle::Driver,
    resource::{
        CatalogTemplate, CatalogTemplateVersion, ClusterAlertGroup, ClusterAlertRule, Project,
        ProjectAlertGroup, ProjectAlertRule,
    },
    ClusterSeeder, KubeStore, Metrics, Outcome, ProjectLifecycle, WindowsNodeSync,
    PROJECT_LIFECYCLE,
};
use clap::{Parser, Subcommand};
use futures::prelude::*;
use k8s_openapi::api::core::v1::Node;
use kube::{
    core::NamespaceResourceScope,
    runtime::watcher::{self, Event},
    Client, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::{fmt::Debug, hash::Hash, sync::Arc};
use tokio::time;
use tracing::Instrument;

#[derive(Clone, Parser)]
#[clap(version)]
struct Args {
    /// The tracing filter used for logs
    #[clap(
        long,
        env = "CATTLE_LOG",
        default_value = "cattle=info,cattle_controller=info,warn"
    )]
    log_level: kubert::LogFilter,

    /// The logging format
    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The amount of time to wait for the Kubernetes client to initialize
    #[clap(long, default_value = "10s")]
    init_timeout: humantime::Duration,

    /// The field manager recorded on objects this controller writes
    #[clap(long, default_value = "cattle-controller")]
    field_manager: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Seed precanned alerts and run the project and Windows node hooks
    Run {
        /// The cluster whose alerts are managed. Cluster alerts and projects live in
        /// the namespace of the same name.
        #[clap(long, env = "CLUSTER_NAME")]
        cluster_name: String,
    },

    /// Print catalog templates, with links to the versions this server supports
    Templates {
        /// The version of the running server
        #[clap(long, env = "CATTLE_SERVER_VERSION", default_value = "dev")]
        server_version: String,

        /// The URL under which API links are rendered
        #[clap(long, default_value = "https://localhost")]
        base_url: String,

        /// Print a single template, by `<namespace>:<name>` id
        #[clap(long)]
        id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        client,
        admin,
        init_timeout,
        field_manager,
        command,
    } = Args::parse();

    let mut prom = prometheus_client::registry::Registry::default();

    // Register application metrics before configuring the admin server.
    let metrics = Metrics::register(prom.sub_registry_with_prefix("cattle"));

    let rt = kubert::Runtime::builder()
        .with_log(log_level, log_format)
        .with_admin(admin.into_builder().with_prometheus(prom))
        .with_client(client);
    let runtime = match time::timeout(init_timeout.into(), rt.build()).await {
        Ok(res) => res?,
        Err(_) => bail!("Timed out waiting for Kubernetes client to initialize"),
    };

    match command {
        Command::Run { cluster_name } => run(runtime, metrics, field_manager, cluster_name).await,
        Command::Templates {
            server_version,
            base_url,
            id,
        } => {
            let client = runtime.client();
            templates(client, ServerVersion::new(server_version), &base_url, id).await
        }
    }
}

async fn run(
    mut runtime: kubert::Runtime,
    metrics: Metrics,
    field_manager: String,
    cluster_name: String,
) -> Result<()> {
    let store = Stores {
        client: runtime.client(),
        field_manager,
    };

    // Seed cluster alerts before any watch starts so that the Windows rule's group
    // exists by the time nodes are synced.
    let seeder = ClusterSeeder::new(
        store.get::<ClusterAlertGroup>(),
        store.get::<ClusterAlertRule>(),
    )
    .with_metrics(metrics.clone());
    let report = seeder.seed(&cluster_name).await;
    tracing::info!(
        created = report.count(Outcome::Created),
        existing = report.count(Outcome::Existing),
        failed = report.count(Outcome::Failed),
        "Seeded cluster alerts"
    );

    // Seed project alerts as projects are created.
    let lifecycle = ProjectLifecycle::new(
        store.get::<ProjectAlertGroup>(),
        store.get::<ProjectAlertRule>(),
    )
    .with_metrics(metrics.clone());
    let driver = Driver::new(
        PROJECT_LIFECYCLE,
        lifecycle,
        store.get::<Project>(),
    )
    .with_metrics(metrics.clone());
    let projects = runtime.watch_namespaced::<Project>(cluster_name.clone(), watcher::Config::default());
    let projects = tokio::spawn(
        async move {
            tokio::pin!(projects);
            while let Some(ev) = projects.next().await {
                let res = match ev {
                    Event::Apply(project) | Event::InitApply(project) => {
                        driver.applied(&project).await.map_err(|e| (project, e))
                    }
                    Event::Delete(project) => {
                        driver.deleted(&project).await.map_err(|e| (project, e))
                    }
                    Event::Init | Event::InitDone => Ok(()),
                };
                if let Err((project, error)) = res {
                    tracing::warn!(%error, name = %project.name_any(), "Project lifecycle failed");
                }
            }
            tracing::debug!("completed");
        }
        .instrument(tracing::info_span!("projects")),
    );

    // Provision the Windows disk alert whenever the node set changes.
    let (nodes, node_events) = runtime.cache_all::<Node>(watcher::Config::default());
    let sync = WindowsNodeSync::new(cluster_name, nodes, store.get::<ClusterAlertRule>())
        .with_metrics(metrics);
    let nodes = tokio::spawn(
        async move {
            tokio::pin!(node_events);
            while let Some(ev) = node_events.next().await {
                // Wait for the initial list to complete before syncing.
                if matches!(ev, Event::Init | Event::InitApply(_)) {
                    continue;
                }
                match sync.sync().await {
                    Ok(Some(Outcome::Created)) => tracing::info!("Created Windows alert rule"),
                    Ok(_) => {}
                    Err(error) => {
                        let source = std::error::Error::source(&error);
                        tracing::warn!(%error, ?source, "Windows node sync failed")
                    }
                }
            }
            tracing::debug!("completed");
        }
        .instrument(tracing::info_span!("nodes")),
    );

    tokio::select! {
        // Block the main thread on the shutdown signal. The watch streams stop once shutdown
        // begins; a second signal aborts.
        res = runtime.run() => {
            if res.is_err() {
                bail!("aborted");
            }
        }

        res = future::try_join(projects, nodes) => {
            if let Err(error) = res {
                bail!("spawned task failed: {}", error);
            }
            tracing::debug!("watches completed");
        }
    }

    Ok(())
}

/// Builds API-backed stores that share a client and field manager
struct Stores {
    client: Client,
    field_manager: String,
}

impl Stores {
    fn get<K>(&self) -> KubeStore<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + 'static,
        K::DynamicType: Default + Eq + Hash + Clone,
    {
        KubeStore::new(self.client.clone()).with_field_manager(self.field_manager.clone())
    }
}

async fn templates(
    client: Client,
    server_version: ServerVersion,
    base_url: &str,
    id: Option<String>,
) -> Result<()> {
    let schemas = Arc::new(Schemas::management());
    let ctx = ApiContext::new(schemas.clone(), Arc::new(BaseUrlBuilder::new(base_url)?));
    let schema = schemas.require(Schemas::MANAGEMENT_VERSION, catalog::CATALOG_TEMPLATE_TYPE)?;

    let versions = KubeStore::<CatalogTemplateVersion>::new(client.clone());
    let store = TransformStore::new(
        KubeProxyStore::<CatalogTemplate>::new(client),
        TemplateStore::new(versions, server_version),
    );

    let out = match id {
        Some(id) => match store.by_id(&ctx, schema, &id).await? {
            Some(template) => serde_json::to_string_pretty(&template)?,
            None => bail!("catalog template {id} not found"),
        },
        None => serde_json::to_string_pretty(&store.list(&ctx, schema).await?)?,
    };
    println!("{out}");
    Ok(())
}
