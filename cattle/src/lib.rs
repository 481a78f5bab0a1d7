//! Precanned alerting and catalog template helpers for clusters managed through the
//! `management.cattle.io` API, built on [`kube`]
//!
//! The crate covers two narrow concerns:
//!
//! - [`precan`] seeds the built-in ("precanned") alert groups and rules into a
//!   cluster's object store, and [`windows`] provisions the Windows disk alert once a
//!   Windows node joins the cluster. Both are get-or-create operations against an
//!   [`ObjectStore`], so they may be run any number of times.
//! - [`catalog`] decorates catalog template API objects with links to each template
//!   version that the running server version supports.
//!
//! [`lifecycle`] drives create-once hooks (such as the project alert seeding) from a
//! resource watch.
//!
//! # Crate Features
//!
//! - **runtime**: Enables the Kubernetes-backed implementations: [`store::KubeStore`],
//!   the [`store::Lister`] implementation for reflector caches, and
//!   [`catalog::KubeProxyStore`]. Without this feature, only the in-memory store is
//!   available.
//!
//! [`kube`]: https://github.com/kube-rs/kube-rs

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod catalog;
pub mod lifecycle;
pub mod metrics;
pub mod precan;
pub mod resource;
pub mod store;
pub mod windows;

pub use self::lifecycle::Lifecycle;
pub use self::metrics::Metrics;
pub use self::precan::{ClusterSeeder, Outcome, ProjectLifecycle, Report, PROJECT_LIFECYCLE};
pub use self::store::{InMemory, Lister, ObjectStore};
pub use self::windows::WindowsNodeSync;

#[cfg(feature = "runtime")]
pub use self::store::KubeStore;
