//! Parsing of `catalog://` external ids
//!
//! An external id names a template version in a catalog, e.g.
//! `catalog://?catalog=cattle-global-data/library&type=clusterCatalog&template=mysql&version=0.3.8`.
//! Catalogs without a namespace prefix are global.

use std::{fmt, str::FromStr};
use url::Url;

/// The namespace holding global catalogs and their template versions.
pub const GLOBAL_NAMESPACE: &str = "cattle-global-data";

/// Identifies a single template version in a catalog
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalId {
    namespace: String,
    catalog: String,
    catalog_type: Option<String>,
    template: String,
    version: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidExternalId {
    #[error("invalid external id: {0}")]
    Url(#[from] url::ParseError),

    #[error("external id is missing the {0} parameter")]
    Missing(&'static str),
}

/// Returns the name of a template version object: `<catalog>-<template>-<version>`.
pub fn template_version_id(catalog: &str, template: &str, version: &str) -> String {
    format!("{catalog}-{template}-{version}")
}

// === impl ExternalId ===

impl ExternalId {
    /// The namespace of the template version object.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn catalog_type(&self) -> Option<&str> {
        self.catalog_type.as_deref()
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The name of the template version object.
    pub fn template_version_id(&self) -> String {
        template_version_id(&self.catalog, &self.template, &self.version)
    }
}

impl FromStr for ExternalId {
    type Err = InvalidExternalId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s)?;

        let mut catalog = None;
        let mut catalog_type = None;
        let mut template = None;
        let mut version = None;
        for (k, v) in url.query_pairs() {
            let slot = match k.as_ref() {
                "catalog" => &mut catalog,
                "type" => &mut catalog_type,
                "template" => &mut template,
                "version" => &mut version,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(v.into_owned());
            }
        }

        let required = |v: Option<String>, name| {
            v.filter(|v| !v.is_empty())
                .ok_or(InvalidExternalId::Missing(name))
        };
        let catalog = required(catalog, "catalog")?;
        let template = required(template, "template")?;
        let version = required(version, "version")?;

        let (namespace, catalog) = match catalog.split_once('/') {
            Some((ns, name)) => (ns.to_string(), name.to_string()),
            None => (GLOBAL_NAMESPACE.to_string(), catalog),
        };

        Ok(Self {
            namespace,
            catalog,
            catalog_type: catalog_type.filter(|t| !t.is_empty()),
            template,
            version,
        })
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "catalog://?catalog=")?;
        if self.namespace != GLOBAL_NAMESPACE {
            write!(f, "{}/", self.namespace)?;
        }
        write!(f, "{}", self.catalog)?;
        if let Some(t) = &self.catalog_type {
            write!(f, "&type={t}")?;
        }
        write!(f, "&template={}&version={}", self.template, self.version)
    }
}
