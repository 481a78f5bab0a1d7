use super::{
    external_id::ExternalId, version::ServerVersion, ApiContext, Error, Object, Schema,
    Schemas, Transformer, TEMPLATE_VERSION_TYPE,
};
use crate::{resource::CatalogTemplateVersion, store::ObjectStore};
use async_trait::async_trait;
use serde_json::Value;

/// The field set on every catalog template.
pub const VERSION_LINKS: &str = "versionLinks";

/// Links each catalog template to the versions the server can run
///
/// A version is linked unless its template version object says the server version
/// is out of bounds. Any failure to find out (an unparseable external id, a missing
/// or unreadable template version) links the version anyway; installing an
/// incompatible version is rejected elsewhere.
#[derive(Clone, Debug)]
pub struct TemplateStore<V> {
    versions: V,
    server_version: ServerVersion,
}

impl<V> TemplateStore<V>
where
    V: ObjectStore<CatalogTemplateVersion>,
{
    pub fn new(versions: V, server_version: ServerVersion) -> Self {
        Self {
            versions,
            server_version,
        }
    }

    /// Computes the `versionLinks` map for a catalog template API object.
    ///
    /// Each compatible version maps to a link to its template version, whose id is
    /// `<template id>-<version>`, or `<template id>-<revision>` for versions with a
    /// revision.
    pub async fn version_links(
        &self,
        ctx: &ApiContext,
        template: &Object,
    ) -> Result<Object, Error> {
        let schema = ctx
            .schemas
            .require(Schemas::MANAGEMENT_VERSION, TEMPLATE_VERSION_TYPE)?;

        let mut links = Object::new();
        let Some(Value::Array(versions)) = template.get("versions") else {
            return Ok(links);
        };
        let id = template.get("id").and_then(Value::as_str).unwrap_or_default();

        for entry in versions {
            let Some(version) = entry.get("version").and_then(Value::as_str) else {
                tracing::debug!(%id, "Skipping template version without a version");
                continue;
            };
            let version_id = match entry.get("revision").and_then(Value::as_i64) {
                Some(revision) => format!("{id}-{revision}"),
                None => format!("{id}-{version}"),
            };

            let external_id = entry.get("externalId").and_then(Value::as_str);
            if self.is_compatible(external_id).await {
                let link = ctx.url_builder.resource_link_by_id(schema, &version_id);
                links.insert(version.to_string(), link.into());
            }
        }

        Ok(links)
    }

    /// Returns false only when the template version is known to be incompatible.
    async fn is_compatible(&self, external_id: Option<&str>) -> bool {
        if !self.server_version.is_release() {
            return true;
        }

        let Some(external_id) = external_id else {
            return true;
        };
        let id = match external_id.parse::<ExternalId>() {
            Ok(id) => id,
            Err(error) => {
                tracing::debug!(%error, %external_id, "Linking unparseable template version");
                return true;
            }
        };

        let name = id.template_version_id();
        let version = match self.versions.get(id.namespace(), &name).await {
            Ok(Some(version)) => version,
            Ok(None) => return true,
            Err(error) => {
                tracing::debug!(
                    %error,
                    namespace = %id.namespace(),
                    %name,
                    "Linking unreadable template version",
                );
                return true;
            }
        };

        let spec = &version.spec;
        match self.server_version.satisfies(
            spec.rancher_min_version.as_deref(),
            spec.rancher_max_version.as_deref(),
        ) {
            Ok(()) => true,
            Err(reason) => {
                tracing::trace!(%reason, %name, "Hiding incompatible template version");
                false
            }
        }
    }
}

#[async_trait]
impl<V> Transformer for TemplateStore<V>
where
    V: ObjectStore<CatalogTemplateVersion>,
{
    async fn transform(
        &self,
        ctx: &ApiContext,
        _: &Schema,
        mut data: Object,
    ) -> Result<Object, Error> {
        let links = self.version_links(ctx, &data).await?;
        data.insert(VERSION_LINKS.to_string(), Value::Object(links));
        Ok(data)
    }
}
