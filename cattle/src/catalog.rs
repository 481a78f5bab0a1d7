//! API stores for catalog templates
//!
//! API objects are untyped JSON maps, as served to API clients. A [`ResourceStore`]
//! produces them, and a [`TransformStore`] rewrites every object another store
//! returns with a [`Transformer`]. [`TemplateStore`] is the transformer that adds a
//! `versionLinks` map to catalog templates, linking each template version that the
//! running server version supports.

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{collections::HashMap, sync::Arc};
use url::Url;

pub mod external_id;
#[cfg(feature = "runtime")]
mod proxy;
mod template;
pub mod version;

#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub use self::proxy::KubeProxyStore;
pub use self::{
    external_id::{ExternalId, GLOBAL_NAMESPACE},
    template::TemplateStore,
    version::ServerVersion,
};

/// An API object.
pub type Object = Map<String, Value>;

/// The schema id of catalog templates.
pub const CATALOG_TEMPLATE_TYPE: &str = "catalogTemplate";

/// The schema id of templates.
pub const TEMPLATE_TYPE: &str = "template";

/// The schema id of template versions.
pub const TEMPLATE_VERSION_TYPE: &str = "templateVersion";

/// Describes a type of API object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    /// The type name, e.g. `templateVersion`.
    pub id: String,
    /// The collection name used in links, e.g. `templateVersions`.
    pub plural_name: String,
    /// The API version path, e.g. `v3`.
    pub version: String,
}

/// The schemas known to an API
#[derive(Clone, Debug, Default)]
pub struct Schemas {
    schemas: HashMap<(String, String), Schema>,
}

/// Renders links to API objects
pub trait UrlBuilder: Send + Sync {
    fn resource_link_by_id(&self, schema: &Schema, id: &str) -> String;
}

/// Renders links relative to a fixed base URL
#[derive(Clone, Debug)]
pub struct BaseUrlBuilder {
    base: Url,
}

/// The context of a single API request
#[derive(Clone)]
pub struct ApiContext {
    pub schemas: Arc<Schemas>,
    pub url_builder: Arc<dyn UrlBuilder>,
}

/// Serves API objects of a schema
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetches a single object, returning `None` if it does not exist.
    async fn by_id(&self, ctx: &ApiContext, schema: &Schema, id: &str)
        -> Result<Option<Object>, Error>;

    async fn list(&self, ctx: &ApiContext, schema: &Schema) -> Result<Vec<Object>, Error>;
}

/// Rewrites API objects before they are returned
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, ctx: &ApiContext, schema: &Schema, data: Object)
        -> Result<Object, Error>;
}

/// A [`ResourceStore`] that transforms every object returned by an inner store
#[derive(Clone, Debug)]
pub struct TransformStore<S, T> {
    inner: S,
    transformer: T,
}

/// Indicates that an API request could not be served
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("schema {version}/{id} not found")]
    SchemaNotFound { version: String, id: String },

    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid id {0:?}")]
    InvalidId(String),

    #[error("failed to encode object")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] crate::store::Error),
}

/// Renders a declarative object as an API object.
///
/// The object's id is `<namespace>:<name>`, and its spec fields are lifted to the
/// top level.
pub fn api_object<K>(schema: &Schema, obj: &K) -> Result<Object, Error>
where
    K: Resource + Serialize,
{
    let name = obj.name_any();
    let namespace = obj.namespace();
    let id = match namespace.as_deref() {
        Some(ns) => format!("{ns}:{name}"),
        None => name.clone(),
    };

    let mut data = match serde_json::to_value(obj)? {
        Value::Object(data) => data,
        _ => Object::new(),
    };
    let mut out = match data.remove("spec") {
        Some(Value::Object(spec)) => spec,
        _ => Object::new(),
    };
    if let Some(status) = data.remove("status") {
        out.insert("status".to_string(), status);
    }
    out.insert("id".to_string(), id.into());
    out.insert("type".to_string(), schema.id.clone().into());
    out.insert("name".to_string(), name.into());
    if let Some(ns) = namespace {
        out.insert("namespaceId".to_string(), ns.into());
    }
    if !obj.labels().is_empty() {
        out.insert("labels".to_string(), serde_json::to_value(obj.labels())?);
    }
    if !obj.annotations().is_empty() {
        out.insert(
            "annotations".to_string(),
            serde_json::to_value(obj.annotations())?,
        );
    }
    Ok(out)
}

// === impl Schema ===

impl Schema {
    pub fn new(
        version: impl Into<String>,
        id: impl Into<String>,
        plural_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            plural_name: plural_name.into(),
            version: version.into(),
        }
    }
}

// === impl Schemas ===

impl Schemas {
    /// The version of the management API.
    pub const MANAGEMENT_VERSION: &'static str = "v3";

    /// Returns the management API's catalog schemas.
    pub fn management() -> Self {
        let v = Self::MANAGEMENT_VERSION;
        let mut schemas = Self::default();
        schemas.add(Schema::new(v, CATALOG_TEMPLATE_TYPE, "catalogTemplates"));
        schemas.add(Schema::new(v, TEMPLATE_TYPE, "templates"));
        schemas.add(Schema::new(v, TEMPLATE_VERSION_TYPE, "templateVersions"));
        schemas
    }

    pub fn add(&mut self, schema: Schema) {
        self.schemas
            .insert((schema.version.clone(), schema.id.clone()), schema);
    }

    pub fn schema(&self, version: &str, id: &str) -> Option<&Schema> {
        self.schemas.get(&(version.to_string(), id.to_string()))
    }

    /// Like [`Schemas::schema`], but fails if the schema is not known.
    pub fn require(&self, version: &str, id: &str) -> Result<&Schema, Error> {
        self.schema(version, id).ok_or_else(|| Error::SchemaNotFound {
            version: version.to_string(),
            id: id.to_string(),
        })
    }
}

// === impl BaseUrlBuilder ===

impl BaseUrlBuilder {
    pub fn new(base: &str) -> Result<Self, Error> {
        let base = Url::parse(base).map_err(|e| Error::InvalidBaseUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(Error::InvalidBaseUrl(format!("{base} cannot be a base")));
        }
        Ok(Self { base })
    }
}

impl UrlBuilder for BaseUrlBuilder {
    fn resource_link_by_id(&self, schema: &Schema, id: &str) -> String {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend([schema.version.as_str(), schema.plural_name.as_str(), id]);
        }
        url.into()
    }
}

// === impl ApiContext ===

impl ApiContext {
    pub fn new(schemas: Arc<Schemas>, url_builder: Arc<dyn UrlBuilder>) -> Self {
        Self {
            schemas,
            url_builder,
        }
    }
}

impl std::fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiContext")
            .field("schemas", &self.schemas)
            .finish_non_exhaustive()
    }
}

// === impl TransformStore ===

impl<S, T> TransformStore<S, T> {
    pub fn new(inner: S, transformer: T) -> Self {
        Self { inner, transformer }
    }
}

#[async_trait]
impl<S, T> ResourceStore for TransformStore<S, T>
where
    S: ResourceStore,
    T: Transformer,
{
    async fn by_id(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        id: &str,
    ) -> Result<Option<Object>, Error> {
        match self.inner.by_id(ctx, schema, id).await? {
            Some(data) => Ok(Some(self.transformer.transform(ctx, schema, data).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, ctx: &ApiContext, schema: &Schema) -> Result<Vec<Object>, Error> {
        let mut out = Vec::new();
        for data in self.inner.list(ctx, schema).await? {
            out.push(self.transformer.transform(ctx, schema, data).await?);
        }
        Ok(out)
    }
}

#[async_trait]
impl<S: ResourceStore + ?Sized> ResourceStore for Arc<S> {
    async fn by_id(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        id: &str,
    ) -> Result<Option<Object>, Error> {
        (**self).by_id(ctx, schema, id).await
    }

    async fn list(&self, ctx: &ApiContext, schema: &Schema) -> Result<Vec<Object>, Error> {
        (**self).list(ctx, schema).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{CatalogTemplate, TemplateSpec};
    use maplit::{btreemap, convert_args};
    use serde_json::json;

    fn schemas() -> Schemas {
        Schemas::management()
    }

    #[test]
    fn management_schemas() {
        let schemas = schemas();
        let schema = schemas.schema("v3", TEMPLATE_VERSION_TYPE).expect("schema");
        assert_eq!(schema.plural_name, "templateVersions");
        assert!(schemas.schema("v1", TEMPLATE_VERSION_TYPE).is_none());
        assert!(matches!(
            schemas.require("v3", "project"),
            Err(Error::SchemaNotFound { .. })
        ));
    }

    #[test]
    fn links() {
        let schemas = schemas();
        let schema = schemas.require("v3", TEMPLATE_VERSION_TYPE).unwrap();

        let urls = BaseUrlBuilder::new("https://rancher.example.com").unwrap();
        assert_eq!(
            urls.resource_link_by_id(schema, "cattle-global-data:library-mysql-0.3.8"),
            "https://rancher.example.com/v3/templateVersions/cattle-global-data:library-mysql-0.3.8"
        );

        let urls = BaseUrlBuilder::new("https://example.com/rancher/?x=1").unwrap();
        assert_eq!(
            urls.resource_link_by_id(schema, "a b"),
            "https://example.com/rancher/v3/templateVersions/a%20b"
        );

        assert!(BaseUrlBuilder::new("mailto:ops@example.com").is_err());
        assert!(BaseUrlBuilder::new("/v3").is_err());
    }

    #[test]
    fn renders_api_objects() {
        let mut template = CatalogTemplate::new(
            "library-mysql",
            TemplateSpec {
                display_name: "MySQL".to_string(),
                catalog_id: "library".to_string(),
                ..Default::default()
            },
        );
        template.metadata.namespace = Some(GLOBAL_NAMESPACE.to_string());
        template.metadata.labels = Some(convert_args!(btreemap!("catalog.cattle.io/name" => "library")));

        let schemas = schemas();
        let schema = schemas.require("v3", CATALOG_TEMPLATE_TYPE).unwrap();
        let data = api_object(schema, &template).unwrap();
        assert_eq!(
            Value::Object(data),
            json!({
                "id": "cattle-global-data:library-mysql",
                "type": "catalogTemplate",
                "name": "library-mysql",
                "namespaceId": "cattle-global-data",
                "labels": { "catalog.cattle.io/name": "library" },
                "displayName": "MySQL",
                "catalogId": "library",
                "defaultVersion": "",
                "versions": [],
            })
        );
    }

    struct Fixed(Vec<Object>);

    #[async_trait]
    impl ResourceStore for Fixed {
        async fn by_id(&self, _: &ApiContext, _: &Schema, id: &str) -> Result<Option<Object>, Error> {
            Ok(self.0.iter().find(|o| o["id"] == id).cloned())
        }

        async fn list(&self, _: &ApiContext, _: &Schema) -> Result<Vec<Object>, Error> {
            Ok(self.0.clone())
        }
    }

    struct Stamp;

    #[async_trait]
    impl Transformer for Stamp {
        async fn transform(&self, _: &ApiContext, schema: &Schema, mut data: Object) -> Result<Object, Error> {
            data.insert("seenAs".to_string(), schema.id.clone().into());
            Ok(data)
        }
    }

    #[tokio::test]
    async fn transforms_every_object() {
        let objects = [json!({ "id": "a" }), json!({ "id": "b" })]
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(o) => Some(o),
                _ => None,
            })
            .collect();
        let store = TransformStore::new(Fixed(objects), Stamp);
        let ctx = ApiContext::new(
            Arc::new(schemas()),
            Arc::new(BaseUrlBuilder::new("https://example.com").unwrap()),
        );
        let schema = Schema::new("v3", TEMPLATE_TYPE, "templates");

        let list = store.list(&ctx, &schema).await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|o| o["seenAs"] == "template"));

        let b = store.by_id(&ctx, &schema, "b").await.unwrap().expect("b");
        assert_eq!(b["seenAs"], "template");
        assert!(store.by_id(&ctx, &schema, "c").await.unwrap().is_none());
    }
}
