use super::{api_object, ApiContext, Error, Object, ResourceStore, Schema};
use async_trait::async_trait;
use kube::{api::ListParams, core::NamespaceResourceScope, Api, Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, marker::PhantomData};

/// A [`ResourceStore`] that reads declarative objects from the Kubernetes API
///
/// Ids have the form `<namespace>:<name>`; listing spans all namespaces.
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
#[derive(Clone)]
pub struct KubeProxyStore<K> {
    client: Client,
    _marker: PhantomData<fn() -> K>,
}

impl<K> KubeProxyStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _marker: PhantomData,
        }
    }
}

impl<K> Debug for KubeProxyStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeProxyStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl<K> ResourceStore for KubeProxyStore<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K: Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn by_id(
        &self,
        _: &ApiContext,
        schema: &Schema,
        id: &str,
    ) -> Result<Option<Object>, Error> {
        let (namespace, name) = id
            .split_once(':')
            .ok_or_else(|| Error::InvalidId(id.to_string()))?;
        let api = Api::<K>::namespaced(self.client.clone(), namespace);
        let obj = api
            .get_opt(name)
            .await
            .map_err(crate::store::Error::from)?;
        obj.map(|obj| api_object(schema, &obj)).transpose()
    }

    async fn list(&self, _: &ApiContext, schema: &Schema) -> Result<Vec<Object>, Error> {
        let api = Api::<K>::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(crate::store::Error::from)?;
        tracing::trace!(items = list.items.len(), schema = %schema.id, "Listed");
        list.items
            .iter()
            .map(|obj| api_object(schema, obj))
            .collect()
    }
}
