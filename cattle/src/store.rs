//! Access to declarative objects
//!
//! [`ObjectStore`] is the narrow client interface the hooks in this crate are written
//! against: a keyed lookup where absence is not an error, a create that reports
//! whether the key was already taken, and an annotation update used to record
//! lifecycle markers. [`Lister`] lists cached objects by label selector.
//!
//! [`InMemory`] implements both for tests. With the **runtime** feature,
//! [`KubeStore`] implements [`ObjectStore`] against the Kubernetes API and a
//! reflector [`Store`](kube::runtime::reflector::Store) implements [`Lister`].

use async_trait::async_trait;
use kube::{
    core::{Selector, SelectorExt},
    Resource, ResourceExt,
};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

/// Indicates an error reading or writing objects
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The object being created already exists
    #[error("{kind} {name:?} already exists")]
    AlreadyExists {
        /// The object's kind
        kind: String,
        /// The object's name
        name: String,
    },

    /// The object being updated does not exist
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// The object's kind
        kind: String,
        /// The object's name
        name: String,
    },

    /// An error was received from the Kubernetes API
    #[cfg(feature = "runtime")]
    #[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
    #[error(transparent)]
    Api(#[from] kube::Error),

    /// A Kubernetes API call timed out
    #[error("timed out")]
    Timeout,

    /// The store could not serve the request
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A client for namespaced declarative objects of type `K`
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Fetches an object, returning `None` if it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>;

    /// Creates an object in the namespace set in its metadata.
    ///
    /// Fails with [`Error::AlreadyExists`] if an object with the same key exists.
    async fn create(&self, obj: &K) -> Result<K, Error>;

    /// Sets an annotation on an existing object.
    async fn annotate(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<K, Error>;
}

/// Lists objects of type `K` across all namespaces
pub trait Lister<K> {
    /// Returns all objects whose labels match `selector`.
    fn list(&self, selector: &Selector) -> Result<Vec<Arc<K>>, Error>;
}

/// An [`ObjectStore`] and [`Lister`] backed by a map, used in tests
///
/// Reads and writes can be made to fail with [`Error::Unavailable`] to exercise error
/// handling.
#[derive(Debug)]
pub struct InMemory<K> {
    objects: Mutex<BTreeMap<(String, String), Arc<K>>>,
    faults: Mutex<Faults>,
}

#[derive(Debug, Default)]
struct Faults {
    get: Option<String>,
    create: Option<String>,
    list: Option<String>,
    creates: usize,
}

#[cfg(feature = "runtime")]
pub use self::kube_store::KubeStore;

// === impl Error ===

impl Error {
    /// Returns true if the error indicates that an object already exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            #[cfg(feature = "runtime")]
            Self::Api(kube::Error::Api(rsp)) => rsp.code == 409,
            _ => false,
        }
    }

    /// Returns true if the error indicates that an object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            #[cfg(feature = "runtime")]
            Self::Api(kube::Error::Api(rsp)) => rsp.code == 404,
            _ => false,
        }
    }
}

#[async_trait]
impl<K, S> ObjectStore<K> for Arc<S>
where
    K: Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, Error> {
        (**self).get(namespace, name).await
    }

    async fn create(&self, obj: &K) -> Result<K, Error> {
        (**self).create(obj).await
    }

    async fn annotate(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<K, Error> {
        (**self).annotate(namespace, name, key, value).await
    }
}

impl<K, L: Lister<K> + ?Sized> Lister<K> for Arc<L> {
    fn list(&self, selector: &Selector) -> Result<Vec<Arc<K>>, Error> {
        (**self).list(selector)
    }
}

// === impl InMemory ===

impl<K> Default for InMemory<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(Faults::default()),
        }
    }
}

impl<K> InMemory<K>
where
    K: Resource + Clone,
{
    /// Creates a store holding the given objects.
    pub fn with_objects(objs: impl IntoIterator<Item = K>) -> Self {
        let store = Self::default();
        {
            let mut objects = store.objects.lock();
            for obj in objs {
                objects.insert(key_of(&obj), Arc::new(obj));
            }
        }
        store
    }

    /// Inserts or replaces an object without counting it as a create.
    pub fn insert(&self, obj: K) {
        self.objects.lock().insert(key_of(&obj), Arc::new(obj));
    }

    /// Removes an object, returning it if it existed.
    pub fn remove(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|obj| (*obj).clone())
    }

    /// Returns a copy of an object without going through [`ObjectStore::get`].
    pub fn peek(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .map(|obj| (**obj).clone())
    }

    /// Returns the names of all objects in a namespace.
    pub fn names(&self, namespace: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Returns the number of objects in the store.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Returns true if the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Returns the number of objects created through [`ObjectStore::create`].
    pub fn creates(&self) -> usize {
        self.faults.lock().creates
    }

    /// Causes subsequent lookups to fail with the given message.
    pub fn fail_gets(&self, msg: impl Into<String>) {
        self.faults.lock().get = Some(msg.into());
    }

    /// Causes subsequent creates to fail with the given message.
    pub fn fail_creates(&self, msg: impl Into<String>) {
        self.faults.lock().create = Some(msg.into());
    }

    /// Causes subsequent lists to fail with the given message.
    pub fn fail_lists(&self, msg: impl Into<String>) {
        self.faults.lock().list = Some(msg.into());
    }

    /// Clears all injected failures.
    pub fn heal(&self) {
        let mut faults = self.faults.lock();
        faults.get = None;
        faults.create = None;
        faults.list = None;
    }
}

#[async_trait]
impl<K> ObjectStore<K> for InMemory<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, Error> {
        if let Some(msg) = self.faults.lock().get.clone() {
            return Err(Error::Unavailable(msg));
        }
        Ok(self.peek(namespace, name))
    }

    async fn create(&self, obj: &K) -> Result<K, Error> {
        {
            let faults = self.faults.lock();
            if let Some(msg) = faults.create.clone() {
                return Err(Error::Unavailable(msg));
            }
        }

        let key = key_of(obj);
        let mut objects = self.objects.lock();
        if objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: K::kind(&Default::default()).into_owned(),
                name: key.1,
            });
        }
        objects.insert(key, Arc::new(obj.clone()));
        self.faults.lock().creates += 1;
        Ok(obj.clone())
    }

    async fn annotate(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<K, Error> {
        let mut objects = self.objects.lock();
        let obj = objects
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::NotFound {
                kind: K::kind(&Default::default()).into_owned(),
                name: name.to_string(),
            })?;
        let mut updated = (**obj).clone();
        updated
            .annotations_mut()
            .insert(key.to_string(), value.to_string());
        *obj = Arc::new(updated.clone());
        Ok(updated)
    }
}

impl<K: Resource> Lister<K> for InMemory<K> {
    fn list(&self, selector: &Selector) -> Result<Vec<Arc<K>>, Error> {
        if let Some(msg) = self.faults.lock().list.clone() {
            return Err(Error::Unavailable(msg));
        }
        Ok(self
            .objects
            .lock()
            .values()
            .filter(|obj| selector.matches(obj.labels()))
            .cloned()
            .collect())
    }
}

fn key_of<K: Resource>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

#[cfg(feature = "runtime")]
mod kube_store {
    use super::{Error, Lister, ObjectStore};
    use async_trait::async_trait;
    use kube::{
        api::{Patch, PatchParams, PostParams},
        core::{NamespaceResourceScope, Selector, SelectorExt},
        runtime::reflector::{ObjectRef, Store},
        Api, Client, Resource, ResourceExt,
    };
    use serde::{de::DeserializeOwned, Serialize};
    use std::{borrow::Cow, fmt::Debug, future::Future, hash::Hash, sync::Arc};
    use tokio::time::{self, Duration};

    const API_TIMEOUT: Duration = Duration::from_secs(10);

    /// An [`ObjectStore`] backed by the Kubernetes API
    ///
    /// Lookups are served from a reflector cache when one is configured, mirroring a
    /// controller's lister; writes always go to the API server.
    #[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
    pub struct KubeStore<K>
    where
        K: Resource + Clone + 'static,
        K::DynamicType: Eq + Hash + Clone,
    {
        client: Client,
        cache: Option<Store<K>>,
        field_manager: Cow<'static, str>,
    }

    impl<K> KubeStore<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + 'static,
        K::DynamicType: Default + Eq + Hash + Clone,
    {
        pub(crate) const DEFAULT_FIELD_MANAGER: &'static str = "cattle";

        /// Creates a store that reads and writes through the given client.
        pub fn new(client: Client) -> Self {
            Self {
                client,
                cache: None,
                field_manager: Self::DEFAULT_FIELD_MANAGER.into(),
            }
        }

        /// Serves lookups from the given reflector cache instead of the API.
        pub fn with_cache(mut self, cache: Store<K>) -> Self {
            self.cache = Some(cache);
            self
        }

        /// Overrides the field manager used when writing objects
        pub fn with_field_manager(mut self, field_manager: impl Into<Cow<'static, str>>) -> Self {
            self.field_manager = field_manager.into();
            self
        }

        fn api(&self, namespace: &str) -> Api<K> {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    #[async_trait]
    impl<K> ObjectStore<K> for KubeStore<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K: Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
        K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
    {
        async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, Error> {
            if let Some(cache) = self.cache.as_ref() {
                let key = ObjectRef::new(name).within(namespace);
                return Ok(cache.get(&key).map(|obj| (*obj).clone()));
            }

            bounded(API_TIMEOUT, self.api(namespace).get_opt(name))
                .await?
                .map_err(Into::into)
        }

        async fn create(&self, obj: &K) -> Result<K, Error> {
            let namespace = obj.namespace().unwrap_or_default();
            let params = PostParams {
                field_manager: Some(self.field_manager.to_string()),
                ..Default::default()
            };
            tracing::debug!(%namespace, name = %obj.name_any(), "Creating");
            bounded(API_TIMEOUT, self.api(&namespace).create(&params, obj))
                .await?
                .map_err(|error| {
                    create_error(&K::kind(&Default::default()), &obj.name_any(), error)
                })
        }

        async fn annotate(
            &self,
            namespace: &str,
            name: &str,
            key: &str,
            value: &str,
        ) -> Result<K, Error> {
            let patch = Patch::Merge(serde_json::json!({
                "metadata": {
                    "annotations": { key: value },
                },
            }));
            let params = PatchParams {
                field_manager: Some(self.field_manager.to_string()),
                ..Default::default()
            };
            tracing::debug!(%namespace, %name, %key, "Annotating");
            bounded(API_TIMEOUT, self.api(namespace).patch(name, &params, &patch))
                .await?
                .map_err(|error| patch_error(&K::kind(&Default::default()), name, error))
        }
    }

    /// Fails with [`Error::Timeout`] if `call` does not complete in time.
    async fn bounded<T>(
        timeout: Duration,
        call: impl Future<Output = Result<T, kube::Error>>,
    ) -> Result<Result<T, kube::Error>, Error> {
        time::timeout(timeout, call).await.map_err(|_| Error::Timeout)
    }

    fn create_error(kind: &str, name: &str, error: kube::Error) -> Error {
        match error {
            kube::Error::Api(rsp) if rsp.code == 409 => Error::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            error => error.into(),
        }
    }

    fn patch_error(kind: &str, name: &str, error: kube::Error) -> Error {
        match error {
            kube::Error::Api(rsp) if rsp.code == 404 => Error::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            error => error.into(),
        }
    }

    impl<K> Lister<K> for Store<K>
    where
        K: Resource + Clone + 'static,
        K::DynamicType: Eq + Hash + Clone,
    {
        fn list(&self, selector: &Selector) -> Result<Vec<Arc<K>>, Error> {
            Ok(self
                .state()
                .into_iter()
                .filter(|obj| selector.matches(obj.labels()))
                .collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use kube::core::ErrorResponse;

        fn api_error(code: u16, reason: &str) -> kube::Error {
            kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("{reason} (test)"),
                reason: reason.to_string(),
                code,
            })
        }

        #[test]
        fn api_status_predicates() {
            let conflict = Error::from(api_error(409, "AlreadyExists"));
            assert!(conflict.is_already_exists());
            assert!(!conflict.is_not_found());

            let missing = Error::from(api_error(404, "NotFound"));
            assert!(missing.is_not_found());
            assert!(!missing.is_already_exists());

            let internal = Error::from(api_error(500, "InternalError"));
            assert!(!internal.is_already_exists());
            assert!(!internal.is_not_found());
        }

        #[test]
        fn create_conflicts_already_exist() {
            const KIND: &str = "ClusterAlertRule";
            const NAME: &str = "etcd-db-size";

            let err = create_error(KIND, NAME, api_error(409, "AlreadyExists"));
            assert!(
                matches!(err, Error::AlreadyExists { ref kind, ref name } if kind == KIND && name == NAME),
                "{err:?}"
            );
            assert_eq!(err.to_string(), r#"ClusterAlertRule "etcd-db-size" already exists"#);

            // A missing namespace is not a missing object.
            let err = create_error(KIND, NAME, api_error(404, "NotFound"));
            assert!(matches!(err, Error::Api(_)), "{err:?}");
            assert!(!err.is_already_exists());

            let err = create_error(KIND, NAME, api_error(500, "InternalError"));
            assert!(matches!(err, Error::Api(_)), "{err:?}");
        }

        #[test]
        fn missing_patch_targets_are_not_found() {
            let err = patch_error("Project", "p-gone", api_error(404, "NotFound"));
            assert!(
                matches!(err, Error::NotFound { ref name, .. } if name == "p-gone"),
                "{err:?}"
            );

            let err = patch_error("Project", "p-1", api_error(409, "Conflict"));
            assert!(matches!(err, Error::Api(_)), "{err:?}");
            assert!(err.is_already_exists());
        }

        #[tokio::test(start_paused = true)]
        async fn stalled_calls_time_out() {
            let stalled = std::future::pending::<Result<(), kube::Error>>();
            let res = bounded(API_TIMEOUT, stalled).await;
            assert!(matches!(res, Err(Error::Timeout)), "{res:?}");

            let res = bounded(API_TIMEOUT, async { Ok::<_, kube::Error>(7) }).await;
            assert!(matches!(res, Ok(Ok(7))), "{res:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Project, ProjectSpec};
    use k8s_openapi::api::core::v1::Node;
    use kube::core::{Expression, ObjectMeta};
    use maplit::{btreemap, convert_args};

    fn project(ns: &str, name: &str) -> Project {
        Project {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: ProjectSpec {
                display_name: name.to_string(),
                cluster_name: ns.to_string(),
                ..Default::default()
            },
        }
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

    #[tokio::test]
    async fn get_absent_is_none() {
        let store = InMemory::<Project>::default();
        assert!(store.get("c-1", "p-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemory::default();
        store.create(&project("c-1", "p-1")).await.expect("create");
        let got = store.get("c-1", "p-1").await.unwrap().expect("project");
        assert_eq!(got, project("c-1", "p-1"));
        assert!(store.get("c-2", "p-1").await.unwrap().is_none());
        assert_eq!(store.creates(), 1);
    }

    #[tokio::test]
    async fn create_conflicts() {
        let store = InMemory::with_objects([project("c-1", "p-1")]);
        let err = store
            .create(&project("c-1", "p-1"))
            .await
            .expect_err("must conflict");
        assert!(err.is_already_exists());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), r#"Project "p-1" already exists"#);
        assert_eq!(store.creates(), 0);
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = InMemory::with_objects([project("c-1", "p-1")]);
        store.fail_gets("etcdserver: leader changed");
        store.fail_creates("connection refused");

        let err = store.get("c-1", "p-1").await.expect_err("get must fail");
        assert!(matches!(err, Error::Unavailable(_)));
        let err = store
            .create(&project("c-1", "p-2"))
            .await
            .expect_err("create must fail");
        assert!(!err.is_already_exists());

        store.heal();
        assert!(store.get("c-1", "p-1").await.unwrap().is_some());
        store.create(&project("c-1", "p-2")).await.expect("create");
    }

    #[tokio::test]
    async fn annotate() {
        let store = InMemory::with_objects([project("c-1", "p-1")]);
        let updated = store
            .annotate("c-1", "p-1", "example.com/marker", "true")
            .await
            .expect("annotate");
        assert_eq!(
            updated.annotations().get("example.com/marker").map(String::as_str),
            Some("true")
        );
        let stored = store.peek("c-1", "p-1").expect("project");
        assert_eq!(stored.annotations(), updated.annotations());

        let err = store
            .annotate("c-1", "p-9", "example.com/marker", "true")
            .await
            .expect_err("must not exist");
        assert!(err.is_not_found());
    }

    #[test]
    fn list_by_selector() {
        let store = InMemory::with_objects([
            node("linux-0", "linux"),
            node("win-0", "windows"),
            node("win-1", "windows"),
        ]);
        let selector = Selector::from(Expression::Equal(
            "kubernetes.io/os".to_string(),
            "windows".to_string(),
        ));
        let mut names = store
            .list(&selector)
            .unwrap()
            .iter()
            .map(|n| n.name_any())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, ["win-0", "win-1"]);

        store.fail_lists("cache not synced");
        assert!(store.list(&selector).is_err());
    }
}
