//! Declarative object store.
//!
//! Reconcilers read and write their objects through [`ObjectStore`], backed
//! by the Kubernetes API in production ([`KubeStore`]) and by an in-memory
//! map in tests ([`MemoryStore`]).

use crate::error::ControllerError;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::debug;

/// CRUD over one namespaced kind.
#[async_trait::async_trait]
pub trait ObjectStore<K: Send + Sync + 'static>: Send + Sync {
    /// Fetch an object; `None` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError>;

    /// List objects in `namespace` carrying every label in `selector`.
    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>, ControllerError>;

    async fn create(&self, obj: &K) -> Result<K, ControllerError>;

    /// Replace an object. Fails with [`ControllerError::Conflict`] when the
    /// stored resource version moved since `obj` was read.
    async fn update(&self, obj: &K) -> Result<K, ControllerError>;

    /// Request deletion. Objects with finalizers linger until they are removed.
    /// Deleting an absent object succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    /// Write metadata, spec and status. Fails with
    /// [`ControllerError::Conflict`] when the stored resource version moved
    /// since `obj` was read.
    async fn patch(&self, obj: &K) -> Result<K, ControllerError>;
}

/// Namespace and name of an object.
pub fn object_key<K: Resource>(obj: &K) -> Result<(String, String), ControllerError> {
    let meta = obj.meta();
    let namespace = meta.namespace.clone().ok_or(ControllerError::MissingObjectKey("namespace"))?;
    let name = meta.name.clone().ok_or(ControllerError::MissingObjectKey("name"))?;
    Ok((namespace, name))
}

pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add `finalizer`; returns whether the object changed.
pub fn add_finalizer<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    if has_finalizer(obj, finalizer) {
        return false;
    }
    obj.meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Remove `finalizer`; returns whether the object changed.
///
/// Leaves an empty list behind so a merge patch clears the field.
pub fn remove_finalizer<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    if !has_finalizer(obj, finalizer) {
        return false;
    }
    if let Some(finalizers) = obj.meta_mut().finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }
    true
}

fn map_kube_error(err: kube::Error, what: &str) -> ControllerError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => ControllerError::NotFound(what.to_string()),
        kube::Error::Api(ae) if ae.code == 409 => ControllerError::Conflict(what.to_string()),
        e => ControllerError::Kube(e),
    }
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self { client: self.client.clone(), _kind: PhantomData }
    }
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self { client, _kind: PhantomData }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>, ControllerError> {
        let params = ListParams::default().labels(&crds::labels::selector_string(selector));
        Ok(self.api(namespace).list(&params).await?.items)
    }

    async fn create(&self, obj: &K) -> Result<K, ControllerError> {
        let (namespace, name) = object_key(obj)?;
        debug!("Creating {}/{}", namespace, name);
        self.api(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error(e, &format!("{}/{}", namespace, name)))
    }

    async fn update(&self, obj: &K) -> Result<K, ControllerError> {
        let (namespace, name) = object_key(obj)?;
        self.api(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error(e, &format!("{}/{}", namespace, name)))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        debug!("Deleting {}/{}", namespace, name);
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(ControllerError::Kube(e)),
        }
    }

    async fn patch(&self, obj: &K) -> Result<K, ControllerError> {
        let (namespace, name) = object_key(obj)?;
        let what = format!("{}/{}", namespace, name);
        let api = self.api(&namespace);
        let params = PatchParams::default();

        // The resource version stays in both bodies: the API server rejects
        // a stale write with 409.
        let mut resource_version = obj.meta().resource_version.clone();
        let mut value = serde_json::to_value(obj)?;
        if let Some(map) = value.as_object_mut() {
            // Status is a subresource and goes first: removing the last
            // finalizer below may delete the object.
            if let Some(status) = map.remove("status").filter(|s| !s.is_null()) {
                let body = serde_json::json!({
                    "metadata": { "resourceVersion": resource_version },
                    "status": status,
                });
                let stored = api
                    .patch_status(&name, &params, &Patch::Merge(&body))
                    .await
                    .map_err(|e| map_kube_error(e, &what))?;
                resource_version = stored.meta().resource_version.clone();
            }
            if let Some(meta) = map.get_mut("metadata").and_then(serde_json::Value::as_object_mut) {
                meta.remove("managedFields");
                meta.insert("resourceVersion".to_string(), serde_json::json!(resource_version));
            }
        }

        api.patch(&name, &params, &Patch::Merge(&value))
            .await
            .map_err(|e| map_kube_error(e, &what))
    }
}

#[cfg(test)]
pub use memory::MemoryStore;


#[cfg(test)]
mod tests {
    use super::*;
    use crds::{FleetMachine, FleetMachineSpec, Image, OsDisk};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn machine(name: &str, labels: &[(&str, &str)]) -> FleetMachine {
        FleetMachine {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            spec: FleetMachineSpec {
                vm_size: "small".into(),
                image: Image::default(),
                os_disk: OsDisk::default(),
                availability_zone: None,
                location: "westus".into(),
                ssh_public_key: String::new(),
                availability_set: None,
                provider_id: None,
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn test_delete_is_gated_by_finalizers() {
        let store = MemoryStore::new();
        let mut m = machine("m1", &[]);
        add_finalizer(&mut m, "test/finalizer");
        store.insert(m);

        store.delete("default", "m1").await.unwrap();
        let m = store.fetch("default", "m1").expect("still present");
        assert!(is_deleting(&m));

        let mut m = m;
        remove_finalizer(&mut m, "test/finalizer");
        store.patch(&m).await.unwrap();
        assert!(!store.contains("default", "m1"));

        // Deleting an absent object succeeds
        store.delete("default", "m1").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_detects_conflicts() {
        let store = MemoryStore::new();
        let stale = store.insert(machine("m1", &[]));
        let mut fresh = stale.clone();
        fresh.spec.vm_size = "large".into();
        store.update(&fresh).await.unwrap();

        let err = store.update(&stale).await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_patch_rejects_stale_copy() {
        let store = MemoryStore::new();
        let stale = store.insert(machine("m1", &[]));
        let mut fresh = stale.clone();
        fresh.spec.vm_size = "large".into();
        store.update(&fresh).await.unwrap();

        let mut late = stale.clone();
        late.spec.provider_id = Some("fleet://rg/m1".into());
        let err = store.patch(&late).await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
        let current = store.fetch("default", "m1").unwrap();
        assert_eq!(current.spec.vm_size, "large");
        assert!(current.spec.provider_id.is_none());

        // A copy at the current version goes through
        let mut current = current;
        current.spec.provider_id = Some("fleet://rg/m1".into());
        let stored = store.patch(&current).await.unwrap();
        assert_ne!(stored.metadata.resource_version, current.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_list_filters_by_labels() {
        let store = MemoryStore::new();
        store.insert(machine("a", &[("cluster", "one")]));
        store.insert(machine("b", &[("cluster", "two")]));
        let selector = BTreeMap::from([("cluster".to_string(), "one".to_string())]);
        let found = store.list("default", &selector).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("a"));
        assert!(store.list("other", &selector).await.unwrap().is_empty());
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut m = machine("m1", &[]);
        assert!(add_finalizer(&mut m, "f"));
        assert!(!add_finalizer(&mut m, "f"));
        assert!(has_finalizer(&m, "f"));
        assert!(remove_finalizer(&mut m, "f"));
        assert!(!remove_finalizer(&mut m, "f"));
        assert_eq!(m.metadata.finalizers, Some(vec![]));
    }
}
