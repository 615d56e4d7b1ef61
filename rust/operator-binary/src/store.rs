//! Access to the Kubernetes objects that a reconciliation pass reads and writes
//!
//! All writes are conditional on the `resourceVersion` that was read, so that concurrent
//! modifications fail the pass instead of being overwritten.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;
use snafu::{ResultExt, Snafu};
use stackable_certificate_operator_crd_utils::SecretReference;
use stackable_operator::{
    k8s_openapi::{api::core::v1::Secret, ByteString, NamespaceResourceScope},
    kube::{
        self,
        api::{DynamicObject, Patch, PatchParams, PostParams},
        runtime::reflector::ObjectRef,
        Api, ResourceExt,
    },
};

use crate::crd::{
    DiscoveryService, DiscoveryServiceCertificate, DiscoveryServiceCertificateStatus,
    DiscoveryServiceStatus,
};

#[cfg(test)]
pub mod memory;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get {object}"))]
    Get {
        source: kube::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("{object} already exists"))]
    AlreadyExists { object: ObjectRef<DynamicObject> },

    #[snafu(display("failed to create {object}"))]
    Create {
        source: kube::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("{object} was modified concurrently"))]
    Conflict { object: ObjectRef<DynamicObject> },

    #[snafu(display("failed to patch {object}"))]
    Patch {
        source: kube::Error,
        object: ObjectRef<DynamicObject>,
    },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_secret(&self, secret_ref: &SecretReference) -> Result<Option<Secret>>;

    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    /// Replaces the data of `secret` in a single write.
    async fn patch_secret_data(
        &self,
        secret: &Secret,
        data: BTreeMap<String, ByteString>,
    ) -> Result<()>;

    async fn get_discovery_service(
        &self,
        discovery_service: &ObjectRef<DiscoveryService>,
    ) -> Result<Option<DiscoveryService>>;

    async fn patch_discovery_service_status(
        &self,
        discovery_service: &DiscoveryService,
        status: &DiscoveryServiceStatus,
    ) -> Result<()>;

    async fn patch_certificate_status(
        &self,
        certificate: &DiscoveryServiceCertificate,
        status: &DiscoveryServiceCertificateStatus,
    ) -> Result<()>;
}

/// [`ResourceStore`] backed by the Kubernetes API.
pub struct KubeStore {
    client: stackable_operator::client::Client,
}

impl KubeStore {
    pub fn new(client: stackable_operator::client::Client) -> Self {
        Self { client }
    }

    fn namespaced_api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.as_kube_client(), namespace)
    }
}

/// Merge patch body that only applies on top of the `resourceVersion` that `obj` was read at.
fn conditional_merge_patch(
    obj: &impl ResourceExt,
    mut body: serde_json::Value,
) -> Patch<serde_json::Value> {
    if let Some(resource_version) = obj.resource_version() {
        body["metadata"] = json!({ "resourceVersion": resource_version });
    }
    Patch::Merge(body)
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}

fn classify_patch_error(err: kube::Error, object: ObjectRef<DynamicObject>) -> Error {
    if is_conflict(&err) {
        Error::Conflict { object }
    } else {
        Error::Patch {
            source: err,
            object,
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_secret(&self, secret_ref: &SecretReference) -> Result<Option<Secret>> {
        self.namespaced_api::<Secret>(&secret_ref.namespace)
            .get_opt(&secret_ref.name)
            .await
            .with_context(|_| GetSnafu {
                object: ObjectRef::<Secret>::from(secret_ref).erase(),
            })
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let object = ObjectRef::from_obj(secret).erase();
        match self
            .namespaced_api::<Secret>(&secret.namespace().unwrap_or_default())
            .create(&PostParams::default(), secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_conflict(&err) => AlreadyExistsSnafu { object }.fail(),
            Err(err) => Err(err).context(CreateSnafu { object }),
        }
    }

    async fn patch_secret_data(
        &self,
        secret: &Secret,
        data: BTreeMap<String, ByteString>,
    ) -> Result<()> {
        let patch = conditional_merge_patch(secret, json!({ "data": data }));
        self.namespaced_api::<Secret>(&secret.namespace().unwrap_or_default())
            .patch(&secret.name_any(), &PatchParams::default(), &patch)
            .await
            .map_err(|err| classify_patch_error(err, ObjectRef::from_obj(secret).erase()))?;
        Ok(())
    }

    async fn get_discovery_service(
        &self,
        discovery_service: &ObjectRef<DiscoveryService>,
    ) -> Result<Option<DiscoveryService>> {
        self.namespaced_api::<DiscoveryService>(
            discovery_service.namespace.as_deref().unwrap_or_default(),
        )
        .get_opt(&discovery_service.name)
        .await
        .with_context(|_| GetSnafu {
            object: discovery_service.clone().erase(),
        })
    }

    async fn patch_discovery_service_status(
        &self,
        discovery_service: &DiscoveryService,
        status: &DiscoveryServiceStatus,
    ) -> Result<()> {
        let patch = conditional_merge_patch(discovery_service, json!({ "status": status }));
        self.namespaced_api::<DiscoveryService>(
            &discovery_service.namespace().unwrap_or_default(),
        )
        .patch_status(&discovery_service.name_any(), &PatchParams::default(), &patch)
        .await
        .map_err(|err| classify_patch_error(err, ObjectRef::from_obj(discovery_service).erase()))?;
        Ok(())
    }

    async fn patch_certificate_status(
        &self,
        certificate: &DiscoveryServiceCertificate,
        status: &DiscoveryServiceCertificateStatus,
    ) -> Result<()> {
        let patch = conditional_merge_patch(certificate, json!({ "status": status }));
        self.namespaced_api::<DiscoveryServiceCertificate>(
            &certificate.namespace().unwrap_or_default(),
        )
        .patch_status(&certificate.name_any(), &PatchParams::default(), &patch)
        .await
        .map_err(|err| classify_patch_error(err, ObjectRef::from_obj(certificate).erase()))?;
        Ok(())
    }
}
