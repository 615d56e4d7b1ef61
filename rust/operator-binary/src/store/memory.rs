//! In-memory [`ResourceStore`] that journals every write

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use stackable_certificate_operator_crd_utils::SecretReference;
use stackable_operator::{
    k8s_openapi::{api::core::v1::Secret, ByteString},
    kube::{runtime::reflector::ObjectRef, Resource, ResourceExt},
};

use super::{ResourceStore, Result};
use crate::crd::{
    DiscoveryService, DiscoveryServiceCertificate, DiscoveryServiceCertificateStatus,
    DiscoveryServiceStatus,
};

type Key = (String, String);

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    CreateSecret(Key),
    PatchSecretData(Key),
    PatchDiscoveryServiceStatus(Key),
    PatchCertificateStatus(Key),
}

#[derive(Default)]
struct State {
    secrets: BTreeMap<Key, Secret>,
    discovery_services: BTreeMap<Key, DiscoveryService>,
    certificates: BTreeMap<Key, DiscoveryServiceCertificate>,
    writes: Vec<Write>,
    last_resource_version: u64,
    reject_discovery_service_status: bool,
    modify_secret_after_next_read: bool,
}

impl State {
    fn next_resource_version(&mut self) -> Option<String> {
        self.last_resource_version += 1;
        Some(self.last_resource_version.to_string())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key(obj: &impl Resource) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn check_version<K: Resource<DynamicType = ()>>(stored: &K, read: &K) -> Result<()> {
    if stored.resource_version() == read.resource_version() {
        Ok(())
    } else {
        super::ConflictSnafu {
            object: ObjectRef::from_obj(read).erase(),
        }
        .fail()
    }
}

impl MemoryStore {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_discovery_service(self, mut discovery_service: DiscoveryService) -> Self {
        let mut state = self.state();
        discovery_service.metadata.resource_version = state.next_resource_version();
        state
            .discovery_services
            .insert(key(&discovery_service), discovery_service);
        drop(state);
        self
    }

    /// Tracks the certificate so that status patches are checked and applied.
    pub fn with_certificate(self, certificate: &DiscoveryServiceCertificate) -> Self {
        self.state()
            .certificates
            .insert(key(certificate), certificate.clone());
        self
    }

    /// Stores `secret` without journaling it, returning the stored version.
    pub fn insert_secret(&self, mut secret: Secret) -> Secret {
        let mut state = self.state();
        secret.metadata.resource_version = state.next_resource_version();
        state.secrets.insert(key(&secret), secret.clone());
        secret
    }

    /// Makes all further status patches of discovery services fail with a conflict.
    pub fn reject_discovery_service_status(&self) {
        self.state().reject_discovery_service_status = true;
    }

    /// Simulates a concurrent writer that updates the Secret right after it is next read.
    pub fn modify_secret_after_next_read(&self) {
        self.state().modify_secret_after_next_read = true;
    }

    pub fn secret(&self, secret_ref: &SecretReference) -> Option<Secret> {
        self.state()
            .secrets
            .get(&(secret_ref.namespace.clone(), secret_ref.name.clone()))
            .cloned()
    }

    pub fn discovery_service(&self, namespace: &str, name: &str) -> Option<DiscoveryService> {
        self.state()
            .discovery_services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// The latest stored version of `certificate`.
    pub fn certificate(
        &self,
        certificate: &DiscoveryServiceCertificate,
    ) -> Option<DiscoveryServiceCertificate> {
        self.state().certificates.get(&key(certificate)).cloned()
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_secret(&self, secret_ref: &SecretReference) -> Result<Option<Secret>> {
        let mut state = self.state();
        let key = (secret_ref.namespace.clone(), secret_ref.name.clone());
        let secret = state.secrets.get(&key).cloned();
        if secret.is_some() && std::mem::take(&mut state.modify_secret_after_next_read) {
            let resource_version = state.next_resource_version();
            if let Some(stored) = state.secrets.get_mut(&key) {
                stored.metadata.resource_version = resource_version;
            }
        }
        Ok(secret)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let mut state = self.state();
        let key = key(secret);
        if state.secrets.contains_key(&key) {
            return super::AlreadyExistsSnafu {
                object: ObjectRef::from_obj(secret).erase(),
            }
            .fail();
        }
        let mut secret = secret.clone();
        secret.metadata.resource_version = state.next_resource_version();
        state.secrets.insert(key.clone(), secret);
        state.writes.push(Write::CreateSecret(key));
        Ok(())
    }

    async fn patch_secret_data(
        &self,
        secret: &Secret,
        data: BTreeMap<String, ByteString>,
    ) -> Result<()> {
        let mut state = self.state();
        let key = key(secret);
        let resource_version = state.next_resource_version();
        let Some(stored) = state.secrets.get_mut(&key) else {
            return super::ConflictSnafu {
                object: ObjectRef::from_obj(secret).erase(),
            }
            .fail();
        };
        check_version(stored, secret)?;
        stored.data = Some(data);
        stored.metadata.resource_version = resource_version;
        state.writes.push(Write::PatchSecretData(key));
        Ok(())
    }

    async fn get_discovery_service(
        &self,
        discovery_service: &ObjectRef<DiscoveryService>,
    ) -> Result<Option<DiscoveryService>> {
        Ok(self.discovery_service(
            discovery_service.namespace.as_deref().unwrap_or_default(),
            &discovery_service.name,
        ))
    }

    async fn patch_discovery_service_status(
        &self,
        discovery_service: &DiscoveryService,
        status: &DiscoveryServiceStatus,
    ) -> Result<()> {
        let mut state = self.state();
        let key = key(discovery_service);
        let conflict = super::ConflictSnafu {
            object: ObjectRef::from_obj(discovery_service).erase(),
        };
        if state.reject_discovery_service_status {
            return conflict.fail();
        }
        let resource_version = state.next_resource_version();
        let Some(stored) = state.discovery_services.get_mut(&key) else {
            return conflict.fail();
        };
        check_version(stored, discovery_service)?;
        stored.status = Some(status.clone());
        stored.metadata.resource_version = resource_version;
        state.writes.push(Write::PatchDiscoveryServiceStatus(key));
        Ok(())
    }

    async fn patch_certificate_status(
        &self,
        certificate: &DiscoveryServiceCertificate,
        status: &DiscoveryServiceCertificateStatus,
    ) -> Result<()> {
        let mut state = self.state();
        let key = key(certificate);
        let resource_version = state.next_resource_version();
        if let Some(stored) = state.certificates.get_mut(&key) {
            check_version(stored, certificate)?;
            stored.status = Some(status.clone());
            stored.metadata.resource_version = resource_version;
        }
        state.writes.push(Write::PatchCertificateStatus(key));
        Ok(())
    }
}
