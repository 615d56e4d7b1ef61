//! Tells consumers of a certificate that they have to reload it

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_certificate_operator_crd_utils::{Condition, ConditionStatus};
use stackable_operator::kube::{runtime::reflector::ObjectRef, Resource};
use tracing::{debug, info};

use crate::{
    crd::{
        DiscoveryService, NotifyReference, SERVER_CERTIFICATE_REISSUED_REASON,
        SERVER_RESTART_REQUIRED_CONDITION,
    },
    store::{self, ResourceStore},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get {discovery_service}"))]
    GetDiscoveryService {
        source: store::Error,
        discovery_service: ObjectRef<DiscoveryService>,
    },

    #[snafu(display("{discovery_service} does not exist"))]
    DiscoveryServiceNotFound {
        discovery_service: ObjectRef<DiscoveryService>,
    },

    #[snafu(display("failed to request a restart of {discovery_service}"))]
    SetRestartRequired {
        source: store::Error,
        discovery_service: ObjectRef<DiscoveryService>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// A resolved [`NotifyReference`].
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyTarget {
    DiscoveryService(ObjectRef<DiscoveryService>),
    Unsupported { kind: String, name: String },
}

impl NotifyTarget {
    /// References without a namespace resolve to `default_namespace`.
    pub fn resolve(reference: &NotifyReference, default_namespace: &str) -> Self {
        let namespace = reference.namespace.as_deref().unwrap_or(default_namespace);
        if reference.kind == DiscoveryService::kind(&()) {
            NotifyTarget::DiscoveryService(
                ObjectRef::new(&reference.name).within(namespace),
            )
        } else {
            NotifyTarget::Unsupported {
                kind: reference.kind.clone(),
                name: reference.name.clone(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The restart condition was set.
    Sent,
    /// The restart condition was already set, nothing was written.
    AlreadyPending,
    /// Nothing is known about how to notify this kind of resource.
    Unsupported,
}

pub async fn notify(store: &impl ResourceStore, target: &NotifyTarget) -> Result<Notification> {
    match target {
        NotifyTarget::DiscoveryService(discovery_service) => {
            request_restart(store, discovery_service).await
        }
        NotifyTarget::Unsupported { kind, name } => {
            info!(
                notify.kind = %kind,
                notify.name = %name,
                "Notification for this kind is not implemented, ignoring"
            );
            Ok(Notification::Unsupported)
        }
    }
}

async fn request_restart(
    store: &impl ResourceStore,
    discovery_service_ref: &ObjectRef<DiscoveryService>,
) -> Result<Notification> {
    let discovery_service = store
        .get_discovery_service(discovery_service_ref)
        .await
        .with_context(|_| GetDiscoveryServiceSnafu {
            discovery_service: discovery_service_ref.clone(),
        })?
        .with_context(|| DiscoveryServiceNotFoundSnafu {
            discovery_service: discovery_service_ref.clone(),
        })?;
    let mut status = discovery_service.status.clone().unwrap_or_default();
    if status
        .conditions
        .is_true_for(SERVER_RESTART_REQUIRED_CONDITION)
    {
        debug!(
            discovery_service = %discovery_service_ref,
            "Restart has already been requested"
        );
        return Ok(Notification::AlreadyPending);
    }
    status.conditions.set(Condition::new(
        SERVER_RESTART_REQUIRED_CONDITION,
        ConditionStatus::True,
        SERVER_CERTIFICATE_REISSUED_REASON,
        "Server certificate has been reissued",
    ));
    store
        .patch_discovery_service_status(&discovery_service, &status)
        .await
        .with_context(|_| SetRestartRequiredSnafu {
            discovery_service: discovery_service_ref.clone(),
        })?;
    debug!(
        discovery_service = %discovery_service_ref,
        "Notified the DiscoveryService of the reissued certificate"
    );
    Ok(Notification::Sent)
}
