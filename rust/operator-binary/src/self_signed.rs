//! Keeps the Secret of a [`DiscoveryServiceCertificate`] filled with a valid self-signed certificate

use std::collections::BTreeMap;

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::{api::core::v1::Secret, ByteString},
    kube::{
        api::{DynamicObject, ObjectMeta},
        runtime::reflector::ObjectRef,
        Resource, ResourceExt,
    },
};
use tracing::{debug, info, warn};

use crate::{
    crd::{DiscoveryServiceCertificate, CERTIFICATE_NEEDS_RENEWAL_CONDITION},
    notify::{self, Notification, NotifyTarget},
    pki::{self, CertificateMaterial, CertificateParams},
    renewal::{self, Decision, SECRET_KEY_CERT, SECRET_KEY_KEY},
    store::{self, ResourceStore},
};

const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to look up {secret}"))]
    GetSecret {
        source: store::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to generate certificate for {secret}"))]
    GenerateCertificate {
        source: pki::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to build owner reference to {certificate}"))]
    BuildOwnerReference {
        certificate: ObjectRef<DiscoveryServiceCertificate>,
    },

    #[snafu(display("failed to create {secret}"))]
    CreateSecret {
        source: store::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to update {secret} with the reissued certificate"))]
    PatchSecret {
        source: store::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to notify about the reissued certificate"))]
    Notify { source: notify::Error },

    #[snafu(display("failed to clear the {CERTIFICATE_NEEDS_RENEWAL_CONDITION} condition of {certificate}"))]
    ClearNeedsRenewal {
        source: store::Error,
        certificate: ObjectRef<DiscoveryServiceCertificate>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::GetSecret { secret, .. } => Some(secret.clone().erase()),
            Error::GenerateCertificate { secret, .. } => Some(secret.clone().erase()),
            Error::BuildOwnerReference { .. } => None,
            Error::CreateSecret { secret, .. } => Some(secret.clone().erase()),
            Error::PatchSecret { secret, .. } => Some(secret.clone().erase()),
            Error::Notify { source } => match source {
                notify::Error::GetDiscoveryService {
                    discovery_service, ..
                }
                | notify::Error::DiscoveryServiceNotFound { discovery_service }
                | notify::Error::SetRestartRequired {
                    discovery_service, ..
                } => Some(discovery_service.clone().erase()),
            },
            Error::ClearNeedsRenewal { .. } => None,
        }
    }
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The Secret did not exist and has been created.
    Created,
    /// The Secret exists and renewal is disabled, so it was not looked at.
    RenewalDisabled,
    /// The existing certificate is valid and no renewal was requested.
    UpToDate,
    Reissued {
        notification: Option<Notification>,
    },
}

/// Runs one reconciliation pass for a self-signed `certificate`.
///
/// Passes for the same object must not run concurrently. Any failure aborts the pass and is
/// expected to be retried from scratch, nothing that has already been written is rolled back.
pub async fn reconcile(
    store: &impl ResourceStore,
    certificate: &DiscoveryServiceCertificate,
) -> Result<Outcome> {
    let secret_ref = &certificate.spec.secret_ref;
    let secret_obj_ref = || ObjectRef::<Secret>::from(secret_ref);

    let Some(secret) = store
        .get_secret(secret_ref)
        .await
        .with_context(|_| GetSecretSnafu {
            secret: secret_obj_ref(),
        })?
    else {
        let secret = build_secret(certificate)?;
        store
            .create_secret(&secret)
            .await
            .with_context(|_| CreateSecretSnafu {
                secret: secret_obj_ref(),
            })?;
        info!(secret = %secret_ref, "Created self-signed certificate");
        return Ok(Outcome::Created);
    };

    if !certificate.renewal_enabled() {
        debug!(secret = %secret_ref, "Renewal is disabled, leaving certificate as-is");
        return Ok(Outcome::RenewalDisabled);
    }

    let needs_renewal = certificate.needs_renewal();
    let reason = {
        let verification = match &secret.data {
            Some(data) => renewal::check_self_signed(data),
            None => renewal::check_self_signed(&BTreeMap::new()),
        };
        if let Err(err) = &verification {
            warn!(
                secret = %secret_ref,
                error = err as &dyn std::error::Error,
                "Invalid certificate detected"
            );
        }
        match renewal::decide(verification.as_ref().map(|_| ()), needs_renewal) {
            Decision::Keep => return Ok(Outcome::UpToDate),
            Decision::Reissue(reason) => reason,
        }
    };

    let material = generate(certificate)?;
    store
        .patch_secret_data(&secret, secret_data(material))
        .await
        .with_context(|_| PatchSecretSnafu {
            secret: secret_obj_ref(),
        })?;
    info!(secret = %secret_ref, %reason, "Reissued self-signed certificate");

    // The consumer is notified after the Secret has been written, but the two writes are not
    // atomic: if the pass fails in between, the consumer is never told about this certificate.
    let notification = match certificate.notify_reference() {
        Some(reference) => {
            let target =
                NotifyTarget::resolve(reference, &certificate.namespace().unwrap_or_default());
            Some(notify::notify(store, &target).await.context(NotifySnafu)?)
        }
        None => None,
    };

    // If this fails the condition stays set, and the next pass reissues the certificate once more.
    if needs_renewal {
        let mut status = certificate.status.clone().unwrap_or_default();
        status
            .conditions
            .remove(CERTIFICATE_NEEDS_RENEWAL_CONDITION);
        store
            .patch_certificate_status(certificate, &status)
            .await
            .with_context(|_| ClearNeedsRenewalSnafu {
                certificate: ObjectRef::from_obj(certificate),
            })?;
    }

    Ok(Outcome::Reissued { notification })
}

fn generate(certificate: &DiscoveryServiceCertificate) -> Result<CertificateMaterial> {
    let spec = &certificate.spec;
    pki::generate_certificate(
        None,
        &CertificateParams {
            common_name: &spec.common_name,
            valid_for: spec.valid_for,
            is_server: spec.is_server_certificate,
            is_ca: spec.is_ca,
            hosts: &spec.hosts,
        },
    )
    .with_context(|_| GenerateCertificateSnafu {
        secret: ObjectRef::<Secret>::from(&spec.secret_ref),
    })
}

fn secret_data(material: CertificateMaterial) -> BTreeMap<String, ByteString> {
    BTreeMap::from([
        (
            SECRET_KEY_CERT.to_string(),
            ByteString(material.certificate_pem),
        ),
        (SECRET_KEY_KEY.to_string(), ByteString(material.key_pem.0)),
    ])
}

/// Builds a new TLS Secret for `certificate`.
///
/// CA Secrets get no owner, so that the CA outlives the DiscoveryServiceCertificate.
fn build_secret(certificate: &DiscoveryServiceCertificate) -> Result<Secret> {
    let owner = if certificate.spec.is_ca {
        None
    } else {
        Some(
            certificate
                .controller_owner_ref(&())
                .with_context(|| BuildOwnerReferenceSnafu {
                    certificate: ObjectRef::from_obj(certificate),
                })?,
        )
    };
    let material = generate(certificate)?;
    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(certificate.spec.secret_ref.name.clone()),
            namespace: Some(certificate.spec.secret_ref.namespace.clone()),
            owner_references: owner.map(|owner| vec![owner]),
            ..ObjectMeta::default()
        },
        type_: Some(SECRET_TYPE_TLS.to_string()),
        data: Some(secret_data(material)),
        ..Secret::default()
    })
}
