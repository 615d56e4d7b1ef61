use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stackable_certificate_operator_crd_utils::{ConditionSet, SecretReference};
use stackable_operator::{
    kube::CustomResource,
    schemars::{
        self,
        gen::SchemaGenerator,
        schema::{InstanceType, Schema, SchemaObject},
        JsonSchema,
    },
    time::Duration,
};

/// Set externally (for example by an expiry watcher) to request a new certificate.
/// Cleared by the operator once the certificate has been reissued.
pub const CERTIFICATE_NEEDS_RENEWAL_CONDITION: &str = "NeedsRenewal";

/// Set on a [`DiscoveryService`] when the certificate it serves has been replaced.
/// Cleared by the discovery service once it has picked up the new certificate.
pub const SERVER_RESTART_REQUIRED_CONDITION: &str = "RestartRequired";

pub const SERVER_CERTIFICATE_REISSUED_REASON: &str = "ServerCertificateReissued";

/// A request for a self-signed certificate, which is written to (and kept valid in) the
/// referenced Secret.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "certificates.stackable.tech",
    version = "v1alpha1",
    kind = "DiscoveryServiceCertificate",
    shortname = "dsc",
    namespaced,
    status = "DiscoveryServiceCertificateStatus",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryServiceCertificateSpec {
    /// Common name of the certificate subject.
    pub common_name: String,
    /// Subject alternative names. IP literals are added as IP addresses, everything else as DNS names.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// How long the certificate is valid for, counted from when it is issued.
    #[schemars(with = "String")]
    pub valid_for: Duration,
    /// Whether the certificate is meant for server authentication (rather than client authentication).
    #[serde(default)]
    pub is_server_certificate: bool,
    /// Whether the certificate may sign other certificates.
    ///
    /// CA Secrets are not owned by the DiscoveryServiceCertificate, so that they survive its deletion.
    #[serde(default, rename = "isCA")]
    pub is_ca: bool,
    /// The Secret that the certificate and key are written to.
    pub secret_ref: SecretReference,
    /// Controls reissuing the certificate once it has been created.
    /// Renewal is enabled if this is not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_renewal: Option<CertificateRenewalConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRenewalConfig {
    /// Disabling renewal hands the Secret over to external management after it has been created,
    /// even invalid certificates are left alone.
    pub enabled: bool,
    /// Resource that should be told to reload whenever the certificate is reissued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyReference>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotifyReference {
    /// Kind of the resource. Only `DiscoveryService` is currently supported.
    pub kind: String,
    pub name: String,
    /// Defaults to the namespace of the DiscoveryServiceCertificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryServiceCertificateStatus {
    #[serde(default)]
    pub conditions: ConditionSet,
}

impl DiscoveryServiceCertificate {
    pub fn renewal_enabled(&self) -> bool {
        self.spec
            .certificate_renewal
            .as_ref()
            .map_or(true, |renewal| renewal.enabled)
    }

    pub fn notify_reference(&self) -> Option<&NotifyReference> {
        self.spec.certificate_renewal.as_ref()?.notify.as_ref()
    }

    pub fn needs_renewal(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.conditions.is_true_for(CERTIFICATE_NEEDS_RENEWAL_CONDITION))
    }
}

/// A discovery service that serves a certificate managed by a [`DiscoveryServiceCertificate`].
///
/// The spec belongs to the discovery service itself, this operator only signals restarts
/// through the status conditions.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "certificates.stackable.tech",
    version = "v1alpha1",
    kind = "DiscoveryService",
    namespaced,
    status = "DiscoveryServiceStatus",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
pub struct DiscoveryServiceSpec {
    /// Everything in the spec is kept as-is, its schema is up to the discovery service.
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl JsonSchema for DiscoveryServiceSpec {
    fn schema_name() -> String {
        "DiscoveryServiceSpec".to_string()
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::Object.into()),
            extensions: [(
                "x-kubernetes-preserve-unknown-fields".to_string(),
                serde_json::Value::Bool(true),
            )]
            .into_iter()
            .collect(),
            ..SchemaObject::default()
        }
        .into()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryServiceStatus {
    #[serde(default)]
    pub conditions: ConditionSet,
}

#[cfg(test)]
mod test {
    use stackable_certificate_operator_crd_utils::SecretReference;
    use stackable_operator::time::Duration;

    use stackable_operator::kube::CustomResourceExt;

    use super::{
        CertificateRenewalConfig, DiscoveryService, DiscoveryServiceCertificate,
        DiscoveryServiceCertificateSpec, NotifyReference, SERVER_RESTART_REQUIRED_CONDITION,
    };

    #[test]
    fn test_deserialization() {
        let input: &str = r#"
        apiVersion: certificates.stackable.tech/v1alpha1
        kind: DiscoveryServiceCertificate
        metadata:
          name: proxy
          namespace: default
        spec:
          commonName: proxy
          hosts:
            - proxy.default.svc
          validFor: 24h
          isServerCertificate: true
          secretRef:
            name: proxy-tls
            namespace: default
        "#;
        let dsc: DiscoveryServiceCertificate = serde_yaml::from_str(input).unwrap();
        assert_eq!(
            dsc.spec,
            DiscoveryServiceCertificateSpec {
                common_name: "proxy".to_string(),
                hosts: vec!["proxy.default.svc".to_string()],
                valid_for: Duration::from_hours_unchecked(24),
                is_server_certificate: true,
                is_ca: false,
                secret_ref: SecretReference {
                    namespace: "default".to_string(),
                    name: "proxy-tls".to_string(),
                },
                certificate_renewal: None,
            }
        );
        assert!(dsc.renewal_enabled());
        assert!(!dsc.needs_renewal());
        assert_eq!(dsc.notify_reference(), None);

        let input: &str = r#"
        apiVersion: certificates.stackable.tech/v1alpha1
        kind: DiscoveryServiceCertificate
        metadata:
          name: ca
          namespace: default
        spec:
          commonName: discovery-ca
          validFor: 10d
          isCA: true
          secretRef:
            name: discovery-ca
            namespace: default
          certificateRenewal:
            enabled: false
            notify:
              kind: DiscoveryService
              name: discovery
        status:
          conditions:
            - type: NeedsRenewal
              status: "True"
              reason: Expiring
              message: ""
        "#;
        let dsc: DiscoveryServiceCertificate = serde_yaml::from_str(input).unwrap();
        assert!(dsc.spec.is_ca);
        assert!(dsc.spec.hosts.is_empty());
        assert_eq!(dsc.spec.valid_for, Duration::from_days_unchecked(10));
        assert_eq!(
            dsc.spec.certificate_renewal,
            Some(CertificateRenewalConfig {
                enabled: false,
                notify: Some(NotifyReference {
                    kind: "DiscoveryService".to_string(),
                    name: "discovery".to_string(),
                    namespace: None,
                }),
            })
        );
        assert!(!dsc.renewal_enabled());
        assert!(dsc.needs_renewal());
    }

    #[test]
    fn discovery_service_status_roundtrips_foreign_conditions() {
        let input: &str = r#"
        apiVersion: certificates.stackable.tech/v1alpha1
        kind: DiscoveryService
        metadata:
          name: discovery
          namespace: default
        spec:
          listenAddress: 0.0.0.0:8080
          tls:
            secretName: proxy-tls
        status:
          conditions:
            - type: Ready
              status: "True"
              reason: Running
              message: all good
              lastTransitionTime: "2024-01-02T02:03:04Z"
            - type: RestartRequired
              status: "False"
        "#;
        let ds: DiscoveryService = serde_yaml::from_str(input).unwrap();
        let conditions = &ds.status.as_ref().unwrap().conditions;
        assert!(conditions.is_true_for("Ready"));
        assert!(!conditions.is_true_for(SERVER_RESTART_REQUIRED_CONDITION));
        assert_eq!(
            conditions
                .iter()
                .map(|cond| cond.type_.as_str())
                .collect::<Vec<_>>(),
            ["Ready", SERVER_RESTART_REQUIRED_CONDITION]
        );
        assert_eq!(
            serde_json::to_value(&ds.spec).unwrap(),
            serde_json::json!({
                "listenAddress": "0.0.0.0:8080",
                "tls": { "secretName": "proxy-tls" },
            })
        );
    }

    #[test]
    fn discovery_service_crd_keeps_unknown_spec_fields() {
        let crd = DiscoveryService::crd();
        let schema = crd.spec.versions[0]
            .schema
            .as_ref()
            .and_then(|validation| validation.open_api_v3_schema.as_ref())
            .unwrap();
        let spec = &schema.properties.as_ref().unwrap()["spec"];
        assert_eq!(spec.type_.as_deref(), Some("object"));
        assert_eq!(spec.x_kubernetes_preserve_unknown_fields, Some(true));
    }
}
