//! CRD types that are shared between the certificate request and the resources it notifies.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::api::core::v1::Secret,
    kube::runtime::reflector::ObjectRef,
    schemars::{self, JsonSchema},
};

mod condition;

pub use condition::{Condition, ConditionSet, ConditionStatus};

// Redefine SecretReference instead of reusing k8s-openapi's, in order to make name/namespace mandatory.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Namespace of the Secret being referred to.
    pub namespace: String,
    /// Name of the Secret being referred to.
    pub name: String,
}

// Use ObjectRef for logging/errors
impl Display for SecretReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ObjectRef::<Secret>::from(self).fmt(f)
    }
}
impl From<&SecretReference> for ObjectRef<Secret> {
    fn from(val: &SecretReference) -> Self {
        ObjectRef::<Secret>::new(&val.name).within(&val.namespace)
    }
}

#[cfg(test)]
mod tests {
    use stackable_operator::k8s_openapi::api::core::v1::Secret;
    use stackable_operator::kube::runtime::reflector::ObjectRef;

    use super::SecretReference;

    #[test]
    fn display_uses_object_ref_format() {
        let secret_ref = SecretReference {
            namespace: "default".to_string(),
            name: "proxy-tls".to_string(),
        };
        assert_eq!(
            secret_ref.to_string(),
            ObjectRef::<Secret>::new("proxy-tls")
                .within("default")
                .to_string()
        );
    }
}
