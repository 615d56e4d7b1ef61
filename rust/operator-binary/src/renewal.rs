//! Decides whether an existing self-signed certificate has to be reissued

use std::collections::BTreeMap;

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::k8s_openapi::ByteString;

use crate::pki;

pub const SECRET_KEY_CERT: &str = "tls.crt";
pub const SECRET_KEY_KEY: &str = "tls.key";

/// Why the certificate stored in a Secret cannot be used anymore.
#[derive(Debug, Snafu)]
pub enum InvalidCertificate {
    #[snafu(display("Secret has no {SECRET_KEY_CERT:?} entry"))]
    MissingCertificate,

    #[snafu(display("failed to decode certificate"))]
    Decode { source: pki::Error },

    #[snafu(display("certificate failed self-signed verification"))]
    Verify { source: pki::VerifyError },
}

/// Decodes the certificate stored in a TLS Secret and verifies it against itself.
pub fn check_self_signed(
    secret_data: &BTreeMap<String, ByteString>,
) -> Result<(), InvalidCertificate> {
    let pem = secret_data
        .get(SECRET_KEY_CERT)
        .context(MissingCertificateSnafu)?;
    let cert = pki::load_certificate(&pem.0).context(DecodeSnafu)?;
    pki::verify(&cert, &cert).context(VerifySnafu)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Reissue(ReissueReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ReissueReason {
    #[strum(serialize = "certificate is invalid")]
    Invalid,
    #[strum(serialize = "renewal was requested")]
    Requested,
}

/// An invalid certificate is always reissued, a valid one only if renewal has been requested.
pub fn decide(verification: Result<(), &InvalidCertificate>, needs_renewal: bool) -> Decision {
    match (verification, needs_renewal) {
        (Err(_), _) => Decision::Reissue(ReissueReason::Invalid),
        (Ok(()), true) => Decision::Reissue(ReissueReason::Requested),
        (Ok(()), false) => Decision::Keep,
    }
}
