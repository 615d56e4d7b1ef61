//! Generates and verifies X.509 certificates

use std::{cmp::Ordering, net::IpAddr};

use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::{BigNum, MsbOption},
    conf::{Conf, ConfMethod},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, PKeyRef, Private},
    rsa::Rsa,
    x509::{
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
            SubjectAlternativeName, SubjectKeyIdentifier,
        },
        X509Builder, X509NameBuilder, X509Ref, X509,
    },
};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::time::Duration;
use time::OffsetDateTime;

use crate::utils::{asn1time_to_offsetdatetime, Asn1TimeParseError, Unloggable};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to generate certificate key"))]
    GenerateKey { source: openssl::error::ErrorStack },

    #[snafu(display("failed to load OpenSSL configuration"))]
    LoadConfig { source: openssl::error::ErrorStack },

    #[snafu(display("failed to build certificate"))]
    BuildCertificate { source: openssl::error::ErrorStack },

    #[snafu(display("failed to serialize certificate"))]
    SerializeCertificate { source: openssl::error::ErrorStack },

    #[snafu(display("failed to serialize private key"))]
    SerializeKey { source: openssl::error::ErrorStack },

    #[snafu(display("failed to load PEM certificate"))]
    LoadCertificate { source: openssl::error::ErrorStack },

    #[snafu(display("certificate lifetime {valid_for} ends too far in the future"))]
    ValidityOverflow { valid_for: Duration },
}
type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum VerifyError {
    #[snafu(display("failed to compare issuer and subject names"))]
    CompareNames { source: openssl::error::ErrorStack },

    #[snafu(display("certificate was not issued by the trust anchor"))]
    IssuerMismatch,

    #[snafu(display("failed to check certificate signature"))]
    CheckSignature { source: openssl::error::ErrorStack },

    #[snafu(display("certificate signature does not match the trust anchor's key"))]
    SignatureMismatch,

    #[snafu(display("failed to parse certificate validity"))]
    ParseValidity { source: Asn1TimeParseError },

    #[snafu(display("certificate is not valid before {not_before}"))]
    NotYetValid { not_before: OffsetDateTime },

    #[snafu(display("certificate expired at {not_after}"))]
    Expired { not_after: OffsetDateTime },
}

/// The certificate and key that sign a new certificate.
pub struct Issuer<'a> {
    pub certificate: &'a X509Ref,
    pub key: &'a PKeyRef<Private>,
}

pub struct CertificateParams<'a> {
    pub common_name: &'a str,
    pub valid_for: Duration,
    pub is_server: bool,
    pub is_ca: bool,
    /// Subject alternative names, IP literals become IP SANs and everything else DNS SANs.
    pub hosts: &'a [String],
}

/// PEM-encoded output of [`generate_certificate`].
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    pub certificate_pem: Vec<u8>,
    pub key_pem: Unloggable<Vec<u8>>,
}

/// Generates a fresh key pair and a certificate for it, valid from now for `params.valid_for`.
///
/// The certificate is self-signed if no `issuer` is given.
pub fn generate_certificate(
    issuer: Option<Issuer>,
    params: &CertificateParams,
) -> Result<CertificateMaterial> {
    let now = OffsetDateTime::now_utc();
    let not_after = time::Duration::try_from(*params.valid_for)
        .ok()
        .and_then(|valid_for| now.checked_add(valid_for))
        .context(ValidityOverflowSnafu {
            valid_for: params.valid_for,
        })?;
    generate_certificate_valid_between(
        issuer,
        params,
        now - Duration::from_minutes_unchecked(5),
        not_after,
    )
}

pub fn generate_certificate_valid_between(
    issuer: Option<Issuer>,
    params: &CertificateParams,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Result<CertificateMaterial> {
    let conf = Conf::new(ConfMethod::default()).context(LoadConfigSnafu)?;
    let key = Rsa::generate(2048)
        .and_then(PKey::try_from)
        .context(GenerateKeySnafu)?;
    let signing_key = issuer.as_ref().map_or(&*key, |issuer| issuer.key);
    let cert = X509Builder::new()
        .and_then(|mut x509| {
            let subject_name = X509NameBuilder::new()
                .and_then(|mut name| {
                    name.append_entry_by_nid(Nid::COMMONNAME, params.common_name)?;
                    Ok(name)
                })?
                .build();
            x509.set_subject_name(&subject_name)?;
            x509.set_issuer_name(
                issuer
                    .as_ref()
                    .map_or(&*subject_name, |issuer| issuer.certificate.subject_name()),
            )?;
            x509.set_not_before(Asn1Time::from_unix(not_before.unix_timestamp())?.as_ref())?;
            x509.set_not_after(Asn1Time::from_unix(not_after.unix_timestamp())?.as_ref())?;
            x509.set_pubkey(&key)?;
            x509.set_version(
                3 - 1, // zero-indexed
            )?;
            let mut serial = BigNum::new()?;
            serial.rand(64, MsbOption::MAYBE_ZERO, false)?;
            x509.set_serial_number(Asn1Integer::from_bn(&serial)?.as_ref())?;

            let ctx = x509.x509v3_context(
                issuer.as_ref().map(|issuer| issuer.certificate),
                Some(&conf),
            );
            let mut basic_constraints = BasicConstraints::new();
            basic_constraints.critical();
            let mut key_usage = KeyUsage::new();
            key_usage.critical().digital_signature().key_encipherment();
            if params.is_ca {
                basic_constraints.ca();
                key_usage.key_cert_sign().crl_sign();
            }
            let mut extended_key_usage = ExtendedKeyUsage::new();
            if params.is_server {
                extended_key_usage.server_auth();
            } else {
                extended_key_usage.client_auth();
            }
            let mut exts = vec![
                basic_constraints.build()?,
                key_usage.build()?,
                extended_key_usage.build()?,
                SubjectKeyIdentifier::new().build(&ctx)?,
                AuthorityKeyIdentifier::new()
                    .issuer(issuer.is_some())
                    .keyid(issuer.is_some())
                    .build(&ctx)?,
            ];
            if !params.hosts.is_empty() {
                let mut san_ext = SubjectAlternativeName::new();
                for host in params.hosts {
                    match host.parse::<IpAddr>() {
                        Ok(ip) => san_ext.ip(&ip.to_string()),
                        Err(_) => san_ext.dns(host),
                    };
                }
                exts.push(san_ext.build(&ctx)?);
            }
            for ext in exts {
                x509.append_extension(ext)?;
            }
            x509.sign(signing_key, MessageDigest::sha256())?;
            Ok(x509)
        })
        .context(BuildCertificateSnafu)?
        .build();
    Ok(CertificateMaterial {
        certificate_pem: cert.to_pem().context(SerializeCertificateSnafu)?,
        key_pem: Unloggable(key.private_key_to_pem_pkcs8().context(SerializeKeySnafu)?),
    })
}

pub fn load_certificate(pem: &[u8]) -> Result<X509> {
    X509::from_pem(pem).context(LoadCertificateSnafu)
}

/// Checks that `cert` was signed by `trust_anchor` and is currently valid.
///
/// Self-signed certificates are verified against themselves.
pub fn verify(cert: &X509Ref, trust_anchor: &X509Ref) -> Result<(), VerifyError> {
    verify_at(cert, trust_anchor, OffsetDateTime::now_utc())
}

pub fn verify_at(
    cert: &X509Ref,
    trust_anchor: &X509Ref,
    now: OffsetDateTime,
) -> Result<(), VerifyError> {
    if cert
        .issuer_name()
        .try_cmp(trust_anchor.subject_name())
        .context(CompareNamesSnafu)?
        != Ordering::Equal
    {
        return IssuerMismatchSnafu.fail();
    }
    let anchor_key = trust_anchor.public_key().context(CheckSignatureSnafu)?;
    if !cert.verify(&anchor_key).context(CheckSignatureSnafu)? {
        return SignatureMismatchSnafu.fail();
    }
    let not_before = asn1time_to_offsetdatetime(cert.not_before()).context(ParseValiditySnafu)?;
    let not_after = asn1time_to_offsetdatetime(cert.not_after()).context(ParseValiditySnafu)?;
    if now < not_before {
        return NotYetValidSnafu { not_before }.fail();
    }
    if now > not_after {
        return ExpiredSnafu { not_after }.fail();
    }
    Ok(())
}
