use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use snafu::{ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::Secret,
    kube::{
        api::DynamicObject,
        runtime::{controller::Action, reflector::ObjectRef, watcher, Controller},
    },
    logging::controller::{report_controller_reconciled, ReconcilerError},
    namespace::WatchNamespace,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{crd::DiscoveryServiceCertificate, self_signed, store::KubeStore};

const FULL_CONTROLLER_NAME: &str = "discoveryservicecertificate.certificates.stackable.tech";

pub async fn start(
    client: &stackable_operator::client::Client,
    watch_namespace: &WatchNamespace,
    check_interval: stackable_operator::time::Duration,
) {
    Controller::new(
        watch_namespace.get_api::<DiscoveryServiceCertificate>(client),
        watcher::Config::default(),
    )
    .owns(
        watch_namespace.get_api::<Secret>(client),
        watcher::Config::default(),
    )
    .run(
        reconcile,
        error_policy,
        Arc::new(Ctx {
            store: KubeStore::new(client.clone()),
            check_interval,
        }),
    )
    .for_each(|res| {
        report_controller_reconciled(client, FULL_CONTROLLER_NAME, &res);
        futures::future::ready(())
    })
    .await;
}

struct Ctx {
    store: KubeStore,
    check_interval: stackable_operator::time::Duration,
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to reconcile self-signed certificate"))]
    SelfSigned { source: self_signed::Error },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::SelfSigned { source } => source.secondary_object(),
        }
    }
}

async fn reconcile(certificate: Arc<DiscoveryServiceCertificate>, ctx: Arc<Ctx>) -> Result<Action> {
    tracing::info!("Starting reconcile");
    let outcome = self_signed::reconcile(&ctx.store, &certificate)
        .await
        .context(SelfSignedSnafu)?;
    tracing::debug!(?outcome, "Reconciled certificate");
    // Certificates expire without any watched object changing
    Ok(Action::requeue(*ctx.check_interval))
}

fn error_policy(_obj: Arc<DiscoveryServiceCertificate>, _error: &Error, _ctx: Arc<Ctx>) -> Action {
    Action::requeue(Duration::from_secs(5))
}
