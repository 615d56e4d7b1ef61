use clap::{crate_description, crate_version, Parser};
use stackable_operator::{
    logging::TracingTarget, namespace::WatchNamespace, time::Duration, CustomResourceExt,
};

mod controller;
mod crd;
mod notify;
mod pki;
mod renewal;
mod self_signed;
mod store;
mod utils;

pub const APP_NAME: &str = "certificate";

#[derive(clap::Parser)]
#[clap(author, version)]
struct Opts {
    #[clap(subcommand)]
    cmd: stackable_operator::cli::Command<CertificateOperatorRun>,
}

#[derive(clap::Parser)]
struct CertificateOperatorRun {
    /// Tracing log collector system
    #[arg(long, env, default_value_t, value_enum)]
    pub tracing_target: TracingTarget,

    /// Only watch DiscoveryServiceCertificates in this namespace (all namespaces if unset)
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// How often certificates are checked for expiry, even if nothing else changed
    #[arg(long, env, default_value = "1h")]
    pub certificate_check_interval: Duration,
}

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
    pub const TARGET: Option<&str> = option_env!("TARGET");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        stackable_operator::cli::Command::Crd => {
            for crd in [
                crd::DiscoveryServiceCertificate::crd(),
                crd::DiscoveryService::crd(),
            ] {
                println!("---\n{}", serde_yaml::to_string(&crd)?);
            }
        }
        stackable_operator::cli::Command::Run(CertificateOperatorRun {
            tracing_target,
            watch_namespace,
            certificate_check_interval,
        }) => {
            stackable_operator::logging::initialize_logging(
                "CERTIFICATE_OPERATOR_LOG",
                APP_NAME,
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET.unwrap_or("unknown target"),
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );
            let client = stackable_operator::client::create_client(Some(
                "certificates.stackable.tech".to_string(),
            ))
            .await?;
            controller::start(&client, &watch_namespace, certificate_check_interval).await;
        }
    }
    Ok(())
}
