//! AppService operator - reconciles AppService resources into Deployments and Services

mod config;
mod controller_runner;

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use appservice_common::crd::AppService;
use appservice_common::kube_utils::create_client;
use appservice_common::telemetry::init_logging;
use appservice_common::CONTROLLER_NAME;

use crate::config::{Cli, Commands, ControllerArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&AppService::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_logging(cli.log_format)?;

    match cli.into_command() {
        Commands::Controller(args) => run(args).await,
    }
}

async fn run(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting AppService operator");

    let client = create_client(args.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if args.install_crd {
        ensure_crd_installed(&client).await?;
    }

    let cancel = CancellationToken::new();
    tokio::spawn(controller_runner::cancel_on_signal(cancel.clone()));

    controller_runner::run_controller(
        client,
        args.namespace.clone(),
        args.reconcile_config(),
        cancel,
    )
    .await;

    tracing::info!("AppService operator stopped");
    Ok(())
}

/// Install or update the AppService CRD
///
/// Uses server-side apply so the installed schema always matches this binary.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();

    tracing::info!("Installing AppService CRD...");
    crds.patch(
        "appservices.cache.example.com",
        &params,
        &Patch::Apply(&AppService::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install AppService CRD: {}", e))?;

    tracing::info!("AppService CRD installed/updated");
    Ok(())
}
