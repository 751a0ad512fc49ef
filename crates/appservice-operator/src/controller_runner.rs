//! Controller runner - wires the AppService reconciler to its watches

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use appservice_common::crd::AppService;
use appservice_controller::{error_policy, reconcile, Context, ReconcileConfig};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build an Api handle scoped to `namespace`, or cluster-wide when `None`
fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run the AppService controller until `cancel` fires
///
/// Owned Deployments and Services are watched so that editing or deleting
/// one re-triggers reconciliation of its AppService. Cancelling the token
/// stops the watches and aborts in-flight store calls.
pub async fn run_controller(
    client: Client,
    namespace: Option<String>,
    config: ReconcileConfig,
    cancel: CancellationToken,
) {
    let ctx = Arc::new(Context::new(client.clone(), config, cancel.clone()));
    let ns = namespace.as_deref();

    let apps: Api<AppService> = scoped_api(client.clone(), ns);
    let deployments: Api<Deployment> = scoped_api(client.clone(), ns);
    let services: Api<Service> = scoped_api(client, ns);

    match ns {
        Some(ns) => info!(namespace = %ns, "- AppService controller (namespaced)"),
        None => info!("- AppService controller (all namespaces)"),
    }

    Controller::new(apps, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .owns(
            deployments,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .owns(services, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .graceful_shutdown_on(cancel.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("AppService"))
        .await;
}

/// Cancel `cancel` on SIGTERM or SIGINT
pub async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = cancel.cancelled() => return,
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received Ctrl+C, shutting down"),
            _ = cancel.cancelled() => return,
        }
    }

    cancel.cancel();
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_listener_returns_once_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        cancel_on_signal(cancel.clone()).await;
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn log_reconcile_result_accepts_both_outcomes() {
        let log = log_reconcile_result::<&str, &str>("AppService");
        futures::executor::block_on(log(Ok("done")));
        futures::executor::block_on(log(Err("boom")));
    }
}
