//! Kubernetes utilities shared by the controller and the operator binary

use std::path::Path;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};

use crate::crd::{AppService, API_GROUP, API_VERSION, KIND};
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Build the controller owner reference a derived resource carries back to its AppService.
///
/// The reference identifies the owner by apiVersion, kind, name and uid; the
/// API server's garbage collector uses it for cascading deletion. Fails if the
/// AppService has not been persisted yet (no uid).
pub fn controller_owner_reference(app: &AppService) -> Result<OwnerReference, Error> {
    app.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation_for(
            app.key(),
            "AppService has no name or uid; cannot set owner reference",
        )
    })
}

/// True if `owner_refs` contains a reference to exactly this AppService instance
pub fn is_owned_by(owner_refs: &[OwnerReference], app: &AppService) -> bool {
    let api_version = format!("{}/{}", API_GROUP, API_VERSION);
    owner_refs.iter().any(|r| {
        r.kind == KIND
            && r.api_version == api_version
            && r.name == app.name_any()
            && Some(&r.uid) == app.meta().uid.as_ref()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::AppServiceSpec;

    fn persisted_app() -> AppService {
        let mut app = AppService::new(
            "web",
            AppServiceSpec {
                image: "nginx".to_string(),
                ..Default::default()
            },
        );
        app.metadata.namespace = Some("default".to_string());
        app.metadata.uid = Some("uid-1234".to_string());
        app
    }

    #[test]
    fn test_owner_reference_identifies_app() {
        let app = persisted_app();
        let owner = controller_owner_reference(&app).unwrap();

        assert_eq!(owner.api_version, "cache.example.com/v1");
        assert_eq!(owner.kind, "AppService");
        assert_eq!(owner.name, "web");
        assert_eq!(owner.uid, "uid-1234");
        assert_eq!(owner.controller, Some(true));
        assert!(is_owned_by(&[owner], &app));
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        let mut app = persisted_app();
        app.metadata.uid = None;
        let err = controller_owner_reference(&app).unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.app(), Some("default/web"));
    }

    #[test]
    fn test_is_owned_by_rejects_other_instance() {
        let app = persisted_app();
        let mut owner = controller_owner_reference(&app).unwrap();
        owner.uid = "uid-of-a-recreated-app".to_string();
        assert!(!is_owned_by(&[owner], &app));
        assert!(!is_owned_by(&[], &app));
    }
}
