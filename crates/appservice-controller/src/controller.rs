//! AppService controller implementation
//!
//! Each reconciliation re-reads the AppService, makes sure its Deployment
//! and Service exist, and rewrites them when the spec drifted from the
//! snapshot recorded on the AppService. Everything is re-fetched per call;
//! nothing about a previous reconciliation is cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use appservice_common::crd::{AppService, AppServicePhase, AppServiceStatus};
use appservice_common::events::{actions, reasons, EventPublisher};
use appservice_common::kube_utils::is_owned_by;
use appservice_common::{Error, KubeEventPublisher, CONTROLLER_NAME};
#[cfg(test)]
use appservice_common::NoopEventPublisher;

use crate::drift;
use crate::snapshot::{self, Snapshot};
use crate::translator;

/// Status message once both derived resources match the spec
pub const READY_MESSAGE: &str = "Deployment and Service match the declared spec";

// =============================================================================
// Kubernetes client abstraction
// =============================================================================

/// Trait abstracting the store operations the reconciler performs
///
/// Getters return `Ok(None)` when the object does not exist. Writes return
/// the object as stored by the API server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AppServiceKubeClient: Send + Sync {
    /// Get an AppService by name and namespace
    async fn get_app_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<AppService>, Error>;

    /// Replace an AppService (metadata and spec), guarded by its resourceVersion
    async fn replace_app_service(&self, app: &AppService) -> Result<AppService, Error>;

    /// Patch the status subresource of an AppService
    async fn patch_app_service_status(
        &self,
        name: &str,
        namespace: &str,
        status: &AppServiceStatus,
    ) -> Result<(), Error>;

    /// Get a Deployment by name and namespace
    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Option<Deployment>, Error>;

    /// Create a Deployment
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error>;

    /// Replace a Deployment, guarded by its resourceVersion
    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error>;

    /// Get a Service by name and namespace
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error>;

    /// Create a Service
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error>;

    /// Replace a Service, guarded by its resourceVersion
    async fn replace_service(&self, namespace: &str, service: &Service)
        -> Result<Service, Error>;
}

/// Real Kubernetes client implementation
pub struct AppServiceKubeClientImpl {
    client: Client,
}

impl AppServiceKubeClientImpl {
    /// Create a new AppServiceKubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AppServiceKubeClient for AppServiceKubeClientImpl {
    async fn get_app_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<AppService>, Error> {
        let api: Api<AppService> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_app_service(&self, app: &AppService) -> Result<AppService, Error> {
        let namespace = app.namespace().unwrap_or_default();
        let api: Api<AppService> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api.replace(&app.name_any(), &Self::post_params(), app).await?)
    }

    async fn patch_app_service_status(
        &self,
        name: &str,
        namespace: &str,
        status: &AppServiceStatus,
    ) -> Result<(), Error> {
        let api: Api<AppService> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });

        api.patch_status(
            name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&Self::post_params(), deployment).await?)
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .replace(&deployment.name_any(), &Self::post_params(), deployment)
            .await?)
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&Self::post_params(), service).await?)
    }

    async fn replace_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .replace(&service.name_any(), &Self::post_params(), service)
            .await?)
    }
}

// =============================================================================
// Context
// =============================================================================

/// Timing knobs for reconciliation and requeueing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Upper bound on one reconciliation; `None` disables the deadline
    pub reconcile_timeout: Option<Duration>,
    /// Requeue delay after a transient failure
    pub error_requeue: Duration,
    /// Requeue delay after a failure that needs a spec change
    pub invalid_requeue: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: Some(Duration::from_secs(30)),
            error_requeue: Duration::from_secs(15),
            invalid_requeue: Duration::from_secs(300),
        }
    }
}

/// Controller context shared by all reconciliations
pub struct Context {
    /// Store access
    pub kube: Arc<dyn AppServiceKubeClient>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Timing configuration
    pub config: ReconcileConfig,
    /// Cancelled on shutdown; in-flight store calls are abandoned
    pub cancel: CancellationToken,
}

impl Context {
    /// Create a context backed by a real client
    pub fn new(client: Client, config: ReconcileConfig, cancel: CancellationToken) -> Self {
        let events = Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));
        Self {
            kube: Arc::new(AppServiceKubeClientImpl::new(client)),
            events,
            config,
            cancel,
        }
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn AppServiceKubeClient>) -> Self {
        Self {
            kube,
            events: Arc::new(NoopEventPublisher),
            config: ReconcileConfig::default(),
            cancel: CancellationToken::new(),
        }
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile an AppService
///
/// Only the object's key is taken from `app`; the AppService itself is read
/// fresh from the API server. Returns `Action::await_change()` on success;
/// owned Deployments and Services are watched, so changes to them trigger
/// another pass.
#[instrument(skip(app, ctx), fields(app = %app.key()))]
pub async fn reconcile(app: Arc<AppService>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = app.name_any();
    let namespace = app
        .namespace()
        .ok_or_else(|| Error::validation_for(app.key(), "AppService has no namespace"))?;

    reconcile_key(&namespace, &name, &ctx).await
}

/// Reconcile the AppService at `namespace/name`
///
/// Bounded by the configured deadline and by the context's cancellation
/// token; either one abandons the outstanding store call and returns
/// [`Error::Cancelled`].
pub async fn reconcile_key(namespace: &str, name: &str, ctx: &Context) -> Result<Action, Error> {
    let work = converge(namespace, name, ctx);
    let timeout = ctx.config.reconcile_timeout;

    let bounded = async move {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .unwrap_or_else(|_| {
                    Err(Error::cancelled(format!("deadline of {:?} exceeded", limit)))
                }),
            None => work.await,
        }
    };

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(Error::cancelled("shutdown requested")),
        result = bounded => result,
    }
}

async fn converge(namespace: &str, name: &str, ctx: &Context) -> Result<Action, Error> {
    let Some(app) = ctx.kube.get_app_service(name, namespace).await? else {
        debug!("AppService no longer exists, nothing to do");
        return Ok(Action::await_change());
    };

    if app.is_being_deleted() {
        debug!("AppService is being deleted, derived resources are garbage collected");
        return Ok(Action::await_change());
    }

    if let Err(e) = app.spec.validate() {
        let e = e.with_app(app.key());
        record_validation_failure(&app, ctx, &e).await?;
        return Err(e);
    }

    let workload = translator::derive_workload(&app)?;
    let endpoint = translator::derive_endpoint(&app)?;

    let live_workload = ctx.kube.get_deployment(name, namespace).await?;
    let live_endpoint = ctx.kube.get_service(name, namespace).await?;
    ensure_controlled(&app, "Deployment", live_workload.as_ref().map(|d| &d.metadata))?;
    ensure_controlled(&app, "Service", live_endpoint.as_ref().map(|s| &s.metadata))?;

    if live_workload.is_none() {
        ctx.kube.create_deployment(namespace, &workload).await?;
        info!("created Deployment");
        publish(
            &app,
            ctx,
            EventType::Normal,
            reasons::WORKLOAD_CREATED,
            actions::CREATE,
            format!("Created Deployment {}", app.key()),
        )
        .await;
    }

    if live_endpoint.is_none() {
        ctx.kube.create_service(namespace, &endpoint).await?;
        info!("created Service");
        publish(
            &app,
            ctx,
            EventType::Normal,
            reasons::ENDPOINT_CREATED,
            actions::CREATE,
            format!("Created Service {}", app.key()),
        )
        .await;
    }

    let snapshot = Snapshot::read(&app);
    if snapshot.has_drifted(&app.spec) {
        if let Snapshot::Corrupt(reason) = &snapshot {
            warn!(%reason, "spec snapshot is unreadable, treating as drift");
        }

        let mut corrected = Vec::new();

        if let Some(mut live) = live_workload {
            let target = workload.spec.unwrap_or_default();
            if drift::workload_diverges(&live, &target) {
                live.spec = Some(target);
                live.status = None;
                ctx.kube.replace_deployment(namespace, &live).await?;
                corrected.push("Deployment");
            }
        }

        if let Some(mut live) = live_endpoint {
            let target = endpoint.spec.unwrap_or_default();
            if drift::endpoint_diverges(&live, &target) {
                live.spec = Some(drift::merge_endpoint_spec(live.spec.as_ref(), target));
                live.status = None;
                ctx.kube.replace_service(namespace, &live).await?;
                corrected.push("Service");
            }
        }

        if !corrected.is_empty() {
            info!(resources = ?corrected, "corrected drift");
            publish(
                &app,
                ctx,
                EventType::Normal,
                reasons::DRIFT_CORRECTED,
                actions::UPDATE,
                format!("Updated {} to match spec", corrected.join(" and ")),
            )
            .await;
        }

        ctx.kube
            .replace_app_service(&snapshot::with_snapshot(&app)?)
            .await?;
        debug!("recorded spec snapshot");
    }

    update_status(&app, ctx, AppServicePhase::Ready, READY_MESSAGE).await?;
    Ok(Action::await_change())
}

/// Refuse to manage a same-named resource this AppService does not control
fn ensure_controlled(
    app: &AppService,
    kind: &str,
    meta: Option<&ObjectMeta>,
) -> Result<(), Error> {
    let Some(meta) = meta else {
        return Ok(());
    };
    let owners = meta.owner_references.as_deref().unwrap_or_default();
    if is_owned_by(owners, app) {
        Ok(())
    } else {
        Err(Error::validation_for(
            app.key(),
            format!(
                "{} {} exists but is not controlled by this AppService",
                kind,
                app.key()
            ),
        ))
    }
}

async fn record_validation_failure(
    app: &AppService,
    ctx: &Context,
    error: &Error,
) -> Result<(), Error> {
    let msg = error.to_string();

    // Skip redundant events while the spec stays invalid
    if !is_status_unchanged(app, AppServicePhase::Failed, &msg) {
        warn!(error = %msg, "spec validation failed");
        publish(
            app,
            ctx,
            EventType::Warning,
            reasons::VALIDATION_FAILED,
            actions::VALIDATE,
            msg.clone(),
        )
        .await;
    } else {
        debug!(error = %msg, "spec still invalid");
    }

    update_status(app, ctx, AppServicePhase::Failed, &msg).await
}

async fn publish(
    app: &AppService,
    ctx: &Context,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&app.object_ref(&()), type_, reason, action, Some(note))
        .await;
}

/// Check if the status already matches, avoiding a self-triggered update loop
fn is_status_unchanged(app: &AppService, phase: AppServicePhase, message: &str) -> bool {
    app.status
        .as_ref()
        .map(|s| {
            s.phase == phase
                && s.message.as_deref() == Some(message)
                && s.observed_generation == app.metadata.generation
        })
        .unwrap_or(false)
}

async fn update_status(
    app: &AppService,
    ctx: &Context,
    phase: AppServicePhase,
    message: &str,
) -> Result<(), Error> {
    if is_status_unchanged(app, phase, message) {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    let status = AppServiceStatus::with_phase(phase)
        .message(message)
        .observed_generation(app.metadata.generation)
        .reconciled_at(Utc::now());

    let namespace = app.namespace().unwrap_or_default();
    ctx.kube
        .patch_app_service_status(&app.name_any(), &namespace, &status)
        .await
}

/// Error policy for the AppService controller
///
/// Keys are never dropped: transient errors requeue after `error_requeue`,
/// errors that need a spec change after the longer `invalid_requeue`.
pub fn error_policy(app: Arc<AppService>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        app = %app.key(),
        code = ?error.api_code(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.config.error_requeue)
    } else {
        Action::requeue(ctx.config.invalid_requeue)
    }
}
