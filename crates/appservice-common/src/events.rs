//! Events attached to AppService objects
//!
//! The reconciler reports creates, drift corrections and rejected specs as
//! core/v1 Events, so `kubectl describe appservice <name>` shows what the
//! operator did. Publishing never fails a reconciliation: an Event the API
//! server refuses is logged at warn level and dropped.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Sink for the Events a reconciliation emits
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Attach an Event to `resource_ref`
    ///
    /// `reason` is one of [`reasons`], `action` one of [`actions`]; `note`
    /// is the sentence shown to users.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publishes through the API server via kube's event `Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Report as `controller_name`, tagged with `$POD_NAME` when it is set
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish Kubernetes event");
        }
    }
}

/// Discards every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Values for an Event's `reason` field
pub mod reasons {
    /// Deployment created for an AppService
    pub const WORKLOAD_CREATED: &str = "WorkloadCreated";
    /// Service created for an AppService
    pub const ENDPOINT_CREATED: &str = "EndpointCreated";
    /// Derived resources rewritten after the spec changed
    pub const DRIFT_CORRECTED: &str = "DriftCorrected";
    /// Spec cannot be translated into derived resources
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
}

/// Values for an Event's `action` field
pub mod actions {
    /// A derived resource was created
    pub const CREATE: &str = "Create";
    /// A derived resource was replaced
    pub const UPDATE: &str = "Update";
    /// The spec was checked before translation
    pub const VALIDATE: &str = "Validate";
}
