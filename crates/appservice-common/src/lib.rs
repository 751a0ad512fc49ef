//! Common types for the AppService operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};

/// Annotation on an AppService holding the JSON snapshot of the last applied spec
pub const SPEC_SNAPSHOT_ANNOTATION: &str = "spec";

/// Label key shared by the workload's pod template and the endpoint's selector
pub const APP_LABEL_KEY: &str = "app";

/// Label marking resources created by this operator
pub const MANAGED_BY_LABEL_KEY: &str = "app.kubernetes.io/managed-by";

/// Field manager / reporting component name used against the API server
pub const CONTROLLER_NAME: &str = "appservice-controller";
