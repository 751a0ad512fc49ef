//! AppService reconciliation
//!
//! - **Translator**: derives the Deployment and NodePort Service an AppService owns
//! - **Snapshot**: records the last applied spec on the AppService and detects drift
//! - **Drift**: compares live resources against derived ones on owned fields only
//! - **Controller**: the reconcile loop, its store abstraction and error policy

pub mod controller;
pub mod drift;
pub mod snapshot;
pub mod translator;

pub use controller::{
    error_policy, reconcile, reconcile_key, AppServiceKubeClient, AppServiceKubeClientImpl,
    Context, ReconcileConfig,
};
