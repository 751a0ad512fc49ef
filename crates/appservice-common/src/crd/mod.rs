//! Custom Resource Definitions for the AppService operator

mod app_service;

pub use app_service::{
    AppService, AppServicePhase, AppServicePort, AppServiceSpec, AppServiceStatus, EnvVar,
    ResourceRequirements, API_GROUP, API_VERSION, KIND,
};
