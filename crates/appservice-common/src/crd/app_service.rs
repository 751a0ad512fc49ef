//! AppService CRD types
//!
//! An `AppService` declares an application's deployment shape: image,
//! replica count, ports, resources, and environment. The controller derives
//! a Deployment and a NodePort Service from it.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// API group of the AppService CRD
pub const API_GROUP: &str = "cache.example.com";
/// API version of the AppService CRD
pub const API_VERSION: &str = "v1";
/// Kind of the AppService CRD
pub const KIND: &str = "AppService";

const VALID_PROTOCOLS: &[&str] = &["TCP", "UDP", "SCTP"];

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of an AppService
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AppServicePhase {
    /// Not yet reconciled
    #[default]
    Pending,
    /// Derived resources match the declared spec
    Ready,
    /// The declared spec cannot be translated
    Failed,
}

impl std::fmt::Display for AppServicePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Spec building blocks
// =============================================================================

/// A published port of the application
///
/// Maps one-to-one onto a Service port; `target_port` is also the
/// container port exposed by the pod.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppServicePort {
    /// Port name (required when more than one port is declared)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Port exposed by the Service
    pub port: i32,

    /// Port the container listens on (defaults to `port`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,

    /// Protocol: TCP, UDP or SCTP (defaults to TCP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Fixed node port; allocated by the API server when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

impl AppServicePort {
    /// The port the container listens on
    pub fn container_port(&self) -> i32 {
        self.target_port.unwrap_or(self.port)
    }
}

/// Environment variable for the application container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct EnvVar {
    /// Variable name
    pub name: String,

    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Compute resource requests and limits, keyed by resource name (`cpu`, `memory`, ...)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ResourceRequirements {
    /// Minimum resources required
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    /// Maximum resources allowed
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

impl ResourceRequirements {
    /// True when neither requests nor limits are set
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

fn default_size() -> i32 {
    1
}

// =============================================================================
// CRD
// =============================================================================

/// Declared shape of an application: one Deployment plus one NodePort Service
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "cache.example.com",
    version = "v1",
    kind = "AppService",
    plural = "appservices",
    shortname = "appsvc",
    namespaced,
    status = "AppServiceStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Size","type":"integer","jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppServiceSpec {
    /// Number of pod replicas
    #[serde(default = "default_size")]
    pub size: i32,

    /// Container image
    pub image: String,

    /// Ports published by the Service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<AppServicePort>,

    /// Container resource requests/limits
    #[serde(default, skip_serializing_if = "ResourceRequirements::is_empty")]
    pub resources: ResourceRequirements,

    /// Container environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<EnvVar>,
}

impl Default for AppServiceSpec {
    fn default() -> Self {
        Self {
            size: default_size(),
            image: String::new(),
            ports: Vec::new(),
            resources: ResourceRequirements::default(),
            envs: Vec::new(),
        }
    }
}

impl AppServiceSpec {
    /// Validate the spec before deriving resources from it
    ///
    /// Admission normally rejects these; this guards the translator against
    /// objects that slipped past it.
    pub fn validate(&self) -> Result<(), Error> {
        if self.image.trim().is_empty() {
            return Err(Error::validation_for_field("spec.image", "image is required"));
        }
        if self.image.chars().any(char::is_whitespace) {
            return Err(Error::validation_for_field(
                "spec.image",
                format!("image '{}' contains whitespace", self.image),
            ));
        }
        if self.size < 0 {
            return Err(Error::validation_for_field(
                "spec.size",
                format!("size must not be negative, got {}", self.size),
            ));
        }

        self.validate_ports()?;

        for (i, env) in self.envs.iter().enumerate() {
            if env.name.is_empty() {
                return Err(Error::validation_for_field(
                    format!("spec.envs[{}].name", i),
                    "environment variable name is required",
                ));
            }
        }

        for (kind, map) in [
            ("requests", &self.resources.requests),
            ("limits", &self.resources.limits),
        ] {
            for (resource, quantity) in map {
                if resource.is_empty() || quantity.trim().is_empty() {
                    return Err(Error::validation_for_field(
                        format!("spec.resources.{}", kind),
                        format!("invalid resource entry '{}: {}'", resource, quantity),
                    ));
                }
            }
        }

        Ok(())
    }

    fn validate_ports(&self) -> Result<(), Error> {
        if self.ports.is_empty() {
            return Err(Error::validation_for_field(
                "spec.ports",
                "at least one port is required for the NodePort service",
            ));
        }

        let mut names = HashSet::new();
        let mut numbers = HashSet::new();
        let multiple = self.ports.len() > 1;

        for (i, port) in self.ports.iter().enumerate() {
            let field = |f: &str| format!("spec.ports[{}].{}", i, f);

            if !(1..=65535).contains(&port.port) {
                return Err(Error::validation_for_field(
                    field("port"),
                    format!("port must be in 1..=65535, got {}", port.port),
                ));
            }
            if let Some(target) = port.target_port {
                if !(1..=65535).contains(&target) {
                    return Err(Error::validation_for_field(
                        field("targetPort"),
                        format!("targetPort must be in 1..=65535, got {}", target),
                    ));
                }
            }
            if let Some(node_port) = port.node_port {
                if !(1..=65535).contains(&node_port) {
                    return Err(Error::validation_for_field(
                        field("nodePort"),
                        format!("nodePort must be in 1..=65535, got {}", node_port),
                    ));
                }
            }

            let protocol = port.protocol.as_deref().unwrap_or("TCP");
            if !VALID_PROTOCOLS.contains(&protocol) {
                return Err(Error::validation_for_field(
                    field("protocol"),
                    format!("unsupported protocol '{}'", protocol),
                ));
            }
            if !numbers.insert((port.port, protocol)) {
                return Err(Error::validation_for_field(
                    field("port"),
                    format!("duplicate port {}/{}", port.port, protocol),
                ));
            }

            match port.name.as_deref() {
                Some(name) if !names.insert(name) => {
                    return Err(Error::validation_for_field(
                        field("name"),
                        format!("duplicate port name '{}'", name),
                    ));
                }
                None if multiple => {
                    return Err(Error::validation_for_field(
                        field("name"),
                        "ports must be named when more than one is declared",
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

impl AppService {
    /// `namespace/name` key used in logs and error context
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// True once the API server has marked the object for deletion
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

/// Status of an AppService
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppServiceStatus {
    /// Current phase
    #[serde(default)]
    pub phase: AppServicePhase,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation of the spec the derived resources were last reconciled to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Time of the last status change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<DateTime<Utc>>,
}

impl AppServiceStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: AppServicePhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Set the observed generation and return self for chaining
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Stamp the reconcile time and return self for chaining
    pub fn reconciled_at(mut self, time: DateTime<Utc>) -> Self {
        self.last_reconcile_time = Some(time);
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
