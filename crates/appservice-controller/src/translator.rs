//! Desired-state translation
//!
//! Maps an `AppService` onto the Deployment and NodePort Service it owns.
//! Both derived objects share the AppService's namespace and name, carry a
//! controller owner reference back to it, and agree on a single label set:
//! the pod template labels are exactly the Service selector.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use appservice_common::crd::{AppService, AppServicePort, AppServiceSpec};
use appservice_common::kube_utils::controller_owner_reference;
use appservice_common::{Error, APP_LABEL_KEY, CONTROLLER_NAME, MANAGED_BY_LABEL_KEY};

/// Image pull policy of the application container
pub const IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// Service type of the derived endpoint
pub const SERVICE_TYPE: &str = "NodePort";

/// Protocol assumed when a port does not declare one
pub const DEFAULT_PROTOCOL: &str = "TCP";

/// The label set linking pods to the Service: `{app: <name>}`
///
/// Used for the Deployment selector, the pod template labels and the Service
/// selector. There is no other source of these labels.
pub fn app_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL_KEY.to_string(), name.to_string())])
}

fn object_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = app_labels(name);
    labels.insert(
        MANAGED_BY_LABEL_KEY.to_string(),
        CONTROLLER_NAME.to_string(),
    );
    labels
}

/// Derive the Deployment spec for an application named `name`
pub fn derive_workload_spec(name: &str, spec: &AppServiceSpec) -> DeploymentSpec {
    let labels = app_labels(name);

    DeploymentSpec {
        replicas: Some(spec.size),
        selector: LabelSelector {
            match_labels: Some(labels.clone()),
            ..Default::default()
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![app_container(name, spec)],
                ..Default::default()
            }),
        },
        ..Default::default()
    }
}

fn app_container(name: &str, spec: &AppServiceSpec) -> Container {
    let ports: Vec<ContainerPort> = spec
        .ports
        .iter()
        .map(|p| ContainerPort {
            container_port: p.container_port(),
            protocol: p.protocol.clone(),
            ..Default::default()
        })
        .collect();

    let env: Vec<EnvVar> = spec
        .envs
        .iter()
        .map(|e| EnvVar {
            name: e.name.clone(),
            value: e.value.clone(),
            ..Default::default()
        })
        .collect();

    Container {
        name: name.to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some(IMAGE_PULL_POLICY.to_string()),
        ports: (!ports.is_empty()).then_some(ports),
        env: (!env.is_empty()).then_some(env),
        resources: (!spec.resources.is_empty()).then(|| ResourceRequirements {
            requests: quantities(&spec.resources.requests),
            limits: quantities(&spec.resources.limits),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn quantities(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    (!map.is_empty()).then(|| {
        map.iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect()
    })
}

/// Derive the NodePort Service spec for an application named `name`
///
/// Ports are carried over verbatim; the selector is [`app_labels`].
pub fn derive_endpoint_spec(name: &str, spec: &AppServiceSpec) -> ServiceSpec {
    ServiceSpec {
        type_: Some(SERVICE_TYPE.to_string()),
        selector: Some(app_labels(name)),
        ports: Some(spec.ports.iter().map(service_port).collect()),
        ..Default::default()
    }
}

fn service_port(port: &AppServicePort) -> ServicePort {
    ServicePort {
        name: port.name.clone(),
        port: port.port,
        target_port: port.target_port.map(IntOrString::Int),
        protocol: port.protocol.clone(),
        node_port: port.node_port,
        ..Default::default()
    }
}

fn derived_metadata(app: &AppService) -> Result<ObjectMeta, Error> {
    let name = app.name_any();
    let namespace = app.namespace().ok_or_else(|| {
        Error::validation_for(app.key(), "AppService has no namespace")
    })?;

    Ok(ObjectMeta {
        name: Some(name.clone()),
        namespace: Some(namespace),
        labels: Some(object_labels(&name)),
        owner_references: Some(vec![controller_owner_reference(app)?]),
        ..Default::default()
    })
}

/// Derive the complete Deployment owned by `app`
pub fn derive_workload(app: &AppService) -> Result<Deployment, Error> {
    Ok(Deployment {
        metadata: derived_metadata(app)?,
        spec: Some(derive_workload_spec(&app.name_any(), &app.spec)),
        ..Default::default()
    })
}

/// Derive the complete Service owned by `app`
pub fn derive_endpoint(app: &AppService) -> Result<Service, Error> {
    Ok(Service {
        metadata: derived_metadata(app)?,
        spec: Some(derive_endpoint_spec(&app.name_any(), &app.spec)),
        ..Default::default()
    })
}
