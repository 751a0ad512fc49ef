//! Owned-field comparison between live and derived resources
//!
//! The API server fills in defaults (protocols, termination paths, strategy)
//! and allocations (cluster IPs, node ports) that the translator never sets.
//! Only the fields the translator owns are compared, with server defaults
//! normalized, so a resource is rewritten only when it actually differs.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::translator::DEFAULT_PROTOCOL;

/// True if the live Deployment's owned fields differ from `target`
pub fn workload_diverges(live: &Deployment, target: &DeploymentSpec) -> bool {
    let Some(live) = live.spec.as_ref() else {
        return true;
    };

    live.replicas.unwrap_or(1) != target.replicas.unwrap_or(1)
        || live.selector.match_labels != target.selector.match_labels
        || template_labels(&live.template) != template_labels(&target.template)
        || containers_diverge(&live.template, &target.template)
}

fn template_labels(template: &PodTemplateSpec) -> Option<&BTreeMap<String, String>> {
    template.metadata.as_ref().and_then(|m| m.labels.as_ref())
}

fn containers(template: &PodTemplateSpec) -> &[Container] {
    template
        .spec
        .as_ref()
        .map(|s| s.containers.as_slice())
        .unwrap_or_default()
}

fn containers_diverge(live: &PodTemplateSpec, target: &PodTemplateSpec) -> bool {
    let live = containers(live);
    let target = containers(target);

    live.len() != target.len()
        || target.iter().any(|want| {
            live.iter()
                .find(|c| c.name == want.name)
                .map_or(true, |have| container_diverges(have, want))
        })
}

fn container_diverges(live: &Container, target: &Container) -> bool {
    let ports = |c: &Container| -> Vec<(i32, String)> {
        c.ports
            .iter()
            .flatten()
            .map(|p| (p.container_port, protocol(p.protocol.as_deref())))
            .collect()
    };
    let env = |c: &Container| -> Vec<(String, String)> {
        c.env
            .iter()
            .flatten()
            .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
            .collect()
    };
    fn requests(c: &Container) -> Option<&BTreeMap<String, Quantity>> {
        c.resources.as_ref().and_then(|r| r.requests.as_ref())
    }
    fn limits(c: &Container) -> Option<&BTreeMap<String, Quantity>> {
        c.resources.as_ref().and_then(|r| r.limits.as_ref())
    }

    live.image != target.image
        || live.image_pull_policy != target.image_pull_policy
        || ports(live) != ports(target)
        || env(live) != env(target)
        || quantities_diverge(requests(live), requests(target))
        || quantities_diverge(limits(live), limits(target))
}

fn protocol(value: Option<&str>) -> String {
    value.unwrap_or(DEFAULT_PROTOCOL).to_string()
}

// =============================================================================
// Resource quantities
// =============================================================================

/// Compare two resource maps by amount rather than spelling
///
/// The API server canonicalizes quantities on write (`0.5` comes back as
/// `500m`, `1024Mi` as `1Gi`), so string equality would report drift on
/// every pass.
fn quantities_diverge(
    live: Option<&BTreeMap<String, Quantity>>,
    target: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let live = live.unwrap_or(&empty);
    let target = target.unwrap_or(&empty);

    live.len() != target.len()
        || target.iter().any(|(name, want)| {
            live.get(name)
                .map_or(true, |have| !same_quantity(&have.0, &want.0))
        })
}

fn same_quantity(a: &str, b: &str) -> bool {
    match (quantity_nanos(a), quantity_nanos(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

/// Value of a Kubernetes quantity in billionths of its base unit
///
/// Accepts plain and decimal numbers, decimal SI suffixes (`n`, `u`, `m`,
/// `k`, `M`, `G`, `T`, `P`, `E`), binary suffixes (`Ki` through `Ei`) and
/// exponents (`1e3`). Sub-nano remainders round up, as the API server does.
/// Returns `None` for anything else or on overflow.
fn quantity_nanos(value: &str) -> Option<i128> {
    let value = value.trim();
    let (negative, value) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };

    let number_end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(number_end);
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return None;
    }

    let mut mantissa: i128 = 0;
    for digit in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa
            .checked_mul(10)?
            .checked_add(i128::from(digit - b'0'))?;
    }

    let (exponent, binary) = suffix_scale(suffix)?;
    let exponent = exponent + 9 - i32::try_from(fraction.len()).ok()?;

    let scaled = mantissa.checked_mul(binary)?;
    let nanos = if exponent >= 0 {
        scaled.checked_mul(10_i128.checked_pow(exponent.unsigned_abs())?)?
    } else {
        let divisor = 10_i128.checked_pow(exponent.unsigned_abs())?;
        let quotient = scaled / divisor;
        if scaled % divisor == 0 {
            quotient
        } else {
            quotient + 1
        }
    };

    Some(if negative { -nanos } else { nanos })
}

/// Decimal exponent and binary multiplier for a quantity suffix
fn suffix_scale(suffix: &str) -> Option<(i32, i128)> {
    const BINARY: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

    if let Some(power) = BINARY.iter().position(|s| *s == suffix) {
        return Some((0, 1_i128 << (10 * (power + 1))));
    }

    let exponent = match suffix {
        "" => 0,
        "n" => -9,
        "u" => -6,
        "m" => -3,
        "k" => 3,
        "M" => 6,
        "G" => 9,
        "T" => 12,
        "P" => 15,
        "E" => 18,
        _ => {
            let rest = suffix.strip_prefix(['e', 'E'])?;
            rest.parse::<i32>().ok().filter(|e| e.abs() <= 30)?
        }
    };
    Some((exponent, 1))
}

/// True if the live Service's owned fields differ from `target`
///
/// Node ports are compared only where `target` pins one; otherwise the
/// allocated value is accepted.
pub fn endpoint_diverges(live: &Service, target: &ServiceSpec) -> bool {
    let Some(live) = live.spec.as_ref() else {
        return true;
    };

    let live_ports = live.ports.as_deref().unwrap_or_default();
    let target_ports = target.ports.as_deref().unwrap_or_default();

    live.type_ != target.type_
        || live.selector != target.selector
        || live_ports.len() != target_ports.len()
        || live_ports
            .iter()
            .zip(target_ports)
            .any(|(have, want)| port_diverges(have, want))
}

fn port_diverges(live: &ServicePort, target: &ServicePort) -> bool {
    let target_port = |p: &ServicePort| {
        p.target_port
            .clone()
            .unwrap_or(IntOrString::Int(p.port))
    };

    live.name != target.name
        || live.port != target.port
        || target_port(live) != target_port(target)
        || protocol(live.protocol.as_deref()) != protocol(target.protocol.as_deref())
        || (target.node_port.is_some() && live.node_port != target.node_port)
}

/// Build the Service spec to write over `live`
///
/// Starts from `target` and carries over what the API server allocated:
/// cluster IPs, IP families, and node ports for ports that don't pin one.
/// Clearing those on a replace would be rejected or would reshuffle ports.
pub fn merge_endpoint_spec(live: Option<&ServiceSpec>, target: ServiceSpec) -> ServiceSpec {
    let Some(live) = live else {
        return target;
    };

    let mut merged = target;
    merged.cluster_ip = live.cluster_ip.clone();
    merged.cluster_ips = live.cluster_ips.clone();
    merged.ip_families = live.ip_families.clone();
    merged.ip_family_policy = live.ip_family_policy.clone();

    let live_ports = live.ports.as_deref().unwrap_or_default();
    for port in merged.ports.iter_mut().flatten() {
        if port.node_port.is_some() {
            continue;
        }
        port.node_port = live_ports
            .iter()
            .find(|lp| {
                lp.port == port.port
                    && protocol(lp.protocol.as_deref()) == protocol(port.protocol.as_deref())
            })
            .and_then(|lp| lp.node_port);
    }

    merged
}
