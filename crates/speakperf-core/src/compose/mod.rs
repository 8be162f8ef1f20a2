//! Compose content parsing and source resolution.
//!
//! Only the parts of a Compose document the orchestrator needs are modelled:
//! the service map with image, published ports, environment and
//! dependencies. Everything else is ignored, so any valid Compose file parses.

pub mod source;

use crate::errors::{PerfError, PerfResult};
use serde::Deserialize;
use serde_yaml::Value as Yaml;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComposeService {
    pub name: String,
    pub image: Option<String>,
    /// Normalised "host:container" strings, declaration order.
    pub ports: Vec<String>,
    pub environment: Vec<String>,
    pub depends_on: Vec<String>,
}

impl ComposeService {
    pub fn host_port(&self) -> Option<String> {
        self.ports.first().and_then(|p| host_port(p))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComposeDocument {
    /// Services in document order.
    pub services: Vec<ComposeService>,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    services: Option<serde_yaml::Mapping>,
}

#[derive(Deserialize, Default)]
struct RawService {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    ports: Vec<Yaml>,
    #[serde(default)]
    environment: Option<Yaml>,
    #[serde(default)]
    depends_on: Option<Yaml>,
}

impl ComposeDocument {
    pub fn parse(content: &str) -> PerfResult<Self> {
        let root: Yaml =
            serde_yaml::from_str(content).map_err(|e| PerfError::Validation(e.to_string()))?;
        if !root.is_mapping() {
            return Err(PerfError::Validation(
                "top level of a compose file must be a mapping".to_string(),
            ));
        }
        let raw: RawDocument =
            serde_yaml::from_value(root).map_err(|e| PerfError::Validation(e.to_string()))?;

        let mut services = Vec::new();
        for (key, value) in raw.services.unwrap_or_default() {
            let name = scalar_to_string(&key).ok_or_else(|| {
                PerfError::Validation("service names must be scalars".to_string())
            })?;
            // `web:` with no body is valid Compose shorthand for an empty service
            let svc: RawService = if value.is_null() {
                RawService::default()
            } else {
                serde_yaml::from_value(value)
                    .map_err(|e| PerfError::Validation(format!("service '{name}': {e}")))?
            };

            services.push(ComposeService {
                ports: svc
                    .ports
                    .iter()
                    .filter_map(normalize_port)
                    .collect::<Vec<_>>(),
                environment: svc.environment.as_ref().map(flatten_kv).unwrap_or_default(),
                depends_on: svc.depends_on.as_ref().map(flatten_keys).unwrap_or_default(),
                image: svc.image,
                name,
            });
        }

        Ok(Self { services })
    }

    /// First published host port across services, in document order.
    pub fn first_host_port(&self) -> Option<String> {
        self.services.iter().find_map(|s| s.host_port())
    }
}

/// Host-side port of a short-syntax mapping.
///
/// `"H:C"` gives H, `"IP:H:C"` gives H, a bare `"C"` gives C. Protocol
/// suffixes (`/tcp`) are dropped.
pub fn host_port(mapping: &str) -> Option<String> {
    let mapping = mapping.split('/').next().unwrap_or("").trim();
    if mapping.is_empty() {
        return None;
    }
    let parts: Vec<&str> = mapping.split(':').collect();
    let host = match parts.len() {
        1 | 2 => parts[0],
        _ => parts[parts.len() - 2],
    };
    let host = host.trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn normalize_port(v: &Yaml) -> Option<String> {
    match v {
        Yaml::Mapping(m) => {
            let target = m.get("target").and_then(scalar_to_string)?;
            match m.get("published").and_then(scalar_to_string) {
                Some(published) => Some(format!("{published}:{target}")),
                None => Some(target),
            }
        }
        other => scalar_to_string(other),
    }
}

fn flatten_kv(v: &Yaml) -> Vec<String> {
    match v {
        Yaml::Sequence(items) => items.iter().filter_map(scalar_to_string).collect(),
        Yaml::Mapping(m) => m
            .iter()
            .filter_map(|(k, v)| {
                let k = scalar_to_string(k)?;
                Some(match scalar_to_string(v) {
                    Some(v) => format!("{k}={v}"),
                    None => k,
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn flatten_keys(v: &Yaml) -> Vec<String> {
    match v {
        Yaml::Sequence(items) => items.iter().filter_map(scalar_to_string).collect(),
        Yaml::Mapping(m) => m.keys().filter_map(scalar_to_string).collect(),
        _ => Vec::new(),
    }
}

fn scalar_to_string(v: &Yaml) -> Option<String> {
    match v {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
