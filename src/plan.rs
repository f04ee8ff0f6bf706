//! Boot plan descriptors: the level/service topology a run is loaded from.
//!
//! A descriptor is parsed from TOML and validated once, before any service is
//! built. Validation rejects empty plans, empty levels, duplicate names, and
//! dependency references that do not point at a strictly earlier level.

use crate::error::BootError;
use crate::types::ServiceName;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// Where a service runs: a freshly launched image or an existing host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionTarget {
    Image { image: String },
    Address { host: String },
}

impl ProvisionTarget {
    pub fn describe(&self) -> String {
        match self {
            ProvisionTarget::Image { image } => format!("image:{}", image),
            ProvisionTarget::Address { host } => format!("address:{}", host),
        }
    }
}

/// Contextualization payload: optional program plus configuration values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// Input value for a service: a literal or a `${service.key}` attribute reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRef {
    Literal(String),
    Attribute { service: ServiceName, key: String },
}

impl DependencyRef {
    pub fn parse(raw: &str) -> Result<Self, BootError> {
        let Some(inner) = raw.strip_prefix("${").and_then(|r| r.strip_suffix('}')) else {
            return Ok(DependencyRef::Literal(raw.to_string()));
        };
        let (service, key) = inner.split_once('.').ok_or_else(|| {
            BootError::config(format!(
                "Invalid dependency reference '{}' (expected ${{service.key}})",
                raw
            ))
        })?;
        if key.is_empty() {
            return Err(BootError::config(format!(
                "Dependency reference '{}' has an empty key",
                raw
            )));
        }
        Ok(DependencyRef::Attribute {
            service: ServiceName::new(service)?,
            key: key.to_string(),
        })
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyRef::Literal(value) => f.write_str(value),
            DependencyRef::Attribute { service, key } => write!(f, "${{{}.{}}}", service, key),
        }
    }
}

/// Everything the plan configuration says about one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawServiceSpec", into = "RawServiceSpec")]
pub struct ServiceSpec {
    pub name: ServiceName,
    pub target: ProvisionTarget,
    pub context: ContextDocument,
    pub ready_program: Option<String>,
    pub shutdown_program: Option<String>,
    pub dependencies: BTreeMap<String, DependencyRef>,
}

impl ServiceSpec {
    pub fn new(name: ServiceName, target: ProvisionTarget) -> Self {
        Self {
            name,
            target,
            context: ContextDocument::default(),
            ready_program: None,
            shutdown_program: None,
            dependencies: BTreeMap::new(),
        }
    }

    /// Services this one reads attributes from.
    pub fn upstream(&self) -> impl Iterator<Item = &ServiceName> {
        self.dependencies.values().filter_map(|dep| match dep {
            DependencyRef::Attribute { service, .. } => Some(service),
            DependencyRef::Literal(_) => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawServiceSpec {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(default)]
    context: ContextDocument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ready_program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shutdown_program: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
}

impl TryFrom<RawServiceSpec> for ServiceSpec {
    type Error = BootError;

    fn try_from(raw: RawServiceSpec) -> Result<Self, Self::Error> {
        let name = ServiceName::new(raw.name)?;
        let target = match (raw.image, raw.address) {
            (Some(image), None) if !image.trim().is_empty() => ProvisionTarget::Image { image },
            (None, Some(host)) if !host.trim().is_empty() => ProvisionTarget::Address { host },
            (Some(_), Some(_)) => {
                return Err(BootError::config(format!(
                    "Service '{}' sets both image and address (exactly one is allowed)",
                    name
                )))
            }
            _ => {
                return Err(BootError::config(format!(
                    "Service '{}' needs a non-empty image or address",
                    name
                )))
            }
        };
        let mut dependencies = BTreeMap::new();
        for (key, value) in raw.dependencies {
            dependencies.insert(key, DependencyRef::parse(&value)?);
        }
        Ok(Self {
            name,
            target,
            context: raw.context,
            ready_program: raw.ready_program,
            shutdown_program: raw.shutdown_program,
            dependencies,
        })
    }
}

impl From<ServiceSpec> for RawServiceSpec {
    fn from(spec: ServiceSpec) -> Self {
        let (image, address) = match spec.target {
            ProvisionTarget::Image { image } => (Some(image), None),
            ProvisionTarget::Address { host } => (None, Some(host)),
        };
        Self {
            name: spec.name.into(),
            image,
            address,
            context: spec.context,
            ready_program: spec.ready_program,
            shutdown_program: spec.shutdown_program,
            dependencies: spec
                .dependencies
                .into_iter()
                .map(|(key, dep)| (key, dep.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

/// Plan configuration: ordered levels of independent services.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDescriptor {
    #[serde(default)]
    pub levels: Vec<LevelSpec>,
}

impl PlanDescriptor {
    pub fn from_toml_str(raw: &str) -> Result<Self, BootError> {
        let descriptor: PlanDescriptor = toml::from_str(raw)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn from_file(path: &Path) -> Result<Self, BootError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BootError::usage(format!("Cannot read plan file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn service_count(&self) -> usize {
        self.levels.iter().map(|level| level.services.len()).sum()
    }

    pub fn validate(&self) -> Result<(), BootError> {
        if self.levels.is_empty() {
            return Err(BootError::config("Boot plan must contain at least one level"));
        }
        let mut seen: HashMap<&ServiceName, usize> = HashMap::new();
        for (index, level) in self.levels.iter().enumerate() {
            if level.services.is_empty() {
                return Err(BootError::config(format!("Level {} has no services", index)));
            }
            for service in &level.services {
                if let Some(previous) = seen.insert(&service.name, index) {
                    return Err(BootError::config(format!(
                        "Duplicate service name '{}' (levels {} and {})",
                        service.name, previous, index
                    )));
                }
            }
        }
        for (index, level) in self.levels.iter().enumerate() {
            for service in &level.services {
                for upstream in service.upstream() {
                    match seen.get(upstream) {
                        None => {
                            return Err(BootError::config(format!(
                                "Service '{}' depends on unknown service '{}'",
                                service.name, upstream
                            )))
                        }
                        Some(&producer_level) if producer_level >= index => {
                            return Err(BootError::config(format!(
                                "Service '{}' (level {}) depends on '{}' (level {}); \
                                 dependencies must come from an earlier level",
                                service.name, index, upstream, producer_level
                            )))
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        Ok(())
    }
}
