//! Tool surface
//!
//! The exposed tools are a pure function of the tool settings and the facts
//! gathered from the cluster during a rebuild. A surface is computed whole
//! and never modified afterwards.

pub mod handlers;

use std::fmt;
use std::str::FromStr;

use kmcp_common::StaticConfig;
use serde_json::{json, Value};
use tracing::debug;

use crate::cluster::KubeClients;
use crate::error::Error;

pub use handlers::{call_tool, ToolResult};

/// Named bundle of toolsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Every toolset
    Full,
    /// Every toolset except configuration
    FullSafe,
}

impl Profile {
    fn toolsets(self) -> &'static [Toolset] {
        match self {
            Profile::Full => &[
                Toolset::Configuration,
                Toolset::Events,
                Toolset::Namespaces,
                Toolset::Pods,
                Toolset::Resources,
            ],
            Profile::FullSafe => &[
                Toolset::Events,
                Toolset::Namespaces,
                Toolset::Pods,
                Toolset::Resources,
            ],
        }
    }
}

impl FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Profile::Full),
            "full-safe" => Ok(Profile::FullSafe),
            other => Err(Error::Config(format!("unknown profile {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toolset {
    Configuration,
    Events,
    Namespaces,
    Pods,
    Resources,
}

/// Operation a tool performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Show the kubeconfig in use
    ConfigurationView,
    /// List events
    EventsList,
    /// List namespaces
    NamespacesList,
    /// List OpenShift projects
    ProjectsList,
    /// List pods in every namespace
    PodsList,
    /// List pods in one namespace
    PodsListInNamespace,
    /// Get a pod
    PodsGet,
    /// Delete a pod
    PodsDelete,
    /// Read pod logs
    PodsLog,
    /// Run a command in a pod
    PodsExec,
    /// Start a pod from an image
    PodsRun,
    /// List objects of any type
    ResourcesList,
    /// Get an object of any type
    ResourcesGet,
    /// Apply a manifest
    ResourcesCreateOrUpdate,
    /// Delete an object of any type
    ResourcesDelete,
}

/// A callable tool and its annotations
#[derive(Debug, Clone)]
pub struct Tool {
    /// Tool name
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Performs no writes
    pub read_only: bool,
    /// May delete or overwrite state
    pub destructive: bool,
    /// JSON schema of the arguments
    pub input_schema: Value,
    /// Operation dispatched on call
    pub kind: ToolKind,
}

impl Tool {
    fn new(kind: ToolKind, name: &'static str, description: &'static str, input_schema: Value) -> Self {
        Self {
            name,
            description,
            read_only: true,
            destructive: false,
            input_schema,
            kind,
        }
    }

    fn writes(mut self) -> Self {
        self.read_only = false;
        self
    }

    fn destructive(mut self) -> Self {
        self.read_only = false;
        self.destructive = true;
        self
    }

    /// `tools/list` entry
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
            "annotations": {
                "readOnlyHint": self.read_only,
                "destructiveHint": self.destructive,
            },
        })
    }
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

fn toolset_tools(toolset: Toolset, facts: &ClusterFacts) -> Vec<Tool> {
    let namespace = json!({ "type": "string", "description": "Namespace" });
    let name = json!({ "type": "string", "description": "Object name" });
    let label_selector = json!({ "type": "string", "description": "Label selector, e.g. app=web" });
    let api_version = json!({ "type": "string", "description": "apiVersion, e.g. v1 or apps/v1" });
    let kind = json!({ "type": "string", "description": "Kind, e.g. Pod or Deployment" });

    match toolset {
        Toolset::Configuration => vec![Tool::new(
            ToolKind::ConfigurationView,
            "configuration_view",
            "Show the kubeconfig in use, with credentials removed",
            schema(
                json!({ "minified": { "type": "boolean", "description": "Only the current context (default true)" } }),
                &[],
            ),
        )],
        Toolset::Events => vec![Tool::new(
            ToolKind::EventsList,
            "events_list",
            "List events in a namespace or across the cluster",
            schema(json!({ "namespace": namespace }), &[]),
        )],
        Toolset::Namespaces if facts.openshift => vec![Tool::new(
            ToolKind::ProjectsList,
            "projects_list",
            "List OpenShift projects",
            schema(json!({}), &[]),
        )],
        Toolset::Namespaces => vec![Tool::new(
            ToolKind::NamespacesList,
            "namespaces_list",
            "List namespaces",
            schema(json!({}), &[]),
        )],
        Toolset::Pods => vec![
            Tool::new(
                ToolKind::PodsList,
                "pods_list",
                "List pods in every namespace",
                schema(json!({ "labelSelector": label_selector }), &[]),
            ),
            Tool::new(
                ToolKind::PodsListInNamespace,
                "pods_list_in_namespace",
                "List pods in a namespace",
                schema(
                    json!({ "namespace": namespace, "labelSelector": label_selector }),
                    &["namespace"],
                ),
            ),
            Tool::new(
                ToolKind::PodsGet,
                "pods_get",
                "Get a pod",
                schema(json!({ "namespace": namespace, "name": name }), &["name"]),
            ),
            Tool::new(
                ToolKind::PodsDelete,
                "pods_delete",
                "Delete a pod and any service created with it",
                schema(json!({ "namespace": namespace, "name": name }), &["name"]),
            )
            .destructive(),
            Tool::new(
                ToolKind::PodsLog,
                "pods_log",
                "Read the logs of a pod container",
                schema(
                    json!({ "namespace": namespace, "name": name, "container": { "type": "string" } }),
                    &["name"],
                ),
            ),
            Tool::new(
                ToolKind::PodsExec,
                "pods_exec",
                "Run a command in a pod container",
                schema(
                    json!({
                        "namespace": namespace,
                        "name": name,
                        "container": { "type": "string" },
                        "command": { "type": "array", "items": { "type": "string" } },
                    }),
                    &["name", "command"],
                ),
            )
            .destructive(),
            Tool::new(
                ToolKind::PodsRun,
                "pods_run",
                "Start a pod from a container image, exposing a port through a service",
                schema(
                    json!({
                        "namespace": namespace,
                        "name": name,
                        "image": { "type": "string" },
                        "port": { "type": "integer" },
                    }),
                    &["image"],
                ),
            )
            .writes(),
        ],
        Toolset::Resources => vec![
            Tool::new(
                ToolKind::ResourcesList,
                "resources_list",
                "List objects of any type",
                schema(
                    json!({
                        "apiVersion": api_version,
                        "kind": kind,
                        "namespace": namespace,
                        "labelSelector": label_selector,
                    }),
                    &["apiVersion", "kind"],
                ),
            ),
            Tool::new(
                ToolKind::ResourcesGet,
                "resources_get",
                "Get an object of any type",
                schema(
                    json!({ "apiVersion": api_version, "kind": kind, "namespace": namespace, "name": name }),
                    &["apiVersion", "kind", "name"],
                ),
            ),
            Tool::new(
                ToolKind::ResourcesCreateOrUpdate,
                "resources_create_or_update",
                "Create or update objects from a YAML or JSON manifest",
                schema(json!({ "resource": { "type": "string" } }), &["resource"]),
            )
            .destructive(),
            Tool::new(
                ToolKind::ResourcesDelete,
                "resources_delete",
                "Delete an object of any type",
                schema(
                    json!({ "apiVersion": api_version, "kind": kind, "namespace": namespace, "name": name }),
                    &["apiVersion", "kind", "name"],
                ),
            )
            .destructive(),
        ],
    }
}

/// Inputs that select the exposed tools
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// Toolset bundle
    pub profile: Profile,
    /// Expose only read-only tools
    pub read_only: bool,
    /// Hide destructive tools
    pub disable_destructive: bool,
    /// If non-empty, expose only these tools
    pub enabled_tools: Vec<String>,
    /// Never expose these tools
    pub disabled_tools: Vec<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            profile: Profile::Full,
            read_only: false,
            disable_destructive: false,
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
        }
    }
}

impl ToolSettings {
    /// Settings from static configuration
    pub fn from_static(config: &StaticConfig) -> Result<Self, Error> {
        Ok(Self {
            profile: config.profile.parse()?,
            read_only: config.read_only,
            disable_destructive: config.disable_destructive,
            enabled_tools: config.enabled_tools.clone(),
            disabled_tools: config.disabled_tools.clone(),
        })
    }
}

/// Cluster properties that change which tools exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterFacts {
    /// Cluster serves the `project.openshift.io` group
    pub openshift: bool,
}

impl ClusterFacts {
    /// Probe discovery; a failed probe counts as not OpenShift
    pub async fn detect(clients: &KubeClients) -> Self {
        let openshift = match clients.resolver().has_group("project.openshift.io").await {
            Ok(found) => found,
            Err(e) => {
                debug!(error = %e, "OpenShift detection failed");
                false
            }
        };
        Self { openshift }
    }
}

/// Whether `tool` is exposed under `settings`
pub fn is_tool_applicable(tool: &Tool, settings: &ToolSettings) -> bool {
    if settings.read_only && !tool.read_only {
        return false;
    }
    if settings.disable_destructive && !tool.read_only && tool.destructive {
        return false;
    }
    if !settings.enabled_tools.is_empty() && !settings.enabled_tools.iter().any(|t| t == tool.name) {
        return false;
    }
    !settings.disabled_tools.iter().any(|t| t == tool.name)
}

/// The set of exposed tools
#[derive(Debug, Clone, Default)]
pub struct ToolSurface {
    tools: Vec<Tool>,
}

impl ToolSurface {
    /// Evaluate every candidate tool against `settings`
    pub fn compute(settings: &ToolSettings, facts: &ClusterFacts) -> Self {
        let tools = settings
            .profile
            .toolsets()
            .iter()
            .flat_map(|ts| toolset_tools(*ts, facts))
            .filter(|tool| is_tool_applicable(tool, settings))
            .collect();
        Self { tools }
    }

    /// Exposed tool by name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Exposed tools
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Exposed tool names
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name).collect()
    }

    /// `tools/list` result
    pub fn to_json(&self) -> Value {
        json!({ "tools": self.tools.iter().map(Tool::to_json).collect::<Vec<_>>() })
    }
}

impl fmt::Display for ToolSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(", "))
    }
}
