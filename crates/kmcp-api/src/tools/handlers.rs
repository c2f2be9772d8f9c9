//! Tool dispatch
//!
//! Each handler decodes its arguments, runs against the policy-checked
//! resource client and renders the outcome as text. Failures, policy
//! denials included, come back as error results rather than transport
//! errors.

use chrono::Utc;
use kmcp_common::ResourceKey;
use kube::api::{DynamicObject, ObjectList};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::access::resources::{ResourceClient, MANAGED_BY_LABEL};
use crate::cluster::configuration_view;
use crate::error::{Error, Result};
use crate::tools::{Tool, ToolKind};

/// Text outcome of a tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    /// Rendered output or error message
    pub text: String,
    /// Whether the call failed
    pub is_error: bool,
}

impl ToolResult {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// `tools/call` result
    pub fn to_json(&self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error,
        })
    }
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct ViewArgs {
    minified: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListArgs {
    namespace: Option<String>,
    label_selector: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PodArgs {
    namespace: Option<String>,
    name: String,
    container: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecArgs {
    namespace: Option<String>,
    name: String,
    container: Option<String>,
    command: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RunArgs {
    namespace: Option<String>,
    name: Option<String>,
    image: String,
    port: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceArgs {
    api_version: String,
    kind: String,
    namespace: Option<String>,
    name: Option<String>,
    label_selector: Option<String>,
}

impl ResourceArgs {
    fn key(&self) -> Result<ResourceKey> {
        ResourceKey::from_api_version(&self.api_version, self.kind.clone())
            .ok_or_else(|| Error::InvalidArgument(format!("invalid apiVersion {:?}", self.api_version)))
    }

    fn name(&self) -> Result<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidArgument("missing argument name".into()))
    }
}

#[derive(Debug, Deserialize)]
struct ManifestArgs {
    resource: String,
}

fn decode<T: DeserializeOwned>(args: Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| Error::InvalidArgument(e.to_string()))
}

// =============================================================================
// Rendering
// =============================================================================

fn to_yaml<T: Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| Error::Internal(e.to_string()))
}

fn without_managed_fields(mut obj: DynamicObject) -> DynamicObject {
    obj.metadata.managed_fields = None;
    obj
}

fn render_list(list: ObjectList<DynamicObject>) -> Result<String> {
    let items: Vec<DynamicObject> = list.items.into_iter().map(without_managed_fields).collect();
    to_yaml(&items)
}

fn render_events(list: ObjectList<DynamicObject>) -> Result<String> {
    if list.items.is_empty() {
        return Ok("No events found".to_string());
    }
    let events: Vec<Value> = list
        .items
        .iter()
        .map(|e| {
            let field = |name: &str| e.data.get(name).cloned().unwrap_or(Value::Null);
            json!({
                "Namespace": e.metadata.namespace,
                "Timestamp": e.data.get("lastTimestamp").or_else(|| e.data.get("eventTime")),
                "Type": field("type"),
                "Reason": field("reason"),
                "Message": field("message"),
                "InvolvedObject": {
                    "apiVersion": field("involvedObject")["apiVersion"],
                    "Kind": field("involvedObject")["kind"],
                    "Name": field("involvedObject")["name"],
                },
            })
        })
        .collect();
    Ok(format!(
        "The following events (YAML format) were found:\n{}",
        to_yaml(&events)?
    ))
}

fn run_name() -> String {
    format!("kmcp-run-{:x}", Utc::now().timestamp_micros() & 0xf_ffff)
}

// =============================================================================
// Dispatch
// =============================================================================

/// Execute `tool` with `args` against `client`
pub async fn call_tool(tool: &Tool, args: Value, client: &ResourceClient) -> ToolResult {
    debug!(tool = tool.name, "Calling tool");
    let (action, outcome) = match tool.kind {
        ToolKind::ConfigurationView => ("get configuration", configuration(args, client)),
        ToolKind::EventsList => ("list events", events_list(args, client).await),
        ToolKind::NamespacesList => (
            "list namespaces",
            client.namespaces_list().await.and_then(render_list),
        ),
        ToolKind::ProjectsList => (
            "list projects",
            client.projects_list().await.and_then(render_list),
        ),
        ToolKind::PodsList => ("list pods", pods_list(args, client, false).await),
        ToolKind::PodsListInNamespace => ("list pods", pods_list(args, client, true).await),
        ToolKind::PodsGet => ("get pod", pods_get(args, client).await),
        ToolKind::PodsDelete => ("delete pod", pods_delete(args, client).await),
        ToolKind::PodsLog => ("get pod log", pods_log(args, client).await),
        ToolKind::PodsExec => ("exec in pod", pods_exec(args, client).await),
        ToolKind::PodsRun => ("run pod", pods_run(args, client).await),
        ToolKind::ResourcesList => ("list resources", resources_list(args, client).await),
        ToolKind::ResourcesGet => ("get resource", resources_get(args, client).await),
        ToolKind::ResourcesCreateOrUpdate => (
            "create or update resources",
            resources_create_or_update(args, client).await,
        ),
        ToolKind::ResourcesDelete => ("delete resource", resources_delete(args, client).await),
    };

    match outcome {
        Ok(text) => ToolResult::ok(text),
        Err(e) => {
            debug!(tool = tool.name, error = %e, "Tool call failed");
            ToolResult::error(format!("failed to {}: {}", action, e))
        }
    }
}

fn configuration(args: Value, client: &ResourceClient) -> Result<String> {
    let args: ViewArgs = decode(args)?;
    configuration_view(client.clients(), args.minified.unwrap_or(true))
}

async fn events_list(args: Value, client: &ResourceClient) -> Result<String> {
    let args: ListArgs = decode(args)?;
    render_events(client.events_list(args.namespace.as_deref()).await?)
}

async fn pods_list(args: Value, client: &ResourceClient, namespaced: bool) -> Result<String> {
    let args: ListArgs = decode(args)?;
    let namespace = if namespaced {
        Some(
            args.namespace
                .as_deref()
                .filter(|ns| !ns.is_empty())
                .ok_or_else(|| Error::InvalidArgument("missing argument namespace".into()))?,
        )
    } else {
        None
    };
    let list = client
        .resources_list(
            &ResourceKey::new("", "v1", "Pod"),
            namespace,
            args.label_selector.as_deref(),
        )
        .await?;
    render_list(list)
}

async fn pods_get(args: Value, client: &ResourceClient) -> Result<String> {
    let args: PodArgs = decode(args)?;
    let pod = client
        .resources_get(&ResourceKey::new("", "v1", "Pod"), args.namespace.as_deref(), &args.name)
        .await?;
    to_yaml(&without_managed_fields(pod))
}

fn namespace_or_default<'a>(namespace: &'a Option<String>, client: &'a ResourceClient) -> &'a str {
    namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| client.clients().default_namespace())
}

async fn pods_delete(args: Value, client: &ResourceClient) -> Result<String> {
    let args: PodArgs = decode(args)?;
    client
        .pods_delete(namespace_or_default(&args.namespace, client), &args.name)
        .await?;
    Ok("Pod deleted successfully".to_string())
}

async fn pods_log(args: Value, client: &ResourceClient) -> Result<String> {
    let args: PodArgs = decode(args)?;
    let logs = client
        .pods_log(
            namespace_or_default(&args.namespace, client),
            &args.name,
            args.container.as_deref(),
        )
        .await?;
    Ok(if logs.is_empty() {
        format!("The pod {} has not logged any message yet", args.name)
    } else {
        logs
    })
}

async fn pods_exec(args: Value, client: &ResourceClient) -> Result<String> {
    let args: ExecArgs = decode(args)?;
    if args.command.is_empty() {
        return Err(Error::InvalidArgument("command must not be empty".into()));
    }
    let output = client
        .pods_exec(
            namespace_or_default(&args.namespace, client),
            &args.name,
            args.container.as_deref(),
            args.command,
        )
        .await?;
    Ok(if output.is_empty() {
        format!("The executed command in pod {} has not produced any output", args.name)
    } else {
        output
    })
}

async fn pods_run(args: Value, client: &ResourceClient) -> Result<String> {
    let args: RunArgs = decode(args)?;
    let name = args.name.filter(|n| !n.is_empty()).unwrap_or_else(run_name);
    let created = client
        .pods_run(
            namespace_or_default(&args.namespace, client),
            &name,
            &args.image,
            args.port,
        )
        .await?;
    let created: Vec<DynamicObject> = created.into_iter().map(without_managed_fields).collect();
    Ok(format!(
        "The following resources (YAML) have been created or updated successfully, labelled {}:\n{}",
        MANAGED_BY_LABEL,
        to_yaml(&created)?
    ))
}

async fn resources_list(args: Value, client: &ResourceClient) -> Result<String> {
    let args: ResourceArgs = decode(args)?;
    let list = client
        .resources_list(&args.key()?, args.namespace.as_deref(), args.label_selector.as_deref())
        .await?;
    render_list(list)
}

async fn resources_get(args: Value, client: &ResourceClient) -> Result<String> {
    let args: ResourceArgs = decode(args)?;
    let obj = client
        .resources_get(&args.key()?, args.namespace.as_deref(), args.name()?)
        .await?;
    to_yaml(&without_managed_fields(obj))
}

async fn resources_create_or_update(args: Value, client: &ResourceClient) -> Result<String> {
    let args: ManifestArgs = decode(args)?;
    let applied = client.resources_create_or_update(&args.resource).await?;
    let applied: Vec<DynamicObject> = applied.into_iter().map(without_managed_fields).collect();
    Ok(format!(
        "The following resources (YAML) have been created or updated successfully\n{}",
        to_yaml(&applied)?
    ))
}

async fn resources_delete(args: Value, client: &ResourceClient) -> Result<String> {
    let args: ResourceArgs = decode(args)?;
    client
        .resources_delete(&args.key()?, args.namespace.as_deref(), args.name()?)
        .await?;
    Ok("Resource deleted successfully".to_string())
}
