//! Cloud instance provisioning through the provider's CLI, plus normalization
//! of its JSON output into [`ComputeInstance`] records.

use crate::config::ComputeConfig;
use crate::env_file::CloudProfile;
use crate::error::DeskError;
use crate::exec::{render_command, CommandOutput, ProcessRunner};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputeInstance {
    pub id: String,
    pub name: String,
    pub status: String,
    pub public_ip: String,
    pub resources: String,
    pub zone: String,
    pub created_at: String,
}

impl ComputeInstance {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedInstance {
    pub name: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopComputeOutcome {
    Stopped { id: String, name: String },
    Declined { id: String },
    NoneRunning,
}

fn lookup<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

fn scalar_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn first_string(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(scalar_string))
}

fn extract_status(value: &Value) -> String {
    first_string(value, &[&["status"], &["status", "state"], &["state"]])
        .map(|status| status.to_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}

fn strip_prefix_len(address: &str) -> String {
    address.split('/').next().unwrap_or(address).to_string()
}

fn extract_public_ip(value: &Value) -> Option<String> {
    if let Some(ip) = first_string(value, &[&["public_ip"], &["public_ip_address"]]) {
        return Some(strip_prefix_len(&ip));
    }
    let interface_paths: [&[&str]; 3] = [
        &["network_interfaces"],
        &["status", "network_interfaces"],
        &["spec", "network_interfaces"],
    ];
    for path in interface_paths {
        let Some(Value::Array(interfaces)) = lookup(value, path) else {
            continue;
        };
        for interface in interfaces {
            let address = first_string(
                interface,
                &[
                    &["public_ip_address", "address"],
                    &["public_ip_address"],
                    &["public_ip"],
                ],
            );
            if let Some(address) = address {
                return Some(strip_prefix_len(&address));
            }
        }
    }
    None
}

fn extract_resources(value: &Value) -> Option<String> {
    let resources = lookup(value, &["resources"]).or_else(|| lookup(value, &["spec", "resources"]))?;
    if let Some(text) = scalar_string(resources) {
        return Some(text);
    }
    let platform = first_string(resources, &[&["platform"]]);
    let preset = first_string(resources, &[&["preset"]]);
    match (platform, preset) {
        (Some(platform), Some(preset)) => Some(format!("{platform}/{preset}")),
        (Some(one), None) | (None, Some(one)) => Some(one),
        (None, None) => None,
    }
}

/// Extracts one record. Every field falls back on its own; nothing here fails.
pub fn normalize_instance(value: &Value) -> ComputeInstance {
    let or_na = |field: Option<String>| field.unwrap_or_else(|| NOT_AVAILABLE.to_string());
    ComputeInstance {
        id: or_na(first_string(value, &[&["id"], &["metadata", "id"]])),
        name: or_na(first_string(value, &[&["name"], &["metadata", "name"]])),
        status: extract_status(value),
        public_ip: or_na(extract_public_ip(value)),
        resources: or_na(extract_resources(value)),
        zone: or_na(first_string(
            value,
            &[&["zone"], &["zone_id"], &["metadata", "zone"], &["spec", "zone"]],
        )),
        created_at: or_na(first_string(
            value,
            &[&["created_at"], &["createdAt"], &["metadata", "created_at"]],
        )),
    }
}

fn normalize_list(items: &[Value]) -> Vec<ComputeInstance> {
    items
        .iter()
        .filter(|item| {
            let keep = item.is_object();
            if !keep {
                tracing::warn!(item = %item, "skipping non-object instance entry");
            }
            keep
        })
        .map(normalize_instance)
        .collect()
}

fn looks_like_instance(value: &Value) -> bool {
    ["id", "metadata", "name", "status"]
        .iter()
        .any(|key| value.get(key).is_some())
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Accepts a bare array, `{"instances": [...]}`, `{"items": [...]}`, or a single instance object.
pub fn normalize_instances(value: &Value) -> Result<Vec<ComputeInstance>, DeskError> {
    match value {
        Value::Array(items) => Ok(normalize_list(items)),
        Value::Object(map) => {
            let wrapped = map.get("instances").or_else(|| map.get("items"));
            match wrapped {
                Some(Value::Array(items)) => Ok(normalize_list(items)),
                Some(Value::Null) => Ok(Vec::new()),
                Some(other) => Err(DeskError::UnexpectedResponseShape(format!(
                    "instance list is a {} rather than an array",
                    shape_name(other)
                ))),
                None if looks_like_instance(value) => Ok(vec![normalize_instance(value)]),
                None => Err(DeskError::UnexpectedResponseShape(
                    "object has neither 'instances' nor 'items' and does not describe an instance"
                        .to_string(),
                )),
            }
        }
        other => Err(DeskError::UnexpectedResponseShape(format!(
            "expected an array or object, got {}",
            shape_name(other)
        ))),
    }
}

pub fn parse_instances(text: &str) -> Result<Vec<ComputeInstance>, DeskError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value =
        serde_json::from_str(text).map_err(|err| DeskError::ResponseParse(err.to_string()))?;
    normalize_instances(&value)
}

pub fn instance_name(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", prefix, now.format("%Y%m%d-%H%M%S"))
}

pub struct ComputeProvisioner<'a, R: ProcessRunner> {
    runner: &'a R,
    compute: &'a ComputeConfig,
}

impl<'a, R: ProcessRunner> ComputeProvisioner<'a, R> {
    pub fn new(runner: &'a R, compute: &'a ComputeConfig) -> Self {
        Self { runner, compute }
    }

    fn run_cli(&self, args: &[String], capture_output: bool) -> Result<CommandOutput, DeskError> {
        let rendered = render_command(&self.compute.cli, args);
        tracing::debug!(command = %rendered, "running cloud cli");
        self.runner
            .run(&self.compute.cli, args, capture_output)
            .map_err(|err| DeskError::Provision(format!("failed to run command `{rendered}`: {err}")))
    }

    fn failure_message(&self, action: &str, output: &CommandOutput) -> String {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let mut message = format!("{action} failed with status {}", output.status_code);
        if !stderr.is_empty() {
            message = format!("{message}: {stderr}");
        }
        message
    }

    pub fn create_profile(&self, profile: &CloudProfile) -> Result<(), DeskError> {
        let args = vec![
            "profile".to_string(),
            "create".to_string(),
            "--profile".to_string(),
            profile.profile_name.clone(),
            "--endpoint".to_string(),
            self.compute.endpoint.clone(),
            "--federation-endpoint".to_string(),
            self.compute.federation_endpoint.clone(),
            "--parent-id".to_string(),
            profile.project_id.clone(),
        ];
        // interactive login, so the CLI owns the terminal
        let output = self.run_cli(&args, false)?;
        if !output.success() {
            return Err(DeskError::Provision(self.failure_message("profile create", &output)));
        }
        Ok(())
    }

    pub fn create_instance(&self, profile: &CloudProfile) -> Result<CreatedInstance, DeskError> {
        let name = instance_name(&self.compute.name_prefix, Utc::now());
        self.create_instance_named(profile, &name)
    }

    pub fn create_instance_named(
        &self,
        profile: &CloudProfile,
        name: &str,
    ) -> Result<CreatedInstance, DeskError> {
        let args = vec![
            "compute".to_string(),
            "instance".to_string(),
            "create".to_string(),
            "--profile".to_string(),
            profile.profile_name.clone(),
            "--parent-id".to_string(),
            profile.project_id.clone(),
            "--name".to_string(),
            name.to_string(),
            "--zone".to_string(),
            self.compute.zone.clone(),
            "--resources-platform".to_string(),
            self.compute.platform.clone(),
            "--resources-preset".to_string(),
            self.compute.preset.clone(),
            "--boot-disk-image".to_string(),
            self.compute.image.clone(),
            "--boot-disk-size-gibibytes".to_string(),
            self.compute.disk_size_gb.to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];
        tracing::info!(name = %name, zone = %self.compute.zone, "creating instance");
        let output = self.run_cli(&args, true)?;
        if !output.success() {
            return Err(DeskError::Provision(self.failure_message("instance create", &output)));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let id = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|value| {
                first_string(&value, &[&["resource_id"], &["id"], &["metadata", "id"]])
            });
        Ok(CreatedInstance {
            name: name.to_string(),
            id,
        })
    }

    /// A failed or empty listing yields no instances; only malformed JSON is an error.
    pub fn list_instances(&self, profile: &CloudProfile) -> Result<Vec<ComputeInstance>, DeskError> {
        let args = vec![
            "compute".to_string(),
            "instance".to_string(),
            "list".to_string(),
            "--profile".to_string(),
            profile.profile_name.clone(),
            "--parent-id".to_string(),
            profile.project_id.clone(),
            "--format".to_string(),
            "json".to_string(),
        ];
        let output = match self.run_cli(&args, true) {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(error = %err, "instance list could not run");
                return Ok(Vec::new());
            }
        };
        if !output.success() {
            tracing::warn!(
                message = %self.failure_message("instance list", &output),
                "treating failed instance list as empty"
            );
            return Ok(Vec::new());
        }
        parse_instances(&String::from_utf8_lossy(&output.stdout))
    }

    /// Stops the first running instance only.
    pub fn stop_instance(&self, profile: &CloudProfile) -> Result<StopComputeOutcome, DeskError> {
        self.stop_instance_with(profile, |_| Ok(true))
    }

    /// Like [`stop_instance`](Self::stop_instance), asking `confirm` before acting on the selected instance.
    pub fn stop_instance_with<F>(
        &self,
        profile: &CloudProfile,
        confirm: F,
    ) -> Result<StopComputeOutcome, DeskError>
    where
        F: FnOnce(&ComputeInstance) -> Result<bool, DeskError>,
    {
        let instances = self.list_instances(profile)?;
        let Some(target) = instances.iter().find(|instance| instance.is_running()) else {
            return Ok(StopComputeOutcome::NoneRunning);
        };
        if !confirm(target)? {
            return Ok(StopComputeOutcome::Declined {
                id: target.id.clone(),
            });
        }
        if target.id == NOT_AVAILABLE {
            return Err(DeskError::Provision(format!(
                "running instance '{}' has no id",
                target.name
            )));
        }
        let args = vec![
            "compute".to_string(),
            "instance".to_string(),
            "stop".to_string(),
            "--profile".to_string(),
            profile.profile_name.clone(),
            "--id".to_string(),
            target.id.clone(),
        ];
        tracing::info!(id = %target.id, name = %target.name, "stopping instance");
        let output = self.run_cli(&args, true)?;
        if !output.success() {
            return Err(DeskError::Provision(self.failure_message("instance stop", &output)));
        }
        Ok(StopComputeOutcome::Stopped {
            id: target.id.clone(),
            name: target.name.clone(),
        })
    }
}

pub fn render_instances(instances: &[ComputeInstance]) -> String {
    if instances.is_empty() {
        return "No compute instances found.\n".to_string();
    }
    let headers = ["ID", "NAME", "STATUS", "PUBLIC IP", "RESOURCES", "ZONE", "CREATED"];
    let rows: Vec<[&str; 7]> = instances
        .iter()
        .map(|i| {
            [
                i.id.as_str(),
                i.name.as_str(),
                i.status.as_str(),
                i.public_ip.as_str(),
                i.resources.as_str(),
                i.zone.as_str(),
                i.created_at.as_str(),
            ]
        })
        .collect();
    let mut widths = headers.map(|header| header.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }
    let format_row = |cells: &[&str; 7]| {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{cell:<width$}", width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut out = format_row(&headers);
    out.push('\n');
    for row in &rows {
        out.push_str(&format_row(row));
        out.push('\n');
    }
    out
}
