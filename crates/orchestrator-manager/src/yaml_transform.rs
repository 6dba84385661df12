//! Multi-document YAML handling for deployment descriptions (§4.4 step 3-4).
//! Only the Manager ever parses this YAML; everywhere else it travels as an
//! opaque string (`Deployment.deployment_description`) or an opaque JSON
//! tree (`Bundle.description`) — see §9 "YAML descriptions".

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum YamlError {
    #[error("deployment description did not parse as YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// One document from the submitted multi-document YAML stream, decoded
/// just enough to drive the placement request and the grouping/transform
/// steps. Non-`Deployment` documents (ConfigMaps, PVs, ...) keep their
/// `group_id` too, since they ride along in the same Bundle as the
/// `Deployment` document in their group.
#[derive(Debug, Clone)]
pub struct YamlDoc {
    pub kind: String,
    pub name: Option<String>,
    pub group_id: Option<String>,
    pub body: Value,
}

/// A scheduling instruction returned by the ROT oracle:
/// `{yaml_element: "spec[.template[.spec]].<field>", value}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingInstruction {
    pub yaml_element: String,
    pub value: Value,
}

/// Parses a multi-document YAML stream preserving document order (§9).
pub fn parse_documents(input: &str) -> Result<Vec<YamlDoc>, YamlError> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let yaml_value = serde_yaml::Value::deserialize(document)?;
        if yaml_value.is_null() {
            continue;
        }
        let body: Value = serde_json::to_value(&yaml_value).unwrap_or(Value::Null);

        let kind = body.get("kind").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let name = body.pointer("/metadata/name").and_then(|v| v.as_str()).map(str::to_string);
        let group_id = body.pointer("/metadata/labels/group_id").and_then(|v| v.as_str()).map(str::to_string);

        docs.push(YamlDoc { kind, name, group_id, body });
    }
    Ok(docs)
}

/// `application_description` entries submitted to the ROT oracle: one per
/// `Deployment`-kind document, `{kind, name, replicas}`.
pub fn application_descriptions(docs: &[YamlDoc]) -> Vec<Value> {
    docs.iter()
        .filter(|d| d.kind == "Deployment")
        .map(|d| {
            let replicas = d.body.pointer("/spec/replicas").cloned().unwrap_or(Value::from(1));
            serde_json::json!({
                "kind": d.kind,
                "name": d.name,
                "replicas": replicas,
            })
        })
        .collect()
}

/// Groups every document by `metadata.labels.group_id`, preserving the
/// original stream order within each group. Documents without a
/// `group_id` label are dropped: they have no Bundle to join.
pub fn group_by_group_id(docs: &[YamlDoc]) -> HashMap<String, Vec<YamlDoc>> {
    let mut groups: HashMap<String, Vec<YamlDoc>> = HashMap::new();
    for doc in docs {
        if let Some(group_id) = &doc.group_id {
            groups.entry(group_id.clone()).or_default().push(doc.clone());
        }
    }
    groups
}

/// Injects the two required environment variables and the two required pod
/// labels into a `Deployment`-kind document's pod template, then applies
/// every scheduling instruction the oracle returned for this document's
/// name. Non-`Deployment` documents pass through untouched.
pub fn transform_deployment_doc(
    doc: &mut YamlDoc,
    cluster_uuid: &str,
    deployment_uuid: &str,
    group_id: &str,
    instructions: &[SchedulingInstruction],
) {
    if doc.kind != "Deployment" {
        return;
    }

    inject_env_vars(&mut doc.body, cluster_uuid, deployment_uuid);
    inject_pod_labels(&mut doc.body, deployment_uuid, group_id);

    for instruction in instructions {
        apply_scheduling_instruction(&mut doc.body, instruction);
    }
}

fn inject_env_vars(body: &mut Value, cluster_uuid: &str, deployment_uuid: &str) {
    let env_entries = [
        serde_json::json!({"name": "DEPLOYED_SERRANO_CLUSTER_UUID", "value": cluster_uuid}),
        serde_json::json!({"name": "SERRANO_DEPLOYMENT_UUID", "value": deployment_uuid}),
    ];

    if let Some(containers) = body.pointer_mut("/spec/template/spec/containers").and_then(|v| v.as_array_mut()) {
        for container in containers {
            let env = container.as_object_mut().map(|obj| obj.entry("env").or_insert_with(|| Value::Array(Vec::new())));
            if let Some(Value::Array(env)) = env {
                env.extend(env_entries.iter().cloned());
            }
        }
    }
}

fn inject_pod_labels(body: &mut Value, deployment_uuid: &str, group_id: &str) {
    if let Some(metadata) = body.pointer_mut("/spec/template/metadata") {
        if let Some(metadata_obj) = metadata.as_object_mut() {
            let labels = metadata_obj.entry("labels").or_insert_with(|| Value::Object(Map::new()));
            if let Some(labels_obj) = labels.as_object_mut() {
                labels_obj.insert("serrano_deployment_uuid".to_string(), Value::String(deployment_uuid.to_string()));
                labels_obj.insert("group_id".to_string(), Value::String(group_id.to_string()));
            }
        }
    }
}

/// Applies `value` at the path named by `yaml_element`, a dot-separated
/// path rooted at `spec` with optional bracketed segments
/// (`spec[.template[.spec]].nodeSelector`), creating intermediate objects
/// as needed.
fn apply_scheduling_instruction(body: &mut Value, instruction: &SchedulingInstruction) {
    let path = instruction.yaml_element.replace(['[', ']'], "");
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();

    let mut cursor = body;
    for segment in &segments[..segments.len().saturating_sub(1)] {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        cursor = cursor
            .as_object_mut()
            .unwrap()
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if let Some(last) = segments.last() {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        cursor.as_object_mut().unwrap().insert(last.to_string(), instruction.value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_DOC_YAML: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: svc
  labels:
    group_id: a
spec:
  replicas: 2
  template:
    metadata: {}
    spec:
      containers:
        - name: main
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: svc-config
  labels:
    group_id: a
data:
  key: value
";

    #[test]
    fn parses_multi_document_stream_in_order() {
        let docs = parse_documents(TWO_DOC_YAML).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].kind, "Deployment");
        assert_eq!(docs[1].kind, "ConfigMap");
        assert_eq!(docs[0].group_id.as_deref(), Some("a"));
    }

    #[test]
    fn application_descriptions_only_lists_deployment_kind_docs() {
        let docs = parse_documents(TWO_DOC_YAML).unwrap();
        let apps = application_descriptions(&docs);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0]["name"], "svc");
    }

    #[test]
    fn grouping_preserves_order_within_a_group() {
        let docs = parse_documents(TWO_DOC_YAML).unwrap();
        let groups = group_by_group_id(&docs);
        let group_a = &groups["a"];
        assert_eq!(group_a.len(), 2);
        assert_eq!(group_a[0].kind, "Deployment");
    }

    #[test]
    fn transform_injects_env_vars_and_labels_and_applies_instructions() {
        let docs = parse_documents(TWO_DOC_YAML).unwrap();
        let mut deployment_doc = docs[0].clone();

        let instructions = vec![SchedulingInstruction {
            yaml_element: "spec.template[.spec].nodeSelector".to_string(),
            value: serde_json::json!({"disk": "ssd"}),
        }];

        transform_deployment_doc(&mut deployment_doc, "c1", "dep-1", "a", &instructions);

        let env = deployment_doc.body.pointer("/spec/template/spec/containers/0/env").unwrap().as_array().unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env[1]["value"], "dep-1");

        let labels = deployment_doc.body.pointer("/spec/template/metadata/labels").unwrap();
        assert_eq!(labels["serrano_deployment_uuid"], "dep-1");
        assert_eq!(labels["group_id"], "a");

        let node_selector = deployment_doc.body.pointer("/spec/template/spec/nodeSelector").unwrap();
        assert_eq!(node_selector["disk"], "ssd");
    }

    #[test]
    fn non_deployment_docs_are_untouched_by_transform() {
        let docs = parse_documents(TWO_DOC_YAML).unwrap();
        let mut config_map_doc = docs[1].clone();
        let before = config_map_doc.body.clone();
        transform_deployment_doc(&mut config_map_doc, "c1", "dep-1", "a", &[]);
        assert_eq!(config_map_doc.body, before);
    }
}
