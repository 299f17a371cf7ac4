//! Patching of generated multi-document kubeadm config.
//!
//! Merge patches (RFC 7386) and JSON patches (RFC 6902) each target the
//! documents whose `kind` matches, and whose `apiVersion` matches when the
//! patch names one. A patch that matches no document is an error.

use crate::CoreError;
use kindling_config::PatchJson6902;
use serde::Deserialize;
use serde_json::{Map, Value};

/// One layer of patches, cluster-wide or for a single node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeadmPatches {
    pub merge: Vec<String>,
    pub json6902: Vec<PatchJson6902>,
}

impl KubeadmPatches {
    pub fn is_empty(&self) -> bool {
        self.merge.is_empty() && self.json6902.is_empty()
    }
}

fn patch_error(msg: impl Into<String>) -> CoreError {
    CoreError::Patch(msg.into())
}

fn field<'a>(doc: &'a Value, key: &str) -> &'a str {
    doc.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn targets(doc: &Value, kind: &str, api_version: &str) -> bool {
    field(doc, "kind") == kind && (api_version.is_empty() || field(doc, "apiVersion") == api_version)
}

/// Apply every merge patch, then every JSON patch, in order.
pub fn apply(docs: &mut [Value], patches: &KubeadmPatches) -> Result<(), CoreError> {
    for raw in &patches.merge {
        let patch: Value = serde_yaml::from_str(raw)
            .map_err(|e| patch_error(format!("invalid merge patch: {e}")))?;
        let kind = field(&patch, "kind");
        if kind.is_empty() {
            return Err(patch_error("merge patch does not set kind"));
        }
        let api_version = field(&patch, "apiVersion");

        let mut matched = false;
        for doc in docs.iter_mut().filter(|d| targets(d, kind, api_version)) {
            merge(doc, &patch);
            matched = true;
        }
        if !matched {
            return Err(patch_error(format!(
                "no generated document matches merge patch for {kind}"
            )));
        }
    }

    for patch in &patches.json6902 {
        let ops: Vec<Operation> = serde_yaml::from_str(&patch.patch)
            .map_err(|e| patch_error(format!("invalid JSON 6902 patch for {}: {e}", patch.kind)))?;
        let api_version = patch.api_version();

        let mut matched = false;
        for doc in docs
            .iter_mut()
            .filter(|d| targets(d, &patch.kind, &api_version))
        {
            // Operations apply all-or-nothing per document.
            let mut patched = doc.clone();
            for op in &ops {
                op.apply(&mut patched)?;
            }
            *doc = patched;
            matched = true;
        }
        if !matched {
            return Err(patch_error(format!(
                "no generated document matches JSON 6902 patch for {api_version} {}",
                patch.kind
            )));
        }
    }
    Ok(())
}

/// RFC 7386 merge: objects merge recursively, `null` deletes, anything
/// else replaces.
pub fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(entries) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in entries {
            if value.is_null() {
                map.remove(key);
            } else {
                merge(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Operation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

impl Operation {
    fn apply(&self, doc: &mut Value) -> Result<(), CoreError> {
        match self {
            Operation::Add { path, value } => add(doc, path, value.clone()),
            Operation::Remove { path } => remove(doc, path).map(drop),
            Operation::Replace { path, value } => {
                let slot = doc
                    .pointer_mut(path)
                    .ok_or_else(|| patch_error(format!("replace: no value at {path}")))?;
                *slot = value.clone();
                Ok(())
            }
            Operation::Move { from, path } => {
                let value = remove(doc, from)?;
                add(doc, path, value)
            }
            Operation::Copy { from, path } => {
                let value = doc
                    .pointer(from)
                    .cloned()
                    .ok_or_else(|| patch_error(format!("copy: no value at {from}")))?;
                add(doc, path, value)
            }
            Operation::Test { path, value } => match doc.pointer(path) {
                Some(found) if found == value => Ok(()),
                _ => Err(patch_error(format!("test failed at {path}"))),
            },
        }
    }
}

/// Split a JSON pointer into its parent pointer and unescaped last token.
fn split_pointer(path: &str) -> Result<(&str, String), CoreError> {
    let (parent, last) = path
        .rsplit_once('/')
        .ok_or_else(|| patch_error(format!("invalid JSON pointer '{path}'")))?;
    Ok((parent, last.replace("~1", "/").replace("~0", "~")))
}

fn array_index(token: &str, len: usize, path: &str) -> Result<usize, CoreError> {
    token
        .parse::<usize>()
        .ok()
        .filter(|&i| i <= len)
        .ok_or_else(|| patch_error(format!("array index out of range at {path}")))
}

fn add(doc: &mut Value, path: &str, value: Value) -> Result<(), CoreError> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, token) = split_pointer(path)?;
    match doc.pointer_mut(parent) {
        Some(Value::Object(map)) => {
            map.insert(token, value);
            Ok(())
        }
        Some(Value::Array(items)) if token == "-" => {
            items.push(value);
            Ok(())
        }
        Some(Value::Array(items)) => {
            let index = array_index(&token, items.len(), path)?;
            items.insert(index, value);
            Ok(())
        }
        _ => Err(patch_error(format!("add: no container at {parent}"))),
    }
}

fn remove(doc: &mut Value, path: &str) -> Result<Value, CoreError> {
    let (parent, token) = split_pointer(path)?;
    let removed = match doc.pointer_mut(parent) {
        Some(Value::Object(map)) => map.remove(&token),
        Some(Value::Array(items)) => {
            let index = array_index(&token, items.len(), path)?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    };
    removed.ok_or_else(|| patch_error(format!("remove: no value at {path}")))
}
