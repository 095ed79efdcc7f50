//! Schema discovery, compilation and validation.

use jsonschema::{Draft, Resource, Validator};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::SchemaError;

const ENVELOPE_FILE: &str = "event_envelope.v1.schema.json";

/// Outcome of validating one instance against one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub ok: bool,
    pub error: Option<String>,
    pub schema_id: Option<String>,
}

impl Validation {
    fn passed(schema_id: Option<String>) -> Self {
        Self {
            ok: true,
            error: None,
            schema_id,
        }
    }

    fn failed(error: String, schema_id: Option<String>) -> Self {
        Self {
            ok: false,
            error: Some(error),
            schema_id,
        }
    }
}

struct Compiled {
    validator: Validator,
    schema_id: Option<String>,
}

/// Loaded and compiled schema set.
///
/// Holds the envelope validator, one payload validator per event type, and
/// the raw object schemas by `$id` for `$ref` resolution.
pub struct SchemaRegistry {
    envelope: Compiled,
    payloads: HashMap<String, Compiled>,
    objects: HashMap<String, Value>,
}

impl SchemaRegistry {
    /// Load all schemas under `base_dir`.
    ///
    /// When `base_dir` does not exist, falls back to the `SCHEMA_BASE_DIR`
    /// environment variable and then to the schemas bundled with the crate.
    pub fn load(base_dir: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let base = resolve_base_dir(base_dir.as_ref())?;
        debug!("loading schemas from {}", base.display());

        let objects = load_objects(&base.join("objects"))?;

        let envelope_value = read_schema(&base.join("envelope").join(ENVELOPE_FILE))?;
        let envelope = compile(&envelope_value, &objects)?;

        let mut payloads = HashMap::new();
        let events_dir = base.join("events");
        let mut entries: Vec<PathBuf> = fs::read_dir(&events_dir)
            .map_err(|source| SchemaError::Io {
                path: events_dir.clone(),
                source,
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        entries.sort();

        for path in entries {
            let schema = read_schema(&path)?;
            let event_type = schema
                .get("x_event_type")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::MissingEventType(path.clone()))?
                .to_string();
            if payloads.contains_key(&event_type) {
                return Err(SchemaError::DuplicateEventType(event_type));
            }
            payloads.insert(event_type, compile(&schema, &objects)?);
        }

        Ok(Self {
            envelope,
            payloads,
            objects,
        })
    }

    /// Validate the outer envelope shape.
    pub fn validate_envelope(&self, envelope: &Value) -> Validation {
        run(&self.envelope, envelope)
    }

    /// Validate a payload against the schema keyed by its event type.
    pub fn validate_payload(&self, event_type: &str, payload: &Value) -> Validation {
        match self.payloads.get(event_type) {
            Some(compiled) => run(compiled, payload),
            None => Validation::failed(format!("no schema for event_type={event_type}"), None),
        }
    }

    /// Whether a payload schema is registered for `event_type`.
    pub fn knows_event(&self, event_type: &str) -> bool {
        self.payloads.contains_key(event_type)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.payloads.keys().map(String::as_str).collect();
        types.sort();
        types
    }

    /// Raw object schemas by `$id`.
    pub fn objects_by_id(&self) -> &HashMap<String, Value> {
        &self.objects
    }
}

fn run(compiled: &Compiled, instance: &Value) -> Validation {
    match compiled.validator.validate(instance) {
        Ok(()) => Validation::passed(compiled.schema_id.clone()),
        Err(error) => {
            // Keep the offending location in the message; the DLQ reason is
            // often the only clue an operator gets.
            let location = error.instance_path().to_string();
            let message = if location.is_empty() {
                error.to_string()
            } else {
                format!("{error} (at {location})")
            };
            Validation::failed(message, compiled.schema_id.clone())
        }
    }
}

fn compile(schema: &Value, objects: &HashMap<String, Value>) -> Result<Compiled, SchemaError> {
    let schema_id = schema
        .get("$id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let label = schema_id.clone().unwrap_or_else(|| "<anonymous>".to_string());

    let mut options = jsonschema::options().with_draft(Draft::Draft202012);
    for (id, object) in objects {
        let resource = Resource::from_contents(object.clone());
        options = options.with_resource(id.clone(), resource);
    }
    let validator = options.build(schema).map_err(|e| SchemaError::Compile {
        schema_id: label,
        reason: e.to_string(),
    })?;
    Ok(Compiled {
        validator,
        schema_id,
    })
}

fn load_objects(dir: &Path) -> Result<HashMap<String, Value>, SchemaError> {
    let mut objects = HashMap::new();
    if !dir.exists() {
        return Ok(objects);
    }
    let entries = fs::read_dir(dir).map_err(|source| SchemaError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.extension().map(|ext| ext == "json").unwrap_or(false) {
            let schema = read_schema(&path)?;
            let id = schema
                .get("$id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    path.file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });
            objects.insert(id, schema);
        }
    }
    Ok(objects)
}

fn read_schema(path: &Path) -> Result<Value, SchemaError> {
    let raw = fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SchemaError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_base_dir(requested: &Path) -> Result<PathBuf, SchemaError> {
    if requested.exists() {
        return Ok(requested.to_path_buf());
    }
    if let Ok(env_dir) = std::env::var("SCHEMA_BASE_DIR") {
        let candidate = PathBuf::from(env_dir);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    let bundled = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas");
    if bundled.exists() {
        return Ok(bundled);
    }
    Err(SchemaError::BaseDirNotFound(requested.to_path_buf()))
}
