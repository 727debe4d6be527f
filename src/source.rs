//! Source definitions and their providers.
//!
//! A source definition is a `typefig.yaml` file that declares a schema and a
//! config value, either as a single pair or as an ordered list of fragments
//! that are deep-merged left-to-right. An optional `override:` section is
//! merged onto the final config value only.
//!
//! Definitions are never cached: the provider re-reads and re-parses the
//! file from scratch on every reload, so edits are observed without
//! restarting the process.

use crate::error::{ContractError, CycleError, LoadError};
use crate::merge::{merge_schemas, merge_values};
use crate::schema::Schema;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Identifies one discovered source definition for the lifetime of the run.
pub type SourceId = usize;

/// The loaded (schema, config) pair after fragment merging.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub schema: Schema,
    pub config: Value,
}

/// Capability for producing a fresh [`Definition`] on demand.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Produce a fresh definition, discarding any previously loaded state.
    async fn reload(&self) -> Result<Definition, CycleError>;
}

/// One discovered source definition.
pub struct ConfigSource {
    pub id: SourceId,
    pub path: PathBuf,
    provider: Box<dyn SourceProvider>,
}

impl ConfigSource {
    /// A source backed by a definition file on disk.
    pub fn from_file(id: SourceId, path: PathBuf) -> Self {
        let provider = Box::new(FileProvider::new(path.clone()));
        Self { id, path, provider }
    }

    /// A source backed by an arbitrary provider.
    pub fn with_provider(id: SourceId, path: PathBuf, provider: Box<dyn SourceProvider>) -> Self {
        Self { id, path, provider }
    }

    /// Reload the definition from scratch.
    pub async fn load(&self) -> Result<Definition, CycleError> {
        self.provider.reload().await
    }
}

impl std::fmt::Debug for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSource")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Provider that re-reads a definition file on every reload.
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SourceProvider for FileProvider {
    async fn reload(&self) -> Result<Definition, CycleError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => {
                return Err(LoadError::NotFound(self.path.clone()).into());
            }
            Err(source) => {
                return Err(LoadError::Io {
                    path: self.path.clone(),
                    source,
                }
                .into());
            }
        };
        parse_definition(&self.path, &raw)
    }
}

/// Raw serde shape of a definition file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefinition {
    #[serde(default)]
    schema: Option<Schema>,
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    fragments: Vec<RawFragment>,
    #[serde(default, rename = "override")]
    override_config: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFragment {
    #[serde(default)]
    schema: Option<Schema>,
    #[serde(default)]
    config: Option<Value>,
}

/// Parse a definition file's contents into a merged [`Definition`].
///
/// The inline `schema:`/`config:` pair, when present, acts as the leading
/// fragment; `fragments:` follow in declaration order, later fragments
/// winning on conflicts. Every fragment must carry both halves.
pub fn parse_definition(path: &Path, raw: &str) -> Result<Definition, CycleError> {
    let raw: RawDefinition =
        serde_yaml::from_str(raw).map_err(|source| ContractError::Parse {
            path: path.to_path_buf(),
            reason: source.to_string(),
        })?;

    let mut fragments: Vec<(Option<Schema>, Option<Value>)> = Vec::new();
    if raw.schema.is_some() || raw.config.is_some() {
        fragments.push((raw.schema, raw.config));
    }
    for fragment in raw.fragments {
        fragments.push((fragment.schema, fragment.config));
    }

    let mut fragments = fragments.into_iter().enumerate();
    let Some(first) = fragments.next() else {
        return Err(ContractError::Empty {
            path: path.to_path_buf(),
        }
        .into());
    };

    let mut definition = complete_fragment(path, first)?;
    for indexed in fragments {
        let incoming = complete_fragment(path, indexed)?;
        definition = Definition {
            schema: merge_schemas(definition.schema, incoming.schema),
            config: merge_values(definition.config, incoming.config),
        };
    }

    if let Some(override_config) = raw.override_config {
        definition.config = merge_values(definition.config, override_config);
    }

    Ok(definition)
}

fn complete_fragment(
    path: &Path,
    (index, (schema, config)): (usize, (Option<Schema>, Option<Value>)),
) -> Result<Definition, CycleError> {
    let schema = schema.ok_or_else(|| ContractError::MissingSchema {
        path: path.to_path_buf(),
        index,
    })?;
    let config = config.ok_or_else(|| ContractError::MissingConfig {
        path: path.to_path_buf(),
        index,
    })?;
    Ok(Definition { schema, config })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::UnknownKeys;
    use serde_json::json;

    fn parse(raw: &str) -> Result<Definition, CycleError> {
        parse_definition(Path::new("typefig.yaml"), raw)
    }

    #[test]
    fn parses_single_pair_form() {
        let definition = parse(
            r#"
schema:
  type: object
  fields:
    a.json:
      type: object
      fields:
        x: { type: number }
config:
  a.json: { x: 1 }
"#,
        )
        .unwrap();
        assert_eq!(definition.config, json!({"a.json": {"x": 1}}));
        assert!(definition.schema.is_object());
    }

    #[test]
    fn parses_policy_from_the_declarative_form() {
        let definition = parse(
            r#"
schema:
  type: object
  unknown_keys: passthrough
  fields: {}
config: {}
"#,
        )
        .unwrap();
        let Schema::Object(object) = definition.schema else {
            panic!("expected object schema");
        };
        assert_eq!(object.unknown_keys, UnknownKeys::Passthrough);
    }

    #[test]
    fn fragments_merge_left_to_right() {
        let definition = parse(
            r#"
fragments:
  - schema:
      type: object
      fields:
        a.json:
          type: object
          fields:
            x: { type: number }
    config:
      a.json: { x: 1 }
  - schema:
      type: object
      fields:
        a.json:
          type: object
          fields:
            y: { type: number }
    config:
      a.json: { y: 2 }
"#,
        )
        .unwrap();
        assert_eq!(definition.config, json!({"a.json": {"x": 1, "y": 2}}));
        let Schema::Object(root) = &definition.schema else {
            panic!("expected object schema");
        };
        let Some(Schema::Object(file)) = root.fields.get("a.json") else {
            panic!("expected object schema for a.json");
        };
        assert_eq!(file.fields.len(), 2);
    }

    #[test]
    fn inline_pair_leads_the_fragment_list() {
        let definition = parse(
            r#"
schema:
  type: object
  fields:
    a.json: { type: any }
config:
  a.json: { x: 1 }
fragments:
  - schema:
      type: object
      fields:
        a.json: { type: any }
    config:
      a.json: { x: 9 }
"#,
        )
        .unwrap();
        assert_eq!(definition.config, json!({"a.json": {"x": 9}}));
    }

    #[test]
    fn override_applies_to_config_only() {
        let definition = parse(
            r#"
schema:
  type: object
  fields:
    a.json:
      type: object
      unknown_keys: passthrough
      fields: {}
config:
  a.json: { x: 1, y: 2 }
override:
  a.json: { y: 3 }
"#,
        )
        .unwrap();
        assert_eq!(definition.config, json!({"a.json": {"x": 1, "y": 3}}));
    }

    #[test]
    fn empty_definition_is_a_contract_error() {
        let err = parse("{}").unwrap_err();
        assert!(matches!(
            err,
            CycleError::Contract(ContractError::Empty { .. })
        ));
    }

    #[test]
    fn fragment_missing_schema_is_a_contract_error() {
        let err = parse(
            r#"
config:
  a.json: { x: 1 }
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CycleError::Contract(ContractError::MissingSchema { index: 0, .. })
        ));
    }

    #[test]
    fn fragment_missing_config_is_a_contract_error() {
        let err = parse(
            r#"
fragments:
  - schema: { type: any }
    config: {}
  - schema: { type: any }
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CycleError::Contract(ContractError::MissingConfig { index: 1, .. })
        ));
    }

    #[test]
    fn unparseable_yaml_is_a_contract_error() {
        let err = parse(": not yaml : [").unwrap_err();
        assert!(matches!(
            err,
            CycleError::Contract(ContractError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn file_provider_reports_missing_file_as_load_error() {
        let provider = FileProvider::new(PathBuf::from("/nonexistent/typefig.yaml"));
        let err = provider.reload().await.unwrap_err();
        assert!(matches!(err, CycleError::Load(LoadError::NotFound(_))));
    }

    #[tokio::test]
    async fn file_provider_observes_edits_between_reloads() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("typefig.yaml");
        std::fs::write(
            &path,
            "schema: { type: any }\nconfig: { a.json: { x: 1 } }\n",
        )
        .unwrap();

        let provider = FileProvider::new(path.clone());
        let first = provider.reload().await.unwrap();
        assert_eq!(first.config, json!({"a.json": {"x": 1}}));

        std::fs::write(
            &path,
            "schema: { type: any }\nconfig: { a.json: { x: 2 } }\n",
        )
        .unwrap();
        let second = provider.reload().await.unwrap();
        assert_eq!(second.config, json!({"a.json": {"x": 2}}));
    }
}
