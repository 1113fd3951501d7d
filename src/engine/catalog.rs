//! Registry of node definitions, keyed by type string.
//!
//! The catalog is supplied wholesale when a graph is built; the engine only
//! reads declared ports, schema and hooks from it. Cloning is cheap since
//! definitions are shared behind `Arc`.

use crate::engine::error::NodeError;
use crate::engine::node::{NodeContext, NodeDefinition};
use crate::engine::port::{ConfigField, PortDescriptor};
use crate::engine::value::ValueMap;
use crate::error::ResultExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Set of registered node definitions.
#[derive(Clone, Default)]
pub struct Catalog {
    definitions: IndexMap<String, Arc<dyn NodeDefinition>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. A later registration of the same type wins.
    pub fn register(&mut self, definition: impl NodeDefinition + 'static) -> &mut Self {
        self.register_arc(Arc::new(definition))
    }

    pub fn register_arc(&mut self, definition: Arc<dyn NodeDefinition>) -> &mut Self {
        let node_type = definition.node_type().to_string();
        if self.definitions.insert(node_type.clone(), definition).is_some() {
            tracing::warn!("Node definition '{}' registered twice; keeping the latest", node_type);
        }
        self
    }

    pub fn get(&self, node_type: &str) -> Option<&Arc<dyn NodeDefinition>> {
        self.definitions.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.definitions.contains_key(node_type)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Registered type strings in registration order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("types", &self.definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Port-only description of a node type, as exchanged with the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub inputs: Vec<PortDescriptor>,
    #[serde(default)]
    pub outputs: Vec<PortDescriptor>,
    #[serde(default)]
    pub config: Vec<ConfigField>,
}

/// Inert definition built from a [`NodeSchema`].
///
/// Enough to load, compile and partition a graph offline; `process` yields no
/// outputs and there are no effect hooks.
#[derive(Debug, Clone)]
pub struct SchemaDefinition {
    schema: NodeSchema,
}

impl SchemaDefinition {
    pub fn new(schema: NodeSchema) -> Self {
        Self { schema }
    }
}

impl NodeDefinition for SchemaDefinition {
    fn node_type(&self) -> &str {
        &self.schema.node_type
    }

    fn inputs(&self) -> &[PortDescriptor] {
        &self.schema.inputs
    }

    fn outputs(&self) -> &[PortDescriptor] {
        &self.schema.outputs
    }

    fn config_schema(&self) -> &[ConfigField] {
        &self.schema.config
    }

    fn process(
        &self,
        _inputs: &ValueMap,
        _config: &ValueMap,
        _ctx: &NodeContext,
    ) -> Result<ValueMap, NodeError> {
        Ok(ValueMap::new())
    }
}

impl Catalog {
    /// Build a catalog of inert definitions from port schemas.
    pub fn from_schemas(schemas: impl IntoIterator<Item = NodeSchema>) -> Self {
        let mut catalog = Catalog::new();
        for schema in schemas {
            catalog.register(SchemaDefinition::new(schema));
        }
        catalog
    }

    /// Read a JSON array of [`NodeSchema`]s and build an inert catalog.
    pub fn from_schema_file(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file {:?}", path))?;
        let schemas: Vec<NodeSchema> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse schema file {:?}", path))?;
        Ok(Self::from_schemas(schemas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::port::PortType;

    fn schema(node_type: &str) -> NodeSchema {
        NodeSchema {
            node_type: node_type.to_string(),
            inputs: vec![PortDescriptor::compute("in", PortType::Number)],
            outputs: vec![PortDescriptor::compute("out", PortType::Number)],
            config: Vec::new(),
        }
    }

    #[test]
    fn test_catalog_from_schemas_preserves_order() {
        let catalog = Catalog::from_schemas(vec![schema("b"), schema("a")]);
        assert_eq!(catalog.types().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(catalog.contains("a"));
        assert!(!catalog.contains("c"));
    }

    #[test]
    fn test_schema_definition_is_inert() {
        let def = SchemaDefinition::new(schema("math"));
        let id = crate::engine::id::NodeId::from("n");
        let ctx = NodeContext {
            node_id: &id,
            tick: 0,
            time_ms: 0.0,
            dt_ms: 0.0,
        };
        assert!(def.process(&ValueMap::new(), &ValueMap::new(), &ctx).unwrap().is_empty());
        assert!(def.sink().is_none());
    }

    #[test]
    fn test_schema_json() {
        let json = r#"[{"type":"flashlight","inputs":[{"id":"cmd","type":"command","kind":"sink"}]}]"#;
        let schemas: Vec<NodeSchema> = serde_json::from_str(json).unwrap();
        let catalog = Catalog::from_schemas(schemas);
        let def = catalog.get("flashlight").unwrap();
        assert!(def.has_sink_inputs());
        assert!(def.outputs().is_empty());
    }

    #[test]
    fn test_from_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, r#"[{"type":"math"}]"#).unwrap();
        assert!(Catalog::from_schema_file(&path).unwrap().contains("math"));

        let err = Catalog::from_schema_file(dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().starts_with("Failed to read schema file"));
    }
}
