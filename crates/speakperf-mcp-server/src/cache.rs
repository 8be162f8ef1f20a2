use moka::sync::Cache;
use serde_json::Value;
use std::sync::Arc;

#[cfg(test)]
pub static COMPILE_CT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

pub type CompiledArgsSchema = Arc<jsonschema::JSONSchema>;

/// Compiled tool input schemas, keyed by tool name.
pub struct SchemaCache {
    schemas: Cache<String, CompiledArgsSchema>,
}

impl SchemaCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            schemas: Cache::new(max_entries),
        }
    }

    pub fn get_or_compile(&self, tool: &str, schema: &Value) -> Result<CompiledArgsSchema, String> {
        if let Some(s) = self.schemas.get(tool) {
            tracing::debug!(event = "cache_hit", key = %tool, cache = "args_schema");
            return Ok(s);
        }
        tracing::debug!(event = "cache_miss", key = %tool, cache = "args_schema");

        #[cfg(test)]
        COMPILE_CT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        // compile errors borrow the schema, so render them right away
        let compiled = jsonschema::JSONSchema::compile(schema).map_err(|e| e.to_string())?;
        let compiled = Arc::new(compiled);
        self.schemas.insert(tool.to_string(), compiled.clone());
        Ok(compiled)
    }
}
