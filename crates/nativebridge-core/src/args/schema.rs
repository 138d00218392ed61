//! Ordered argument schemas.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use nativebridge_extension_sdk::{ArgKind, ArgSpec};

use super::coerce::Coerced;

/// Extra check run against a coerced, non-null value.
pub type Predicate = Arc<dyn Fn(&Coerced) -> bool + Send + Sync>;

/// One schema entry: a declaration plus an optional custom predicate.
#[derive(Clone)]
pub struct SchemaEntry {
    pub spec: ArgSpec,
    pub predicate: Option<Predicate>,
}

impl fmt::Debug for SchemaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaEntry")
            .field("spec", &self.spec)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// The accepted inputs of one call, in positional order.
#[derive(Debug, Clone, Default)]
pub struct ArgumentSchema {
    entries: Vec<SchemaEntry>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.entries.push(SchemaEntry {
            spec,
            predicate: None,
        });
        self
    }

    /// Append an argument guarded by `predicate`.
    pub fn arg_with<F>(mut self, spec: ArgSpec, predicate: F) -> Self
    where
        F: Fn(&Coerced) -> bool + Send + Sync + 'static,
    {
        self.entries.push(SchemaEntry {
            spec,
            predicate: Some(Arc::new(predicate)),
        });
        self
    }

    /// Attach `predicate` to the argument called `name`, replacing any
    /// existing one. Returns `false` if there is no such argument.
    pub fn set_predicate(&mut self, name: &str, predicate: Predicate) -> bool {
        match self.entries.iter_mut().find(|e| e.spec.name == name) {
            Some(entry) => {
                entry.predicate = Some(predicate);
                true
            }
            None => false,
        }
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the schema itself is well formed.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            let name = &entry.spec.name;
            if name.is_empty() {
                return Err("argument with an empty name".to_string());
            }
            if !seen.insert(name.as_str()) {
                return Err(format!("duplicate argument '{}'", name));
            }
            validate_kind(name, &entry.spec.kind)?;
        }
        Ok(())
    }
}

fn validate_kind(name: &str, kind: &ArgKind) -> Result<(), String> {
    match kind {
        ArgKind::Enum { values } if values.is_empty() => {
            Err(format!("enum argument '{}' allows no values", name))
        }
        ArgKind::Array {
            element: Some(element),
        } => validate_kind(name, element),
        ArgKind::Listener { callbacks } if callbacks.is_empty() => {
            Err(format!("listener argument '{}' declares no callbacks", name))
        }
        _ => Ok(()),
    }
}

impl From<Vec<ArgSpec>> for ArgumentSchema {
    fn from(specs: Vec<ArgSpec>) -> Self {
        specs.into_iter().fold(Self::new(), Self::arg)
    }
}

impl From<&[ArgSpec]> for ArgumentSchema {
    fn from(specs: &[ArgSpec]) -> Self {
        specs.iter().cloned().fold(Self::new(), Self::arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_duplicates() {
        let schema = ArgumentSchema::new()
            .arg(ArgSpec::new("x", ArgKind::Double))
            .arg(ArgSpec::new("x", ArgKind::String));
        assert_eq!(schema.validate().unwrap_err(), "duplicate argument 'x'");
    }

    #[test]
    fn test_validate_rejects_empty_enum() {
        let schema = ArgumentSchema::from(vec![ArgSpec::new(
            "mode",
            ArgKind::array_of(ArgKind::Enum { values: vec![] }),
        )]);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_from_specs_keeps_order() {
        let specs = vec![
            ArgSpec::new("a", ArgKind::Boolean),
            ArgSpec::new("b", ArgKind::Long).optional(),
        ];
        let schema = ArgumentSchema::from(specs.as_slice());
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.entries()[1].spec.name, "b");
        assert!(schema.validate().is_ok());
    }
}
