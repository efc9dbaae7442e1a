//! Process-wide registry of table classes. The original engine populated
//! this from static constructors; here the built-in class registers on
//! first registry use and callers may add their own factories before
//! opening tables.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::schema::config::SchemaConfig;

use super::Table;

pub const SEGMENTED_TABLE_CLASS: &str = "SegmentedTable";

/// Constructors for one table class.
#[derive(Clone, Copy)]
pub struct TableFactory {
    pub create: fn(&Path, SchemaConfig) -> Result<Arc<Table>>,
    pub open: fn(&Path) -> Result<Arc<Table>>,
}

static REGISTRY: Lazy<RwLock<HashMap<String, TableFactory>>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(
        SEGMENTED_TABLE_CLASS.to_string(),
        TableFactory {
            create: Table::create,
            open: Table::open,
        },
    );
    RwLock::new(map)
});

pub fn register_table_class(name: &str, factory: TableFactory) {
    REGISTRY
        .write()
        .unwrap()
        .insert(name.to_string(), factory);
}

pub fn is_registered(name: &str) -> bool {
    REGISTRY.read().unwrap().contains_key(name)
}

fn lookup(name: &str) -> Result<TableFactory> {
    REGISTRY
        .read()
        .unwrap()
        .get(name)
        .copied()
        .ok_or_else(|| Error::InvalidSchema(format!("unknown table class '{name}'")))
}

/// Create a table of the named class in `dir`.
pub fn create_table(class: &str, dir: &Path, schema: SchemaConfig) -> Result<Arc<Table>> {
    (lookup(class)?.create)(dir, schema)
}

/// Open an existing table directory with the named class.
pub fn open_table(class: &str, dir: &Path) -> Result<Arc<Table>> {
    (lookup(class)?.open)(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registered() {
        assert!(is_registered(SEGMENTED_TABLE_CLASS));
        assert!(!is_registered("NoSuchClass"));
    }

    #[test]
    fn test_unknown_class_errors() {
        let err = lookup("NoSuchClass").map(|_| ()).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }
}
