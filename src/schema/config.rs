//! The compiled schema root: row schema, index and column-group schema
//! sets, and the tuning knobs, loaded from and saved to the
//! human-readable `meta.json` the table directory carries.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::TableConfig;
use crate::error::{Error, Result};

use super::{ColumnMeta, ColumnType, Schema};

/// Insertion-ordered, name-indexed collection of schemas: all indexes of
/// a table, or all column groups of a table.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    schemas: Vec<Arc<Schema>>,
    by_name: HashMap<String, usize>,
    /// Total column count across members.
    pub flatten_column_num: usize,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a compiled schema. Member names must be unique.
    pub fn add(&mut self, schema: Arc<Schema>) -> Result<()> {
        debug_assert!(schema.is_compiled());
        if self.by_name.contains_key(&schema.name) {
            return Err(Error::InvalidSchema(format!(
                "duplicate schema '{}' in set",
                schema.name
            )));
        }
        self.by_name.insert(schema.name.clone(), self.schemas.len());
        self.flatten_column_num += schema.column_num();
        self.schemas.push(schema);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn get(&self, nth: usize) -> &Arc<Schema> {
        &self.schemas[nth]
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.iter()
    }
}

/// Maps one row column into the column group that materializes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColProject {
    pub colgroup_id: u32,
    pub sub_column_id: u32,
}

/// Raw JSON mirror of the schema config (`meta.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfigJson {
    #[serde(default = "default_class")]
    pub class: String,
    pub columns: Vec<ColumnJson>,
    #[serde(default)]
    pub indexes: Vec<IndexJson>,
    #[serde(default)]
    pub colgroups: Vec<ColgroupJson>,
    #[serde(default)]
    pub config: TableConfig,
}

fn default_class() -> String {
    crate::table::registry::SEGMENTED_TABLE_CLASS.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnJson {
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: String,
    #[serde(default)]
    pub length: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexJson {
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColgroupJson {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub updatable: bool,
}

/// The compiled root configuration of a table.
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    pub class: String,
    pub row_schema: Arc<Schema>,
    /// The subset of columns materialized in writable segments. Equal to
    /// the row schema when no updatable column groups are declared.
    pub wrt_schema: Arc<Schema>,
    pub index_schema_set: SchemaSet,
    pub colgroup_schema_set: SchemaSet,
    pub uniq_indices: Vec<usize>,
    pub mult_indices: Vec<usize>,
    pub updatable_colgroups: Vec<usize>,
    /// Parallel with the row schema: the column group materializing each
    /// column, when one is declared.
    pub col_project: Vec<Option<ColProject>>,
    pub config: TableConfig,
    /// Union of all unique-index columns, for duplicate diagnostics.
    pub uniq_index_fields: Option<Arc<Schema>>,
}

impl SchemaConfig {
    /// Compile a raw JSON config into the runtime form.
    pub fn from_json(raw: SchemaConfigJson) -> Result<Self> {
        let mut row = Schema::new("row");
        for col in &raw.columns {
            let ty = ColumnType::parse_str(&col.col_type)?;
            let meta = match ty {
                ColumnType::Fixed => {
                    let len = col.length.ok_or_else(|| {
                        Error::InvalidSchema(format!(
                            "fixed column '{}' missing 'length'",
                            col.name
                        ))
                    })?;
                    ColumnMeta::fixed(len)
                }
                _ => ColumnMeta::new(ty),
            };
            row.add_column(&col.name, meta)?;
        }
        row.compile(None)?;
        let row_schema = Arc::new(row);

        // Write schema: identity over the row schema. In-place updatable
        // column groups would thin it out, but the write path always
        // materializes the full row (see DESIGN.md).
        let mut wrt = Schema::new("wrt");
        for id in 0..row_schema.column_num() {
            wrt.add_column(row_schema.column_name(id), *row_schema.column_meta(id))?;
        }
        wrt.compile(Some(&row_schema))?;
        let wrt_schema = Arc::new(wrt);

        let mut index_schema_set = SchemaSet::new();
        let mut uniq_indices = Vec::new();
        let mut mult_indices = Vec::new();
        for (index_id, idx) in raw.indexes.iter().enumerate() {
            if idx.columns.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "index {index_id} declares no columns"
                )));
            }
            let mut s = Schema::new(idx.columns.join(","));
            for col_name in &idx.columns {
                let cid = row_schema.column_id(col_name).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "index column '{col_name}' not in row schema"
                    ))
                })?;
                s.add_column(col_name, *row_schema.column_meta(cid))?;
            }
            s.is_ordered = true;
            s.is_unique = idx.unique;
            s.compile(Some(&row_schema))?;
            index_schema_set.add(Arc::new(s))?;
            if idx.unique {
                uniq_indices.push(index_id);
            } else {
                mult_indices.push(index_id);
            }
        }

        let mut colgroup_schema_set = SchemaSet::new();
        let mut updatable_colgroups = Vec::new();
        let mut col_project = vec![None; row_schema.column_num()];
        for (cg_id, cg) in raw.colgroups.iter().enumerate() {
            if cg.columns.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "column group '{}' declares no columns",
                    cg.name
                )));
            }
            let mut s = Schema::new(cg.name.clone());
            for (sub_id, col_name) in cg.columns.iter().enumerate() {
                let cid = row_schema.column_id(col_name).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "colgroup column '{col_name}' not in row schema"
                    ))
                })?;
                if col_project[cid].is_some() {
                    return Err(Error::InvalidSchema(format!(
                        "column '{col_name}' appears in more than one column group"
                    )));
                }
                col_project[cid] = Some(ColProject {
                    colgroup_id: cg_id as u32,
                    sub_column_id: sub_id as u32,
                });
                s.add_column(col_name, *row_schema.column_meta(cid))?;
            }
            s.compile(Some(&row_schema))?;
            colgroup_schema_set.add(Arc::new(s))?;
            if cg.updatable {
                updatable_colgroups.push(cg_id);
            }
        }

        let uniq_index_fields = {
            let mut union = Schema::new("uniq-index-fields");
            let mut seen = std::collections::HashSet::new();
            for &uid in &uniq_indices {
                let s = index_schema_set.get(uid);
                for cid in 0..s.column_num() {
                    let name = s.column_name(cid);
                    if seen.insert(name.to_string()) {
                        union.add_column(name, *s.column_meta(cid))?;
                    }
                }
            }
            if seen.is_empty() {
                None
            } else {
                union.compile(Some(&row_schema))?;
                Some(Arc::new(union))
            }
        };

        Ok(Self {
            class: raw.class,
            row_schema,
            wrt_schema,
            index_schema_set,
            colgroup_schema_set,
            uniq_indices,
            mult_indices,
            updatable_colgroups,
            col_project,
            config: raw.config,
            uniq_index_fields,
        })
    }

    pub fn load_json_str(json: &str) -> Result<Self> {
        let raw: SchemaConfigJson = serde_json::from_str(json)?;
        Self::from_json(raw)
    }

    pub fn load_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::load_json_str(&text)
    }

    pub fn save_json_file(&self, path: &Path) -> Result<()> {
        let raw = self.to_json();
        let text = serde_json::to_string_pretty(&raw)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Regenerate the raw JSON mirror from the compiled config.
    pub fn to_json(&self) -> SchemaConfigJson {
        let columns = (0..self.row_schema.column_num())
            .map(|id| {
                let meta = self.row_schema.column_meta(id);
                ColumnJson {
                    name: self.row_schema.column_name(id).to_string(),
                    col_type: meta.col_type.as_str().to_string(),
                    length: (meta.col_type == ColumnType::Fixed).then_some(meta.fixed_len),
                }
            })
            .collect();
        let indexes = self
            .index_schema_set
            .iter()
            .map(|s| IndexJson {
                columns: (0..s.column_num())
                    .map(|i| s.column_name(i).to_string())
                    .collect(),
                unique: s.is_unique,
            })
            .collect();
        let colgroups = self
            .colgroup_schema_set
            .iter()
            .enumerate()
            .map(|(cg_id, s)| ColgroupJson {
                name: s.name.clone(),
                columns: (0..s.column_num())
                    .map(|i| s.column_name(i).to_string())
                    .collect(),
                updatable: self.updatable_colgroups.contains(&cg_id),
            })
            .collect();
        SchemaConfigJson {
            class: self.class.clone(),
            columns,
            indexes,
            colgroups,
            config: self.config.clone(),
        }
    }

    pub fn get_index_schema(&self, index_id: usize) -> &Arc<Schema> {
        self.index_schema_set.get(index_id)
    }

    pub fn get_index_num(&self) -> usize {
        self.index_schema_set.len()
    }

    pub fn get_index_id(&self, index_column_names: &str) -> Option<usize> {
        self.index_schema_set.find(index_column_names)
    }

    pub fn get_colgroup_schema(&self, colgroup_id: usize) -> &Arc<Schema> {
        self.colgroup_schema_set.get(colgroup_id)
    }

    pub fn get_colgroup_num(&self) -> usize {
        self.colgroup_schema_set.len()
    }

    pub fn get_colgroup_id(&self, colgroup_name: &str) -> Option<usize> {
        self.colgroup_schema_set.find(colgroup_name)
    }

    pub fn column_num(&self) -> usize {
        self.row_schema.column_num()
    }

    pub fn is_inplace_updatable_column(&self, column_id: usize) -> bool {
        match self.col_project[column_id] {
            Some(p) => self
                .updatable_colgroups
                .contains(&(p.colgroup_id as usize)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "columns": [
            {"name": "id", "type": "uint64"},
            {"name": "score", "type": "float64"},
            {"name": "name", "type": "strutf8"}
        ],
        "indexes": [
            {"columns": ["id"], "unique": true},
            {"columns": ["name"], "unique": false}
        ],
        "colgroups": [
            {"name": "scores", "columns": ["score"]}
        ],
        "config": {
            "max_writing_segment_size": 4096,
            "min_merge_seg_num": 2,
            "purge_delete_threshold": 0.5,
            "compressing_work_mem_size": 1048576
        }
    }"#;

    #[test]
    fn test_load_compile() {
        let cfg = SchemaConfig::load_json_str(SAMPLE).unwrap();
        assert_eq!(cfg.row_schema.column_num(), 3);
        assert_eq!(cfg.get_index_num(), 2);
        assert_eq!(cfg.uniq_indices, vec![0]);
        assert_eq!(cfg.mult_indices, vec![1]);
        assert_eq!(cfg.get_index_id("id"), Some(0));
        assert_eq!(cfg.get_index_id("name"), Some(1));
        assert!(cfg.get_index_schema(0).is_unique);
        assert!(!cfg.get_index_schema(1).is_unique);
        assert_eq!(cfg.config.max_writing_segment_size, 4096);

        // colgroup projection
        assert_eq!(cfg.get_colgroup_num(), 1);
        assert_eq!(
            cfg.col_project[1],
            Some(ColProject {
                colgroup_id: 0,
                sub_column_id: 0
            })
        );
        assert_eq!(cfg.col_project[0], None);

        // unique-index union
        let uniq = cfg.uniq_index_fields.as_ref().unwrap();
        assert_eq!(uniq.column_num(), 1);
        assert_eq!(uniq.column_name(0), "id");
    }

    #[test]
    fn test_json_roundtrip() {
        let cfg = SchemaConfig::load_json_str(SAMPLE).unwrap();
        let text = serde_json::to_string(&cfg.to_json()).unwrap();
        let again = SchemaConfig::load_json_str(&text).unwrap();
        assert_eq!(again.row_schema.column_num(), 3);
        assert_eq!(again.get_index_num(), 2);
        assert_eq!(again.config.min_merge_seg_num, 2);
    }

    #[test]
    fn test_unknown_index_column() {
        let bad = r#"{
            "columns": [{"name": "id", "type": "uint64"}],
            "indexes": [{"columns": ["nope"], "unique": true}]
        }"#;
        assert!(matches!(
            SchemaConfig::load_json_str(bad),
            Err(Error::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_unknown_column_type() {
        let bad = r#"{"columns": [{"name": "id", "type": "quux"}]}"#;
        assert!(matches!(
            SchemaConfig::load_json_str(bad),
            Err(Error::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_overlapping_colgroups_rejected() {
        let bad = r#"{
            "columns": [{"name": "a", "type": "uint32"}, {"name": "b", "type": "uint32"}],
            "colgroups": [
                {"name": "g1", "columns": ["a"]},
                {"name": "g2", "columns": ["a", "b"]}
            ]
        }"#;
        assert!(matches!(
            SchemaConfig::load_json_str(bad),
            Err(Error::InvalidSchema(_))
        ));
    }
}
