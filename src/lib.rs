//! ShaleDB: an embedded, schema-driven, column-aware storage engine.
//!
//! A [`table::Table`] is a single logical table backed by many on-disk
//! segments. Rows append into the one writable segment; background
//! workers freeze it into compact readonly segments, merge fragmented
//! runs, and purge logically deleted rows. Every declared index is kept
//! in sync on the write path and probed as a consistent union across
//! segments on the read path.
//!
//! # Example
//!
//! ```no_run
//! use shaledb::schema::config::SchemaConfig;
//! use shaledb::table::Table;
//!
//! # fn main() -> shaledb::error::Result<()> {
//! let schema = SchemaConfig::load_json_str(
//!     r#"{
//!         "columns": [
//!             {"name": "id", "type": "uint64"},
//!             {"name": "name", "type": "strutf8"}
//!         ],
//!         "indexes": [{"columns": ["id"], "unique": true}]
//!     }"#,
//! )?;
//! let table = Table::create(std::path::Path::new("/tmp/users"), schema)?;
//!
//! let row = table
//!     .row_schema()
//!     .combine_cols(&[&1u64.to_le_bytes(), b"alice"])?;
//! let gid = table.insert_row(&row)?;
//! assert_eq!(table.get_value(gid)?, row);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dirlock;
pub mod error;
pub mod index;
pub mod schema;
pub mod segment;
pub mod sortvec;
pub mod store;
pub mod table;
pub mod tasks;

pub use config::TableConfig;
pub use error::{Error, Result};
pub use schema::config::SchemaConfig;
pub use schema::{ColumnMeta, ColumnType, ColumnVec, Schema};
pub use sortvec::SortableStrVec;
pub use table::Table;
