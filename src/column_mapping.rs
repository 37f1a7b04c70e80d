//! Physical/logical column name indirection (spec §4.7).
//!
//! When `delta.columnMapping.mode` is set, every schema field carries a
//! `physicalName` distinct from its logical name. Readers rename physical
//! columns back to logical after decode; writers emit physical names to the
//! codec while the schema continues to publish logical names.

use std::collections::HashMap;

use crate::schema::StructType;
use crate::value::Row;

/// Column mapping mode (spec §4.7, §6 configuration properties).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnMappingMode {
    None,
    Name,
    Id,
}

impl ColumnMappingMode {
    pub fn from_config_value(value: Option<&str>) -> ColumnMappingMode {
        match value {
            Some("name") => ColumnMappingMode::Name,
            Some("id") => ColumnMappingMode::Id,
            _ => ColumnMappingMode::None,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != ColumnMappingMode::None
    }
}

/// A physical-name <-> logical-name mapping derived from a table schema.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapping {
    physical_to_logical: HashMap<String, String>,
}

impl ColumnMapping {
    /// Build the mapping from a schema's fields. Absent the column-mapping
    /// configuration, physical and logical names coincide (spec §4.7).
    pub fn from_schema(schema: &StructType, mode: ColumnMappingMode) -> ColumnMapping {
        let mut physical_to_logical = HashMap::new();
        for field in &schema.fields {
            let physical = if mode.is_enabled() {
                field.physical_name().to_string()
            } else {
                field.name.clone()
            };
            physical_to_logical.insert(physical, field.name.clone());
        }
        ColumnMapping { physical_to_logical }
    }

    /// Rename a decoded row's physical column keys back to logical names.
    /// Unmapped columns (not part of the schema) pass through unchanged.
    pub fn to_logical(&self, row: Row) -> Row {
        row.into_iter()
            .map(|(k, v)| {
                let logical = self.physical_to_logical.get(&k).cloned().unwrap_or(k);
                (logical, v)
            })
            .collect()
    }
}
