//! Spec-to-DDL translation
//!
//! Fixed translation rule, version 1: each spec entry becomes one column. The
//! entry key is the column name and must match `[a-z_][a-z0-9_]{0,62}` as
//! written (uppercase is rejected, not folded). The entry value is a
//! case-insensitive type token from a closed allowlist. Anything outside the
//! rule is an `InvalidSpec` error; the rule is total and deterministic over
//! its accepted inputs, and columns are always emitted in key order.
//!
//! Table names come from object metadata, so they follow the Kubernetes
//! DNS-1123 label grammar (`[a-z0-9]([-a-z0-9]*[a-z0-9])?`, at most 63
//! characters). Every identifier is double-quoted in emitted DDL; nothing from
//! the resource ever reaches a statement unvalidated or unquoted.

use crate::error::Error;
use std::collections::BTreeMap;
use std::fmt;

const MAX_IDENT_LEN: usize = 63;

/// A validated table name, safe to interpolate (quoted) into DDL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Validate a resource name as a table identifier.
    pub fn new(name: &str) -> Result<Self, Error> {
        if name.is_empty() {
            return Err(Error::InvalidSpec("table name is empty".into()));
        }
        if name.len() > MAX_IDENT_LEN {
            return Err(Error::InvalidSpec(format!(
                "table name '{name}' exceeds {MAX_IDENT_LEN} characters"
            )));
        }
        let valid = name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !name.starts_with('-')
            && !name.ends_with('-');
        if !valid {
            return Err(Error::InvalidSpec(format!(
                "table name '{name}' is not a valid DNS-1123 label"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for use in statements.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single translated column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: &'static str,
}

/// A fully validated table definition ready for DDL generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: TableName,
    pub columns: Vec<ColumnDef>,
}

impl TableSpec {
    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.name.quoted())
    }

    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|col| format!("\"{}\" {}", col.name, col.sql_type))
            .collect();
        format!("CREATE TABLE {} ({})", self.name.quoted(), columns.join(", "))
    }
}

/// Map a spec value to its PostgreSQL type. Tokens are matched
/// case-insensitively; the output set is fixed per rule version.
fn column_type(token: &str) -> Option<&'static str> {
    let sql_type = match token.trim().to_ascii_lowercase().as_str() {
        "int" | "integer" => "INTEGER",
        "bigint" => "BIGINT",
        "smallint" => "SMALLINT",
        "text" | "string" => "TEXT",
        "varchar" => "VARCHAR",
        "bool" | "boolean" => "BOOLEAN",
        "real" => "REAL",
        "double" => "DOUBLE PRECISION",
        "numeric" | "decimal" => "NUMERIC",
        "date" => "DATE",
        "timestamp" => "TIMESTAMP",
        "timestamptz" => "TIMESTAMPTZ",
        "uuid" => "UUID",
        "json" => "JSON",
        "jsonb" => "JSONB",
        "bytea" => "BYTEA",
        _ => return None,
    };
    Some(sql_type)
}

fn validate_column_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidSpec("column name is empty".into()));
    }
    if name.len() > MAX_IDENT_LEN {
        return Err(Error::InvalidSpec(format!(
            "column name '{name}' exceeds {MAX_IDENT_LEN} characters"
        )));
    }
    let mut chars = name.chars();
    let head_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !head_ok || !tail_ok {
        return Err(Error::InvalidSpec(format!(
            "column name '{name}' must match [a-z_][a-z0-9_]*"
        )));
    }
    Ok(())
}

/// Translate a resource name plus its declared columns into a table
/// definition. Validation happens here, before any statement is issued, so an
/// untranslatable spec never destroys an existing table.
pub fn translate(name: &str, columns: &BTreeMap<String, String>) -> Result<TableSpec, Error> {
    let table = TableName::new(name)?;
    if columns.is_empty() {
        return Err(Error::InvalidSpec(format!(
            "table '{table}' declares no columns"
        )));
    }
    let mut defs = Vec::with_capacity(columns.len());
    for (col_name, token) in columns {
        validate_column_name(col_name)?;
        let sql_type = column_type(token).ok_or_else(|| {
            Error::InvalidSpec(format!(
                "column '{col_name}' has unsupported type '{token}'"
            ))
        })?;
        defs.push(ColumnDef {
            name: col_name.clone(),
            sql_type,
        });
    }
    Ok(TableSpec {
        name: table,
        columns: defs,
    })
}
