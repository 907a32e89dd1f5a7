//! Database specification and its resolved numbering.
//!
//! A [`DatabaseSpec`] names the files of a database, each file's primary
//! field and its secondary fields with their access method. Resolving it
//! into a [`Schema`] validates the names and assigns the numbers used in
//! persisted keys: tables from 1 and secondary fields from 1, both in
//! name order, so the numbering does not depend on declaration order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::storage::keys::{DELIMITER, FieldKeys, FileKeys};

/// Errors from specification validation and lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("specification names no files")]
    NoFiles,
    #[error("empty name in specification")]
    EmptyName,
    #[error("name {name:?} contains the key delimiter")]
    InvalidName { name: String },
    #[error("file {name:?} is specified more than once")]
    DuplicateFile { name: String },
    #[error("field {field:?} of file {file:?} is specified more than once")]
    DuplicateField { file: String, field: String },
    #[error("unknown file {name:?}")]
    UnknownFile { name: String },
    #[error("unknown field {field:?} in file {file:?}")]
    UnknownField { file: String, field: String },
}

/// How a secondary field is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMethod {
    /// Posting sets plus a B+tree over the values: exact, range, prefix and
    /// pattern queries.
    Ordered,
    /// Posting sets only: exact-value queries.
    Unordered,
}

/// One secondary field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub access: AccessMethod,
}

/// One file: a primary field holding records and its indexed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub name: String,
    pub primary: String,
    pub fields: Vec<FieldSpec>,
}

impl FileSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, primary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: primary.into(),
            fields: Vec::new(),
        }
    }

    /// Add an ordered secondary field.
    #[must_use]
    pub fn ordered(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            access: AccessMethod::Ordered,
        });
        self
    }

    /// Add an unordered secondary field.
    #[must_use]
    pub fn unordered(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            access: AccessMethod::Unordered,
        });
        self
    }
}

/// The files of a database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub files: Vec<FileSpec>,
}

impl DatabaseSpec {
    #[must_use]
    pub const fn new() -> Self {
        Self { files: Vec::new() }
    }

    #[must_use]
    pub fn file(mut self, file: FileSpec) -> Self {
        self.files.push(file);
        self
    }

    /// The same specification with files and fields in name order.
    ///
    /// Two specifications describe the same database exactly when their
    /// normalized forms are equal.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut files = self.files.clone();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        for file in &mut files {
            file.fields.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Self { files }
    }
}

/// A resolved secondary field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub number: usize,
    pub access: AccessMethod,
}

/// A resolved file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSchema {
    pub name: String,
    pub table: usize,
    pub primary: String,
    pub fields: BTreeMap<String, FieldSchema>,
}

impl FileSchema {
    #[must_use]
    pub fn keys(&self) -> FileKeys {
        FileKeys::new(self.table)
    }

    /// Look up a secondary field.
    pub fn field(&self, name: &str) -> Result<&FieldSchema, SchemaError> {
        self.fields.get(name).ok_or_else(|| SchemaError::UnknownField {
            file: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Keys of a secondary field.
    pub fn field_keys(&self, name: &str) -> Result<FieldKeys, SchemaError> {
        Ok(self.keys().field(self.field(name)?.number))
    }
}

/// A validated specification with table and field numbers assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    spec: DatabaseSpec,
    files: BTreeMap<String, FileSchema>,
}

impl Schema {
    /// Validate `spec` and number its tables and fields.
    pub fn resolve(spec: &DatabaseSpec) -> Result<Self, SchemaError> {
        if spec.files.is_empty() {
            return Err(SchemaError::NoFiles);
        }
        let spec = spec.normalized();
        let mut files = BTreeMap::new();
        for (i, file) in spec.files.iter().enumerate() {
            check_name(&file.name)?;
            check_name(&file.primary)?;
            if files.contains_key(&file.name) {
                return Err(SchemaError::DuplicateFile {
                    name: file.name.clone(),
                });
            }

            let mut seen = BTreeSet::from([file.primary.as_str()]);
            let mut fields = BTreeMap::new();
            for (j, field) in file.fields.iter().enumerate() {
                check_name(&field.name)?;
                if !seen.insert(field.name.as_str()) {
                    return Err(SchemaError::DuplicateField {
                        file: file.name.clone(),
                        field: field.name.clone(),
                    });
                }
                fields.insert(
                    field.name.clone(),
                    FieldSchema {
                        number: j + 1,
                        access: field.access,
                    },
                );
            }

            files.insert(
                file.name.clone(),
                FileSchema {
                    name: file.name.clone(),
                    table: i + 1,
                    primary: file.primary.clone(),
                    fields,
                },
            );
        }
        Ok(Self { spec, files })
    }

    /// The normalized specification this schema was resolved from.
    #[must_use]
    pub const fn spec(&self) -> &DatabaseSpec {
        &self.spec
    }

    /// Look up a file.
    pub fn file(&self, name: &str) -> Result<&FileSchema, SchemaError> {
        self.files.get(name).ok_or_else(|| SchemaError::UnknownFile {
            name: name.to_string(),
        })
    }

    /// Files in table order.
    pub fn files(&self) -> impl Iterator<Item = &FileSchema> {
        self.files.values()
    }
}

fn check_name(name: &str) -> Result<(), SchemaError> {
    if name.is_empty() {
        return Err(SchemaError::EmptyName);
    }
    if name.as_bytes().contains(&DELIMITER) {
        return Err(SchemaError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
