use std::fmt;
use std::str::FromStr;

use pg_escape::quote_identifier;
use thiserror::Error;

/// Errors raised when a table reference cannot be turned into a [`TableName`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableNameError {
    #[error("table name is empty")]
    Empty,

    #[error("schema part of `{0}` is empty")]
    EmptySchema(String),

    #[error("table part of `{0}` is empty")]
    EmptyTable(String),
}

/// A Postgres table reference with an optional schema.
///
/// Unqualified names resolve through the connection's `search_path`.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct TableName {
    /// The schema name containing the table
    pub schema: Option<String>,
    /// The name of the table within the schema
    pub name: String,
}

impl TableName {
    pub fn new(schema: Option<String>, name: String) -> TableName {
        Self { schema, name }
    }

    /// Parses a user supplied table reference.
    ///
    /// The input is split on the first `.` into schema and table. Everything after that dot
    /// belongs to the table name, which is quoted as a single identifier.
    ///
    /// Parts that are plain identifiers are folded to lowercase, the way Postgres resolves
    /// unquoted names, so `Students` refers to `students`. Other parts keep their exact spelling.
    pub fn parse(value: &str) -> Result<TableName, TableNameError> {
        if value.is_empty() {
            return Err(TableNameError::Empty);
        }

        match value.split_once('.') {
            Some((schema, _)) if schema.is_empty() => {
                Err(TableNameError::EmptySchema(value.to_owned()))
            }
            Some((_, name)) if name.is_empty() => Err(TableNameError::EmptyTable(value.to_owned())),
            Some((schema, name)) => Ok(TableName::new(
                Some(fold_identifier(schema)),
                fold_identifier(name),
            )),
            None => Ok(TableName::new(None, fold_identifier(value))),
        }
    }

    /// Returns the table name as a properly quoted Postgres identifier.
    ///
    /// The result is safe to splice into SQL text.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_name = quote_identifier(&self.name);

        match &self.schema {
            Some(schema) => {
                let quoted_schema = quote_identifier(schema);
                format!("{quoted_schema}.{quoted_name}")
            }
            None => quoted_name.into_owned(),
        }
    }
}

/// Returns `true` for identifiers Postgres accepts without quotes: `[A-Za-z_][A-Za-z0-9_$]*`.
fn is_plain_identifier(part: &str) -> bool {
    let mut chars = part.chars();

    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Lowercases `part` when Postgres would fold it as an unquoted identifier.
fn fold_identifier(part: &str) -> String {
    if is_plain_identifier(part) {
        part.to_ascii_lowercase()
    } else {
        part.to_owned()
    }
}

impl FromStr for TableName {
    type Err = TableNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableName::parse(s)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unqualified_and_qualified_names() {
        let table = TableName::parse("writers").unwrap();
        assert_eq!(table, TableName::new(None, "writers".to_owned()));
        assert_eq!(table.to_string(), "writers");

        let table = TableName::parse("demo.writers").unwrap();
        assert_eq!(
            table,
            TableName::new(Some("demo".to_owned()), "writers".to_owned())
        );
        assert_eq!(table.to_string(), "demo.writers");
    }

    #[test]
    fn splits_on_first_dot_only() {
        let table = TableName::parse("demo.writers.v2").unwrap();
        assert_eq!(table.schema.as_deref(), Some("demo"));
        assert_eq!(table.name, "writers.v2");
    }

    #[test]
    fn rejects_empty_parts() {
        assert_eq!(TableName::parse(""), Err(TableNameError::Empty));
        assert!(matches!(
            TableName::parse(".writers"),
            Err(TableNameError::EmptySchema(_))
        ));
        assert!(matches!(
            TableName::parse("demo."),
            Err(TableNameError::EmptyTable(_))
        ));
    }

    #[test]
    fn quotes_every_part() {
        let table = TableName::parse("writers").unwrap();
        assert_eq!(table.as_quoted_identifier(), "writers");

        let table = TableName::parse("Demo Schema.Writers").unwrap();
        assert_eq!(table.as_quoted_identifier(), "\"Demo Schema\".writers");

        let table = TableName::parse("public.x; drop table y").unwrap();
        assert_eq!(
            table.as_quoted_identifier(),
            "public.\"x; drop table y\""
        );

        let table = TableName::parse("a\"b").unwrap();
        assert_eq!(table.as_quoted_identifier(), "\"a\"\"b\"");
    }

    #[test]
    fn plain_identifiers_are_folded_to_lowercase() {
        let table = TableName::parse("Students").unwrap();
        assert_eq!(table, TableName::new(None, "students".to_owned()));
        assert_eq!(table.as_quoted_identifier(), "students");

        let table = TableName::parse("School.Staff_$1").unwrap();
        assert_eq!(table.schema.as_deref(), Some("school"));
        assert_eq!(table.name, "staff_$1");

        // Names Postgres only accepts quoted keep their case.
        let table = TableName::parse("Demo.Writers v2").unwrap();
        assert_eq!(table.schema.as_deref(), Some("demo"));
        assert_eq!(table.name, "Writers v2");
        assert_eq!(table.as_quoted_identifier(), "demo.\"Writers v2\"");

        let table = TableName::parse("1st").unwrap();
        assert_eq!(table.name, "1st");
    }
}
