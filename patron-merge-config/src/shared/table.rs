use std::fmt;
use std::str::FromStr;

use pg_escape::quote_identifier;

use crate::shared::ValidationError;

/// Maximum identifier length accepted by Redshift, in bytes.
const MAX_IDENTIFIER_LEN: usize = 127;

/// A validated, optionally schema-qualified table name.
///
/// Table names are the only values substituted into SQL text, so they are restricted to plain
/// identifiers (`[A-Za-z_][A-Za-z0-9_$]*`, case-folded to lowercase) and always rendered
/// through [`TableName::as_quoted_identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    /// Parses `table` or `schema.table`.
    pub fn parse(value: &str) -> Result<TableName, ValidationError> {
        let value = value.trim();
        let mut parts = value.split('.');

        let first = parts.next().unwrap_or_default();
        let second = parts.next();
        if parts.next().is_some() {
            return Err(invalid(value, "expected `table` or `schema.table`"));
        }

        let (schema, name) = match second {
            Some(name) => (Some(parse_identifier(value, first)?), parse_identifier(value, name)?),
            None => (None, parse_identifier(value, first)?),
        };

        Ok(TableName { schema, name })
    }

    /// Returns the schema, if the name is qualified.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Returns the unqualified table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table name quoted for use in SQL text.
    pub fn as_quoted_identifier(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(&self.name)),
            None => quote_identifier(&self.name).into_owned(),
        }
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

impl FromStr for TableName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableName::parse(s)
    }
}

fn parse_identifier(full: &str, part: &str) -> Result<String, ValidationError> {
    if part.is_empty() {
        return Err(invalid(full, "identifier is empty"));
    }
    if part.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid(full, "identifier is longer than 127 bytes"));
    }

    let mut chars = part.chars();
    let starts_well = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_well {
        return Err(invalid(full, "identifier must start with a letter or underscore"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return Err(invalid(
            full,
            "identifier may only contain letters, digits, `_` and `$`",
        ));
    }

    Ok(part.to_ascii_lowercase())
}

fn invalid(name: &str, reason: &'static str) -> ValidationError {
    ValidationError::InvalidTableName {
        name: name.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_qualified_names() {
        let plain = TableName::parse("patron_info_staging").unwrap();
        assert_eq!(plain.schema(), None);
        assert_eq!(plain.name(), "patron_info_staging");

        let qualified = TableName::parse("Sierra.Patron_Info").unwrap();
        assert_eq!(qualified.schema(), Some("sierra"));
        assert_eq!(qualified.name(), "patron_info");
        assert_eq!(qualified.to_string(), "sierra.patron_info");
    }

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(
            TableName::parse("public.patrons").unwrap().as_quoted_identifier(),
            "public.patrons"
        );
        assert_eq!(
            TableName::parse("patrons$v2").unwrap().as_quoted_identifier(),
            "\"patrons$v2\""
        );
    }

    #[test]
    fn rejects_injection_attempts() {
        for value in [
            "",
            "patrons; drop table main",
            "a.b.c",
            "1patrons",
            "\"patrons\"",
            "patrons--",
            "schema.",
        ] {
            assert!(
                matches!(
                    TableName::parse(value),
                    Err(ValidationError::InvalidTableName { .. })
                ),
                "{value:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_overlong_identifiers() {
        let long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(TableName::parse(&long).is_err());
        assert!(TableName::parse(&long[1..]).is_ok());
    }
}
