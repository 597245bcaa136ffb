use std::fmt;

use crate::error::ColumnMappingError;

/// PostgreSQL's identifier length limit (NAMEDATALEN - 1), in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A table name with an optional schema.
///
/// Identifiers are case-sensitive and always quoted in generated SQL, so
/// `Orders` and `orders` name different tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Parses `table`, `schema.table`, or either part double-quoted
    /// (`"my schema"."Odd.Name"`, with `""` escaping a quote).
    pub fn parse(input: &str) -> Result<Self, ColumnMappingError> {
        let invalid = || ColumnMappingError::InvalidTableName {
            name: input.to_string(),
        };
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut was_quoted = false;
        let mut chars = input.trim().chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' if quoted && chars.peek() == Some(&'"') => {
                    chars.next();
                    current.push('"');
                }
                '"' if quoted => quoted = false,
                '"' if current.is_empty() && !was_quoted => {
                    quoted = true;
                    was_quoted = true;
                }
                '.' if !quoted => {
                    if current.is_empty() {
                        return Err(invalid());
                    }
                    parts.push(std::mem::take(&mut current));
                    was_quoted = false;
                }
                '"' => return Err(invalid()),
                _ if was_quoted && !quoted => return Err(invalid()),
                _ => current.push(c),
            }
        }
        if quoted || current.is_empty() {
            return Err(invalid());
        }
        parts.push(current);
        match parts.as_slice() {
            [name] => Ok(Self::new(None, name)),
            [schema, name] => Ok(Self::new(Some(schema), name)),
            _ => Err(invalid()),
        }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The quoted, schema-qualified form for use in SQL text.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }

    /// The qualified name as a string literal, for `to_regclass(...)`.
    pub fn literal(&self) -> String {
        quote_literal(&self.qualified())
    }

    /// A sibling name in the same schema.
    pub fn sibling(&self, name: &str) -> Self {
        Self {
            schema: self.schema.clone(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// Quotes an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a string literal, doubling embedded single quotes.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Truncates `ident` to the identifier length limit on a char boundary.
pub fn truncate_ident(ident: &str, max: usize) -> &str {
    if ident.len() <= max {
        return ident;
    }
    let mut end = max;
    while !ident.is_char_boundary(end) {
        end -= 1;
    }
    &ident[..end]
}
