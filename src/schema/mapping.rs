use serde::{Deserialize, Serialize};

/// One `source field -> destination column` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedColumn {
    pub source: String,
    pub column: String,
}

/// Explicit, ordered column mapping.
///
/// Without a mapping every destination column whose name equals a source
/// field (case-sensitively) is used. With one, exactly the listed pairs are
/// used, in the listed order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping {
    pairs: Vec<MappedColumn>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `source -> column` pair.
    pub fn map(mut self, source: impl Into<String>, column: impl Into<String>) -> Self {
        self.pairs.push(MappedColumn {
            source: source.into(),
            column: column.into(),
        });
        self
    }

    pub fn pairs(&self) -> &[MappedColumn] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Destination column for `source`, if mapped.
    pub fn column_for(&self, source: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|p| p.source == source)
            .map(|p| p.column.as_str())
    }
}

impl<S: Into<String>, D: Into<String>> FromIterator<(S, D)> for ColumnMapping {
    fn from_iter<I: IntoIterator<Item = (S, D)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ColumnMapping::new(), |mapping, (s, d)| mapping.map(s, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_order() {
        let mapping = ColumnMapping::new().map("IdMapped", "Id").map("NameMapped", "Name");
        let columns: Vec<&str> = mapping.pairs().iter().map(|p| p.column.as_str()).collect();
        assert_eq!(columns, ["Id", "Name"]);
        assert_eq!(mapping.column_for("NameMapped"), Some("Name"));
        assert_eq!(mapping.column_for("Name"), None);
    }

    #[test]
    fn test_deserialize_from_list() {
        let mapping: ColumnMapping =
            serde_json::from_str(r#"[{"source": "a", "column": "A"}]"#).unwrap();
        assert_eq!(mapping, [("a", "A")].into_iter().collect());
    }
}
