use std::fmt;

/// A row read from the staging table.
///
/// Values are held in their text representation as returned by the simple query protocol,
/// with `None` standing for SQL `NULL`. The column layout is whatever the staging table
/// defines; the job only relies on a `patron_id` column being present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StagingRow {
    values: Vec<Option<String>>,
}

impl StagingRow {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    /// Returns the number of fields in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<Option<&str>> {
        self.values.get(index).map(|value| value.as_deref())
    }

    pub fn into_values(self) -> Vec<Option<String>> {
        self.values
    }

    /// Drops the last `count` fields, keeping at least an empty row.
    pub fn truncate_trailing(mut self, count: usize) -> Self {
        let keep = self.values.len().saturating_sub(count);
        self.values.truncate(keep);
        self
    }
}

impl From<Vec<Option<String>>> for StagingRow {
    fn from(values: Vec<Option<String>>) -> Self {
        Self::new(values)
    }
}

impl fmt::Display for StagingRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (index, value) in self.values.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            match value {
                Some(value) => write!(f, "'{value}'")?,
                None => write!(f, "NULL")?,
            }
        }
        write!(f, ")")
    }
}
