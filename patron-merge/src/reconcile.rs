//! Duplicate reconciliation for staged patron rows.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::bail;
use crate::error::{ErrorKind, MergeResult};
use crate::queries::DUPLICATE_JOIN_FIELDS;
use crate::row::StagingRow;

/// Smallest row the duplicates query can return: one table column plus the join fields.
const MIN_DUPLICATE_ROW_LEN: usize = DUPLICATE_JOIN_FIELDS + 1;

/// Canonical rows for every duplicated patron id, in the order the ids were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateSet {
    patron_ids: Vec<String>,
    canonical_rows: Vec<StagingRow>,
}

impl DuplicateSet {
    /// Returns `true` if no duplicated ids were found.
    pub fn is_empty(&self) -> bool {
        self.patron_ids.is_empty()
    }

    /// Returns the number of duplicate groups.
    pub fn len(&self) -> usize {
        self.patron_ids.len()
    }

    /// Returns the duplicated patron ids.
    pub fn patron_ids(&self) -> &[String] {
        &self.patron_ids
    }

    /// Returns one row per duplicated id with the join fields stripped.
    pub fn canonical_rows(&self) -> &[StagingRow] {
        &self.canonical_rows
    }
}

/// Collapses rows returned by the duplicates query into one canonical row per patron id.
///
/// The first row seen for an id becomes canonical. Every later row for the same id must match
/// it field by field (ignoring the trailing join fields), otherwise the run cannot decide which
/// version to keep and fails with [`ErrorKind::ReconciliationConflict`].
pub fn reconcile_duplicates(rows: Vec<StagingRow>) -> MergeResult<DuplicateSet> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut duplicates = DuplicateSet::default();

    for row in rows {
        let patron_id = joined_patron_id(&row)?;
        let row = row.truncate_trailing(DUPLICATE_JOIN_FIELDS);

        match positions.entry(patron_id) {
            Entry::Vacant(entry) => {
                duplicates.patron_ids.push(entry.key().clone());
                entry.insert(duplicates.canonical_rows.len());
                duplicates.canonical_rows.push(row);
            }
            Entry::Occupied(entry) => {
                if duplicates.canonical_rows[*entry.get()] != row {
                    bail!(
                        ErrorKind::ReconciliationConflict,
                        "Duplicate patron ids with different values found",
                        format!("patron_id {}", entry.key())
                    );
                }
            }
        }
    }

    Ok(duplicates)
}

/// Reads the patron id the duplicates query joined on.
fn joined_patron_id(row: &StagingRow) -> MergeResult<String> {
    if row.len() < MIN_DUPLICATE_ROW_LEN {
        bail!(
            ErrorKind::InvalidData,
            "Duplicate row is missing the joined fields",
            format!(
                "expected at least {MIN_DUPLICATE_ROW_LEN} fields, got {}",
                row.len()
            )
        );
    }

    match row.get(row.len() - DUPLICATE_JOIN_FIELDS) {
        Some(Some(patron_id)) => Ok(patron_id.to_string()),
        _ => bail!(
            ErrorKind::InvalidData,
            "Duplicate row has a null patron id"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a row as returned by the duplicates query for a `(patron_id, address, name)`
    /// staging table.
    fn joined(patron_id: &str, address: Option<&str>, name: Option<&str>, count: u32) -> StagingRow {
        StagingRow::new(vec![
            Some(patron_id.to_string()),
            address.map(str::to_string),
            name.map(str::to_string),
            Some(patron_id.to_string()),
            Some(count.to_string()),
        ])
    }

    #[test]
    fn no_rows_means_no_duplicates() {
        let duplicates = reconcile_duplicates(vec![]).unwrap();

        assert!(duplicates.is_empty());
        assert_eq!(duplicates.len(), 0);
    }

    #[test]
    fn identical_rows_collapse_to_one() {
        let rows = vec![
            joined("p2", Some("addr2"), Some("Ada"), 2),
            joined("p2", Some("addr2"), Some("Ada"), 2),
        ];

        let duplicates = reconcile_duplicates(rows).unwrap();

        assert_eq!(duplicates.patron_ids(), ["p2".to_string()]);
        assert_eq!(
            duplicates.canonical_rows(),
            [StagingRow::new(vec![
                Some("p2".to_string()),
                Some("addr2".to_string()),
                Some("Ada".to_string()),
            ])]
        );
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let rows = vec![
            joined("p9", None, Some("Zed"), 2),
            joined("p3", Some("addr3"), None, 3),
            joined("p9", None, Some("Zed"), 2),
            joined("p3", Some("addr3"), None, 3),
            joined("p3", Some("addr3"), None, 3),
        ];

        let duplicates = reconcile_duplicates(rows).unwrap();

        assert_eq!(
            duplicates.patron_ids(),
            ["p9".to_string(), "p3".to_string()]
        );
        assert_eq!(duplicates.canonical_rows().len(), 2);
        assert!(duplicates.canonical_rows().iter().all(|row| row.len() == 3));
    }

    #[test]
    fn differing_rows_are_a_conflict() {
        let rows = vec![
            joined("p1", Some("addr1"), Some("Ada"), 2),
            joined("p1", Some("addr1-changed"), Some("Ada"), 2),
        ];

        let err = reconcile_duplicates(rows).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ReconciliationConflict);
        assert_eq!(
            err.description(),
            "Duplicate patron ids with different values found"
        );
        assert_eq!(err.detail(), Some("patron_id p1"));
    }

    #[test]
    fn null_differs_from_empty_string() {
        let rows = vec![
            joined("p1", None, Some("Ada"), 2),
            joined("p1", Some(""), Some("Ada"), 2),
        ];

        let err = reconcile_duplicates(rows).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ReconciliationConflict);
    }

    #[test]
    fn short_rows_are_invalid() {
        let rows = vec![StagingRow::new(vec![Some("p1".to_string()), Some("2".to_string())])];

        let err = reconcile_duplicates(rows).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn null_joined_id_is_invalid() {
        let rows = vec![StagingRow::new(vec![
            Some("p1".to_string()),
            Some("addr1".to_string()),
            None,
            Some("2".to_string()),
        ])];

        let err = reconcile_duplicates(rows).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(err.description(), "Duplicate row has a null patron id");
    }
}
