//! SQL issued by the merge job.
//!
//! Table names are the only values rendered into statement text and are always quoted.
//! Patron ids and row values are bound as positional parameters.

use std::fmt::Write;

use patron_merge_config::shared::TableName;

use crate::row::StagingRow;

/// Column all staging and main rows are keyed by.
pub const PATRON_ID_COLUMN: &str = "patron_id";

/// Number of fields the duplicates query appends to each staging row.
///
/// The join adds the joined `patron_id` and the per-id count.
pub const DUPLICATE_JOIN_FIELDS: usize = 2;

/// Most parameters a single statement can bind.
///
/// The bind message encodes the parameter count as a signed 16 bit integer.
pub const MAX_STATEMENT_PARAMETERS: usize = i16::MAX as usize;

/// A statement together with the text values bound to its `$n` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

impl SqlStatement {
    /// Creates a statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a statement with positional parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<Option<String>>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Returns `true` when the statement must be sent with bound parameters.
    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }
}

/// Renders `$1, $2, ..., $count`.
fn placeholders(count: usize) -> String {
    let mut rendered = String::new();
    for index in 1..=count {
        if index > 1 {
            rendered.push_str(", ");
        }
        // Writing into a `String` cannot fail.
        let _ = write!(rendered, "${index}");
    }

    rendered
}

/// Selects every staging row whose patron id occurs more than once.
///
/// Each returned row carries [`DUPLICATE_JOIN_FIELDS`] extra trailing fields.
pub fn duplicates_query(staging: &TableName) -> String {
    let staging = staging.as_quoted_identifier();
    format!(
        "SELECT * FROM {staging} JOIN (SELECT {PATRON_ID_COLUMN}, COUNT({PATRON_ID_COLUMN}) AS patron_count FROM {staging} GROUP BY {PATRON_ID_COLUMN}) t ON t.{PATRON_ID_COLUMN} = {staging}.{PATRON_ID_COLUMN} WHERE patron_count > 1;"
    )
}

/// Counts all and distinct patron ids in the staging table.
pub fn integrity_check_query(staging: &TableName) -> String {
    format!(
        "SELECT COUNT(*), COUNT(DISTINCT {PATRON_ID_COLUMN}) FROM {};",
        staging.as_quoted_identifier()
    )
}

/// Deletes every staging row belonging to one of `patron_ids`.
///
/// Ids are split across as many statements as needed to stay within
/// [`MAX_STATEMENT_PARAMETERS`]. All of them belong in the same transaction.
pub fn delete_duplicates_statements(
    staging: &TableName,
    patron_ids: &[String],
) -> Vec<SqlStatement> {
    let staging = staging.as_quoted_identifier();

    patron_ids
        .chunks(MAX_STATEMENT_PARAMETERS)
        .map(|chunk| {
            let sql = format!(
                "DELETE FROM {staging} WHERE {PATRON_ID_COLUMN} IN ({});",
                placeholders(chunk.len())
            );
            let params = chunk.iter().cloned().map(Some).collect();

            SqlStatement::with_params(sql, params)
        })
        .collect()
}

/// Inserts `row` back into the staging table.
pub fn insert_staging_row_statement(staging: &TableName, row: &StagingRow) -> SqlStatement {
    let sql = format!(
        "INSERT INTO {} VALUES ({});",
        staging.as_quoted_identifier(),
        placeholders(row.len())
    );

    SqlStatement::with_params(sql, row.values().to_vec())
}

/// Builds the main merge transaction.
///
/// Deletes main rows that are about to be replaced, copies all staging rows into main and
/// empties the staging table, in that order.
pub fn main_merge_statements(staging: &TableName, main: &TableName) -> Vec<SqlStatement> {
    let staging = staging.as_quoted_identifier();
    let main = main.as_quoted_identifier();

    vec![
        SqlStatement::new(format!(
            "DELETE FROM {main} USING {staging} WHERE {main}.{PATRON_ID_COLUMN} = {staging}.{PATRON_ID_COLUMN};"
        )),
        SqlStatement::new(format!("INSERT INTO {main} SELECT * FROM {staging};")),
        SqlStatement::new(format!("DELETE FROM {staging};")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableName {
        TableName::parse(name).unwrap()
    }

    #[test]
    fn duplicates_query_joins_counts() {
        insta::assert_snapshot!(
            duplicates_query(&table("test_staging_table")),
            @"SELECT * FROM test_staging_table JOIN (SELECT patron_id, COUNT(patron_id) AS patron_count FROM test_staging_table GROUP BY patron_id) t ON t.patron_id = test_staging_table.patron_id WHERE patron_count > 1;"
        );
    }

    #[test]
    fn integrity_check_counts_distinct_ids() {
        insta::assert_snapshot!(
            integrity_check_query(&table("patrons.staging")),
            @"SELECT COUNT(*), COUNT(DISTINCT patron_id) FROM patrons.staging;"
        );
    }

    #[test]
    fn delete_duplicates_binds_ids() {
        let statements = delete_duplicates_statements(
            &table("test_staging_table"),
            &["p1".to_string(), "p2".to_string()],
        );

        assert_eq!(statements.len(), 1);
        insta::assert_snapshot!(
            statements[0].sql,
            @"DELETE FROM test_staging_table WHERE patron_id IN ($1, $2);"
        );
        assert_eq!(
            statements[0].params,
            vec![Some("p1".to_string()), Some("p2".to_string())]
        );
    }

    #[test]
    fn delete_duplicates_splits_large_id_sets() {
        let patron_ids = (0..MAX_STATEMENT_PARAMETERS * 2 + 1)
            .map(|index| format!("p{index}"))
            .collect::<Vec<_>>();

        let statements = delete_duplicates_statements(&table("test_staging_table"), &patron_ids);

        let counts = statements
            .iter()
            .map(|statement| statement.params.len())
            .collect::<Vec<_>>();
        assert_eq!(
            counts,
            vec![MAX_STATEMENT_PARAMETERS, MAX_STATEMENT_PARAMETERS, 1]
        );
        insta::assert_snapshot!(
            statements[2].sql,
            @"DELETE FROM test_staging_table WHERE patron_id IN ($1);"
        );
        assert_eq!(
            statements[2].params,
            vec![Some(format!("p{}", MAX_STATEMENT_PARAMETERS * 2))]
        );

        let bound = statements
            .iter()
            .flat_map(|statement| statement.params.iter().flatten().cloned())
            .collect::<Vec<_>>();
        assert_eq!(bound, patron_ids);
    }

    #[test]
    fn delete_duplicates_without_ids_is_empty() {
        assert!(delete_duplicates_statements(&table("test_staging_table"), &[]).is_empty());
    }

    #[test]
    fn insert_row_binds_every_value() {
        let row = StagingRow::new(vec![
            Some("p2".to_string()),
            None,
            Some("addr2".to_string()),
        ]);

        let statement = insert_staging_row_statement(&table("test_staging_table"), &row);

        insta::assert_snapshot!(
            statement.sql,
            @"INSERT INTO test_staging_table VALUES ($1, $2, $3);"
        );
        assert_eq!(statement.params, row.into_values());
    }

    #[test]
    fn main_merge_has_three_statements_in_order() {
        let statements = main_merge_statements(&table("test_staging_table"), &table("test_main_table"));
        let rendered = statements
            .iter()
            .map(|statement| statement.sql.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        insta::assert_snapshot!(rendered, @r"
        DELETE FROM test_main_table USING test_staging_table WHERE test_main_table.patron_id = test_staging_table.patron_id;
        INSERT INTO test_main_table SELECT * FROM test_staging_table;
        DELETE FROM test_staging_table;
        ");
        assert!(statements.iter().all(|statement| !statement.has_params()));
    }

    #[test]
    fn table_names_are_quoted_when_needed() {
        insta::assert_snapshot!(
            integrity_check_query(&table("Patrons$V2")),
            @r#"SELECT COUNT(*), COUNT(DISTINCT patron_id) FROM "patrons$v2";"#
        );
    }
}
