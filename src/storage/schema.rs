//! Database schema constants.
//!
//! SQL definitions for the SQLite job store. Statements are idempotent and
//! run every time the store is opened.

/// SQL schema for creating the prediction_jobs table.
pub const CREATE_PREDICTION_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS prediction_jobs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    service_job_url  TEXT    NOT NULL,
    subject_set_id   TEXT    NOT NULL,
    results_url      TEXT,
    status           TEXT    NOT NULL DEFAULT 'pending',
    message          TEXT,
    created_at       TEXT    NOT NULL,
    updated_at       TEXT    NOT NULL
)
"#;

/// Index for listing jobs by status.
pub const CREATE_PREDICTION_JOBS_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_prediction_jobs_status ON prediction_jobs(status)
"#;

/// Returns all schema statements in the order they should be executed.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_PREDICTION_JOBS_TABLE,
        CREATE_PREDICTION_JOBS_STATUS_INDEX,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_are_idempotent() {
        for statement in all_schema_statements() {
            assert!(statement.contains("IF NOT EXISTS"));
        }
    }
}
