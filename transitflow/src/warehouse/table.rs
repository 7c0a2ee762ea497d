//! Table identifiers, write modes and read queries.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::errors::ConfigError;

/// How a load job treats existing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Add rows, keep everything already there.
    Append,
    /// Clear the target, then add rows, as one commit.
    Truncate,
}

impl WriteMode {
    /// BigQuery write disposition for this mode.
    #[must_use]
    pub fn disposition(self) -> &'static str {
        match self {
            Self::Append => "WRITE_APPEND",
            Self::Truncate => "WRITE_TRUNCATE",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::Truncate => write!(f, "truncate"),
        }
    }
}

fn table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9_\-]*)\.([A-Za-z0-9_]+)\.([A-Za-z0-9_]+)$")
            .unwrap_or_else(|_| unreachable!("table pattern is a valid regex"))
    })
}

/// A fully-qualified `project.dataset.table` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    /// Project.
    pub project: String,
    /// Dataset.
    pub dataset: String,
    /// Table.
    pub table: String,
}

impl TableRef {
    /// Creates a table reference without validation.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Identifier safe for use inside job ids.
    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}_{}_{}", self.project, self.dataset, self.table).replace('-', "_")
    }
}

impl FromStr for TableRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = table_pattern()
            .captures(s.trim())
            .ok_or_else(|| ConfigError::Invalid(format!("invalid table identifier '{s}'")))?;
        Ok(Self::new(&caps[1], &caps[2], &caps[3]))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// `SELECT DISTINCT` over today's rows with one column required non-null.
///
/// "Today" is the warehouse's current date, compared against the date of
/// `fetch_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadQuery {
    /// Source table.
    pub table: TableRef,
    /// Selected columns.
    pub columns: Vec<String>,
    /// Rows where this column is null are excluded.
    pub non_null: String,
    /// Restrict to rows fetched on the warehouse's current date.
    pub today_only: bool,
}

impl ReadQuery {
    /// Creates a distinct query over today's rows.
    #[must_use]
    pub fn distinct_today(table: &TableRef, columns: &[&str], non_null: &str) -> Self {
        Self {
            table: table.clone(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            non_null: non_null.to_string(),
            today_only: true,
        }
    }

    /// Renders the query as GoogleSQL.
    #[must_use]
    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "SELECT DISTINCT {} FROM `{}` WHERE {} IS NOT NULL",
            self.columns.join(", "),
            self.table,
            self.non_null
        );
        if self.today_only {
            sql.push_str(" AND DATE(fetch_time) = CURRENT_DATE()");
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_ref() {
        let table: TableRef = "my-project.transit.sptrans_posicoes".parse().unwrap();
        assert_eq!(table.project, "my-project");
        assert_eq!(table.dataset, "transit");
        assert_eq!(table.table, "sptrans_posicoes");
        assert_eq!(table.to_string(), "my-project.transit.sptrans_posicoes");
        assert_eq!(table.slug(), "my_project_transit_sptrans_posicoes");
    }

    #[test]
    fn test_parse_table_ref_rejects_partial() {
        assert!("..sptrans_posicoes".parse::<TableRef>().is_err());
        assert!("dataset.table".parse::<TableRef>().is_err());
        assert!("p.d.t; DROP".parse::<TableRef>().is_err());
    }

    #[test]
    fn test_write_mode_disposition() {
        assert_eq!(WriteMode::Append.disposition(), "WRITE_APPEND");
        assert_eq!(WriteMode::Truncate.disposition(), "WRITE_TRUNCATE");
        assert_eq!(WriteMode::Truncate.to_string(), "truncate");
    }

    #[test]
    fn test_distinct_today_sql() {
        let table = TableRef::new("p", "d", "sptrans_linhas");
        let query = ReadQuery::distinct_today(&table, &["line_c", "cl"], "cl");

        assert_eq!(
            query.to_sql(),
            "SELECT DISTINCT line_c, cl FROM `p.d.sptrans_linhas` \
             WHERE cl IS NOT NULL AND DATE(fetch_time) = CURRENT_DATE()"
        );
    }
}
