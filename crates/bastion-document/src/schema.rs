//! Bastion Table Layout
//!
//! Detection of the bookkeeping columns present on a document table and the
//! statements that depend on them.
//!
//! Tables created by the store carry `version`, `last_updated` and
//! `date_created`. Older tables may have only `(id, data)`; every statement
//! here degrades to defaults for the columns that are missing.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

/// Lists the columns of a table in the current schema.
pub const COLUMNS_SQL: &str = "SELECT column_name::text FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1";

// =============================================================================
// Table Layout
// =============================================================================

/// Which optional bookkeeping columns a document table has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    pub version: bool,
    pub last_updated: bool,
    pub date_created: bool,
}

impl TableLayout {
    /// Layout of tables created by [`create_table_sql`].
    pub fn full() -> Self {
        Self {
            version: true,
            last_updated: true,
            date_created: true,
        }
    }

    /// Bare `(id, data)` layout.
    pub fn minimal() -> Self {
        Self {
            version: false,
            last_updated: false,
            date_created: false,
        }
    }

    /// Build from the table's column names; `None` when there are none,
    /// meaning the table does not exist.
    pub fn from_columns<I, S>(columns: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = false;
        let mut layout = Self::minimal();
        for column in columns {
            seen = true;
            match column.as_ref() {
                "version" => layout.version = true,
                "last_updated" => layout.last_updated = true,
                "date_created" => layout.date_created = true,
                _ => {}
            }
        }
        seen.then_some(layout)
    }

    /// Insert-or-update of one document.
    ///
    /// Saving a payload equal to the stored one touches nothing, so repeated
    /// saves neither rewrite the row nor advance the version.
    pub fn upsert_sql(&self, table: &str) -> String {
        let mut set = vec!["data = EXCLUDED.data".to_string()];
        if self.version {
            set.push("version = COALESCE(doc.version, 1) + 1".to_string());
        }
        if self.last_updated {
            set.push("last_updated = now()".to_string());
        }
        format!(
            "INSERT INTO {} AS doc (id, data) VALUES ($1, $2::json) \
             ON CONFLICT (id) DO UPDATE SET {} \
             WHERE doc.data::jsonb IS DISTINCT FROM EXCLUDED.data::jsonb",
            table,
            set.join(", ")
        )
    }

    /// Version and last-update time for a key list, in key-list order.
    pub fn metadata_sql(&self, table: &str) -> String {
        let version = if self.version {
            "COALESCE(version, 1)::bigint"
        } else {
            "1::bigint"
        };
        let updated = if self.last_updated {
            "COALESCE(last_updated::timestamptz, now())"
        } else {
            "now()"
        };
        format!(
            "SELECT id::text, {} AS version, {} AS last_updated FROM {} \
             WHERE id = ANY($1) ORDER BY array_position($1, id::text)",
            version, updated, table
        )
    }
}

impl Default for TableLayout {
    fn default() -> Self {
        Self::full()
    }
}

/// Create-if-absent statement for a document table.
pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         id varchar(200) NOT NULL PRIMARY KEY, \
         data json NOT NULL, \
         version integer NOT NULL DEFAULT 1, \
         last_updated timestamptz NOT NULL DEFAULT now(), \
         date_created timestamptz NOT NULL DEFAULT now())",
        table
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_detection() {
        assert_eq!(TableLayout::from_columns(Vec::<String>::new()), None);
        assert_eq!(
            TableLayout::from_columns(["id", "data"]),
            Some(TableLayout::minimal())
        );
        assert_eq!(
            TableLayout::from_columns(["id", "version", "last_updated", "date_created", "data"]),
            Some(TableLayout::full())
        );

        let partial = TableLayout::from_columns(["id", "data", "version"]).unwrap();
        assert!(partial.version);
        assert!(!partial.last_updated);
    }

    #[test]
    fn test_upsert_full() {
        assert_eq!(
            TableLayout::full().upsert_sql("docs"),
            "INSERT INTO docs AS doc (id, data) VALUES ($1, $2::json) \
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, \
             version = COALESCE(doc.version, 1) + 1, last_updated = now() \
             WHERE doc.data::jsonb IS DISTINCT FROM EXCLUDED.data::jsonb"
        );
    }

    #[test]
    fn test_upsert_minimal() {
        let sql = TableLayout::minimal().upsert_sql("docs");
        assert!(sql.contains("DO UPDATE SET data = EXCLUDED.data WHERE"));
        assert!(!sql.contains("version"));
    }

    #[test]
    fn test_metadata_defaults_for_legacy_layout() {
        let sql = TableLayout::minimal().metadata_sql("docs");
        assert!(sql.starts_with("SELECT id::text, 1::bigint AS version, now() AS last_updated FROM docs"));

        let sql = TableLayout::full().metadata_sql("docs");
        assert!(sql.contains("COALESCE(version, 1)::bigint"));
        assert!(sql.ends_with("ORDER BY array_position($1, id::text)"));
    }

    #[test]
    fn test_create_table() {
        let sql = create_table_sql("docs");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS docs ("));
        assert!(sql.contains("id varchar(200) NOT NULL PRIMARY KEY"));
        assert!(sql.contains("data json NOT NULL"));
    }
}
