#![forbid(unsafe_code)]

/// SQL spelling differences between supported backends. Query code asks the
/// dialect instead of branching on the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Positional parameter `n` (1-based).
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Sqlite => format!("?{n}"),
            Self::Postgres => format!("${n}"),
        }
    }

    /// Insert that silently does nothing when the row already exists.
    pub fn insert_ignore(self, table: &str, columns: &[&str]) -> String {
        let values = (1..=columns.len())
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ");
        let columns = columns.join(", ");
        match self {
            Self::Sqlite => format!("INSERT OR IGNORE INTO {table} ({columns}) VALUES ({values})"),
            Self::Postgres => {
                format!("INSERT INTO {table} ({columns}) VALUES ({values}) ON CONFLICT DO NOTHING")
            }
        }
    }

    pub fn now_expr(self) -> &'static str {
        match self {
            Self::Sqlite => "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            Self::Postgres => "NOW()",
        }
    }
}
