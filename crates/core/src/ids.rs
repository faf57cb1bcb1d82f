#![forbid(unsafe_code)]

/// Families of human-readable sequential identifiers (`TASK-001`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdKind {
    Task,
    Initiative,
    Run,
    Decision,
}

impl IdKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Task => "TASK",
            Self::Initiative => "INIT",
            Self::Run => "RUN",
            Self::Decision => "DEC",
        }
    }

    /// Name of the allocation counter backing this family.
    pub fn counter_name(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Initiative => "initiative",
            Self::Run => "workflow_run",
            Self::Decision => "initiative_decision",
        }
    }

    /// Zero-padded to three digits; wider numbers are printed in full.
    pub fn format(self, number: u64) -> String {
        format!("{}-{number:03}", self.prefix())
    }

    /// Numeric suffix of an id in this family, if it is one.
    pub fn parse_number(self, id: &str) -> Option<u64> {
        let rest = id.strip_prefix(self.prefix())?.strip_prefix('-')?;
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("id must not be empty")]
    Empty,
    #[error("id is too long")]
    TooLong,
    #[error("id contains invalid character {ch:?} at {index}")]
    InvalidChar { ch: char, index: usize },
}

const MAX_ID_LEN: usize = 128;

/// Validates an entity id supplied by a caller. Ids are trimmed and may
/// contain ASCII alphanumerics plus `-`, `_`, `.` and `/`.
pub fn normalize_id(raw: &str) -> Result<String, IdError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    if value.len() > MAX_ID_LEN {
        return Err(IdError::TooLong);
    }
    for (index, ch) in value.chars().enumerate() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/') {
            continue;
        }
        return Err(IdError::InvalidChar { ch, index });
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_sequential_ids() {
        assert_eq!(IdKind::Task.format(7), "TASK-007");
        assert_eq!(IdKind::Run.format(1234), "RUN-1234");
        assert_eq!(IdKind::Task.parse_number("TASK-042"), Some(42));
        assert_eq!(IdKind::Task.parse_number("INIT-042"), None);
        assert_eq!(IdKind::Task.parse_number("TASK-"), None);
        assert_eq!(IdKind::Task.parse_number("TASK-4a"), None);
    }

    #[test]
    fn id_validation() {
        assert_eq!(normalize_id("  "), Err(IdError::Empty));
        assert_eq!(
            normalize_id("bad id"),
            Err(IdError::InvalidChar { ch: ' ', index: 3 })
        );
        assert_eq!(normalize_id(" TASK-001 ").as_deref(), Ok("TASK-001"));
    }
}
