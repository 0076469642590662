use std::future::Future;

use ads::Advertisement;

use crate::error::SourceError;

pub const ADVERTISEMENTS_TABLE: &str = "advertisements";
pub const STORES_TABLE: &str = "stores";
pub const STORE_STATUS_COLUMN: &str = "status";

/// Endpoint returning the current list of active advertisements.
pub trait AdSource: Send + Sync {
    fn fetch_active(
        &self,
    ) -> impl Future<Output = Result<Vec<Advertisement>, SourceError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-change notification from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub column: Option<String>,
}

impl ChangeEvent {
    /// Any advertisement row change matters, and so does the store
    /// status column: a suspended store invalidates its ads. Payload
    /// contents are irrelevant, the full list is refetched either way.
    pub fn is_relevant(&self) -> bool {
        if self.table == ADVERTISEMENTS_TABLE {
            return true;
        }
        self.table == STORES_TABLE && self.column.as_deref() == Some(STORE_STATUS_COLUMN)
    }
}

/// Realtime change-notification channel, polled without blocking.
pub trait ChangeStream: Send {
    fn connect(&mut self) -> Result<(), SourceError>;
    fn poll_event(&mut self) -> Result<Option<ChangeEvent>, SourceError>;

    fn disconnect(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn heartbeat(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeEvent, ChangeKind};

    #[test]
    fn advertisement_rows_are_always_relevant() {
        let event = ChangeEvent {
            kind: ChangeKind::Delete,
            table: "advertisements".to_string(),
            column: None,
        };
        assert!(event.is_relevant());
    }

    #[test]
    fn store_rows_are_relevant_only_for_the_status_column() {
        let status = ChangeEvent {
            kind: ChangeKind::Update,
            table: "stores".to_string(),
            column: Some("status".to_string()),
        };
        let name = ChangeEvent {
            kind: ChangeKind::Update,
            table: "stores".to_string(),
            column: Some("name".to_string()),
        };
        assert!(status.is_relevant());
        assert!(!name.is_relevant());
    }

    #[test]
    fn unrelated_tables_are_ignored() {
        let event = ChangeEvent {
            kind: ChangeKind::Insert,
            table: "orders".to_string(),
            column: None,
        };
        assert!(!event.is_relevant());
    }
}
