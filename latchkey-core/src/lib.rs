//! Latchkey Core - Shared Types
//!
//! Error taxonomy, result envelopes and configuration shared by the storage
//! and workflow crates. No store access and no task scheduling lives here.

pub mod config;
pub mod constants;
pub mod error;
pub mod telemetry;

pub use config::{CacheConfig, LatchkeyConfig, LockConfig, RetryConfig, TelemetryConfig};
pub use error::{
    ConfigError, LatchkeyError, LatchkeyResult, LockError, PolicyError, QueueError, RetryError,
    StoreError, TaskError,
};

use serde::{Deserialize, Serialize};

// ============================================================================
// OPERATION RESULT
// ============================================================================

/// Success/failure envelope returned by operations that report failure as a
/// value instead of an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> OperationResult<T> {
    /// Successful result carrying data.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            code: None,
        }
    }

    /// Failed result carrying a message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            code: None,
        }
    }

    /// Attach a machine-readable code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Convert into a `Result`, treating `success == false` as a task-level failure.
    pub fn into_result(self) -> LatchkeyResult<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(LatchkeyError::operation(
                self.message
                    .unwrap_or_else(|| "execution failed".to_string()),
            ))
        }
    }
}

// ============================================================================
// PAGE RESULT
// ============================================================================

/// One page of a paginated query. The cache never inspects its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub rows: Vec<T>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

impl<T> PageResult<T> {
    pub fn new(rows: Vec<T>, total: u64, limit: u64, offset: u64) -> Self {
        Self {
            rows,
            total,
            limit,
            offset,
        }
    }

    /// Whether another page exists after this one.
    pub fn has_next(&self) -> bool {
        self.offset.saturating_add(self.rows.len() as u64) < self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_failure_into_result() {
        let result: OperationResult<u32> = OperationResult::failure("quota exceeded");
        let err = result.into_result().unwrap_err();
        assert_eq!(err, LatchkeyError::operation("quota exceeded"));
    }

    #[test]
    fn test_operation_result_failure_without_message() {
        let result: OperationResult<u32> = OperationResult {
            success: false,
            data: None,
            message: None,
            code: None,
        };
        let err = result.into_result().unwrap_err();
        assert!(err.to_string().contains("execution failed"));
    }

    #[test]
    fn test_operation_result_serde_shape() {
        let value = serde_json::to_value(OperationResult::ok(7)).unwrap();
        assert_eq!(value, serde_json::json!({ "success": true, "data": 7 }));

        let parsed: OperationResult<u32> =
            serde_json::from_value(serde_json::json!({ "success": false, "message": "nope" }))
                .unwrap();
        assert!(!parsed.is_success());
        assert_eq!(parsed.message.as_deref(), Some("nope"));
    }

    #[test]
    fn test_page_result_has_next() {
        let page = PageResult::new(vec![1, 2], 5, 2, 0);
        assert!(page.has_next());

        let last = PageResult::new(vec![5], 5, 2, 4);
        assert!(!last.has_next());
    }

    #[test]
    fn test_page_result_has_next_with_huge_offset() {
        let page = PageResult::new(vec![1, 2], u64::MAX, 2, u64::MAX - 1);
        assert!(!page.has_next());

        let decoded: PageResult<u32> = serde_json::from_value(serde_json::json!({
            "rows": [1], "total": 3, "limit": 1, "offset": u64::MAX
        }))
        .unwrap();
        assert!(!decoded.has_next());
    }
}
