use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Limit/offset window requested by a caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Paging {
    pub limit: u32,
    pub offset: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<u32>,
}

impl Paging {
    /// Clamp raw query parameters into a usable window.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        Self {
            limit,
            offset: offset.unwrap_or(0),
            next: None,
        }
    }

    /// Fill in the offset of the following page when more records exist.
    pub fn with_total(mut self, total: u64) -> Self {
        let next = u64::from(self.offset) + u64::from(self.limit);
        self.next = if next < total { u32::try_from(next).ok() } else { None };
        self
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Search results envelope returned to API clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub total_records: u64,
    pub paging: Paging,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(total_records: u64, paging: Paging, results: Vec<T>) -> Self {
        Self {
            total_records,
            paging: paging.with_total(total_records),
            results,
        }
    }
}
