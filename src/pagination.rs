//! Dual-mode pagination over a listing with an offset ceiling.
//!
//! The listing accepts a numeric `offset` up to [`OFFSET_CEILING`]. Past that
//! point the only way forward is a `before` cursor holding the timestamp of
//! the last item already seen. A [`PaginationState`] starts in offset mode and
//! switches to timestamp mode exactly once.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest offset the upstream listing accepts.
pub const OFFSET_CEILING: u32 = 1000;
/// Upstream hard cap on items per page.
pub const MAX_PAGE_LIMIT: u32 = 20;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaginationError {
    #[error("invalid pagination: {0}")]
    InvalidPagination(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Offset,
    BeforeTimestamp,
}

/// The single pagination parameter sent with a page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Offset(u32),
    BeforeTimestamp(i64),
}

impl Cursor {
    pub fn mode(&self) -> Mode {
        match self {
            Cursor::Offset(_) => Mode::Offset,
            Cursor::BeforeTimestamp(_) => Mode::BeforeTimestamp,
        }
    }
}

/// Parameters for one upstream page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Cursor,
    pub limit: u32,
}

impl PageRequest {
    /// Build a request from loose parameters, e.g. CLI flags.
    /// Exactly one of `offset` / `before` must be given.
    pub fn from_params(
        limit: u32,
        offset: Option<u32>,
        before: Option<i64>,
    ) -> Result<Self, PaginationError> {
        let cursor = cursor_from_parts(offset, before)?;
        Ok(Self {
            cursor,
            limit: clamp_limit(limit),
        })
    }

    pub fn mode(&self) -> Mode {
        self.cursor.mode()
    }

    pub fn offset(&self) -> Option<u32> {
        match self.cursor {
            Cursor::Offset(n) => Some(n),
            Cursor::BeforeTimestamp(_) => None,
        }
    }

    pub fn before_timestamp(&self) -> Option<i64> {
        match self.cursor {
            Cursor::Offset(_) => None,
            Cursor::BeforeTimestamp(ts) => Some(ts),
        }
    }

    /// Query parameters for the request: `limit` plus exactly one of
    /// `offset` or `before`.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let paging = match self.cursor {
            Cursor::Offset(n) => ("offset", n.to_string()),
            Cursor::BeforeTimestamp(ts) => ("before", ts.to_string()),
        };
        vec![("limit", self.limit.to_string()), paging]
    }
}

/// What a fetched page tells the cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageOutcome {
    pub item_count: usize,
    pub last_item_timestamp: Option<i64>,
    pub total_count: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredState", into = "StoredState")]
pub struct PaginationState {
    cursor: Cursor,
    total_count: Option<u64>,
    has_more: bool,
    reached_offset_ceiling: bool,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            cursor: Cursor::Offset(0),
            total_count: None,
            has_more: true,
            reached_offset_ceiling: false,
        }
    }
}

impl PaginationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at an arbitrary offset (resuming a previous walk).
    pub fn at_offset(offset: u32) -> Result<Self, PaginationError> {
        Self::from_parts(Some(offset), None)
    }

    /// Start strictly before `timestamp`. The ceiling is considered passed.
    pub fn before(timestamp: i64) -> Self {
        Self {
            cursor: Cursor::BeforeTimestamp(timestamp),
            reached_offset_ceiling: true,
            ..Self::default()
        }
    }

    /// Rebuild a state from the two optional fields used on the wire and in
    /// persisted state.
    pub fn from_parts(offset: Option<u32>, before: Option<i64>) -> Result<Self, PaginationError> {
        match cursor_from_parts(offset, before)? {
            Cursor::Offset(n) => Ok(Self {
                cursor: Cursor::Offset(n),
                ..Self::default()
            }),
            Cursor::BeforeTimestamp(ts) => Ok(Self::before(ts)),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn mode(&self) -> Mode {
        self.cursor.mode()
    }

    pub fn offset(&self) -> Option<u32> {
        match self.cursor {
            Cursor::Offset(n) => Some(n),
            Cursor::BeforeTimestamp(_) => None,
        }
    }

    pub fn before_timestamp(&self) -> Option<i64> {
        match self.cursor {
            Cursor::Offset(_) => None,
            Cursor::BeforeTimestamp(ts) => Some(ts),
        }
    }

    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn reached_offset_ceiling(&self) -> bool {
        self.reached_offset_ceiling
    }

    /// Parameters for the next page. `limit` is clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn next_request(&self, limit: u32) -> PageRequest {
        let cursor = match self.cursor {
            Cursor::Offset(n) => Cursor::Offset(n.min(OFFSET_CEILING)),
            other => other,
        };
        PageRequest {
            cursor,
            limit: clamp_limit(limit),
        }
    }

    /// Fold a fetched page back into the state. `limit` must be the value the
    /// page was requested with.
    pub fn advance(&self, limit: u32, page: PageOutcome) -> PaginationState {
        let limit = clamp_limit(limit);
        let mut next = *self;
        if next.total_count.is_none() {
            next.total_count = page.total_count;
        }

        if page.item_count == 0 {
            next.has_more = false;
            return next;
        }
        next.has_more = page.item_count >= limit as usize;

        match self.cursor {
            Cursor::Offset(offset) => {
                if offset + limit >= OFFSET_CEILING {
                    next.reached_offset_ceiling = true;
                    if next.has_more {
                        match page.last_item_timestamp {
                            Some(ts) => next.cursor = Cursor::BeforeTimestamp(ts),
                            None => next.has_more = false,
                        }
                    }
                } else if next.has_more {
                    next.cursor = Cursor::Offset(offset + limit);
                }
            }
            Cursor::BeforeTimestamp(before) => {
                if next.has_more {
                    match page.last_item_timestamp {
                        // A cursor that does not move backwards would return the same page forever.
                        Some(ts) if ts < before => next.cursor = Cursor::BeforeTimestamp(ts),
                        _ => next.has_more = false,
                    }
                }
            }
        }
        next
    }
}

fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}

fn cursor_from_parts(offset: Option<u32>, before: Option<i64>) -> Result<Cursor, PaginationError> {
    match (offset, before) {
        (Some(_), Some(_)) => Err(PaginationError::InvalidPagination(
            "offset and before are mutually exclusive",
        )),
        (None, None) => Err(PaginationError::InvalidPagination(
            "one of offset or before is required",
        )),
        (Some(n), None) if n > OFFSET_CEILING => Err(PaginationError::InvalidPagination(
            "offset exceeds the listing ceiling of 1000",
        )),
        (Some(n), None) => Ok(Cursor::Offset(n)),
        (None, Some(ts)) => Ok(Cursor::BeforeTimestamp(ts)),
    }
}

/// Flat form of [`PaginationState`] used for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredState {
    mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    before_timestamp: Option<i64>,
    #[serde(default)]
    total_count: Option<u64>,
    has_more: bool,
    #[serde(default)]
    reached_offset_ceiling: bool,
}

impl TryFrom<StoredState> for PaginationState {
    type Error = PaginationError;

    fn try_from(stored: StoredState) -> Result<Self, Self::Error> {
        let cursor = cursor_from_parts(stored.offset, stored.before_timestamp)?;
        if cursor.mode() != stored.mode {
            return Err(PaginationError::InvalidPagination(
                "mode does not match the cursor field that is set",
            ));
        }
        Ok(Self {
            cursor,
            total_count: stored.total_count,
            has_more: stored.has_more,
            reached_offset_ceiling: stored.reached_offset_ceiling
                || cursor.mode() == Mode::BeforeTimestamp,
        })
    }
}

impl From<PaginationState> for StoredState {
    fn from(state: PaginationState) -> Self {
        StoredState {
            mode: state.mode(),
            offset: state.offset(),
            before_timestamp: state.before_timestamp(),
            total_count: state.total_count,
            has_more: state.has_more,
            reached_offset_ceiling: state.reached_offset_ceiling,
        }
    }
}
