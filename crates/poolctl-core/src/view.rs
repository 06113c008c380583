//! Filtered, paginated view over the record store.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::Serialize;

use crate::error::PoolError;
use crate::record::TokenRecord;

/// Page sizes an operator may choose from.
pub const PAGE_SIZE_OPTIONS: [usize; 4] = [20, 50, 100, 200];

/// Page size used until the operator picks another one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Record filter applied before pagination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenFilter {
    /// Every record.
    #[default]
    All,
    /// Status `active`.
    Active,
    /// Status `cooling`.
    Cooling,
    /// Neither active nor cooling.
    Expired,
    /// Tagged `nsfw`.
    Nsfw,
    /// Not tagged `nsfw`.
    NoNsfw,
}

impl TokenFilter {
    /// Every filter, in display order.
    pub const ALL: [Self; 6] = [
        Self::All,
        Self::Active,
        Self::Cooling,
        Self::Expired,
        Self::Nsfw,
        Self::NoNsfw,
    ];

    /// Whether `record` passes the filter.
    #[must_use]
    pub fn matches(self, record: &TokenRecord) -> bool {
        match self {
            Self::All => true,
            Self::Active => record.is_active(),
            Self::Cooling => record.is_cooling(),
            Self::Expired => record.is_expired(),
            Self::Nsfw => record.is_nsfw(),
            Self::NoNsfw => !record.is_nsfw(),
        }
    }

    /// Wire/CLI label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Cooling => "cooling",
            Self::Expired => "expired",
            Self::Nsfw => "nsfw",
            Self::NoNsfw => "no-nsfw",
        }
    }
}

impl Display for TokenFilter {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for TokenFilter {
    type Err = PoolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|filter| filter.as_str() == wanted)
            .ok_or_else(|| {
                PoolError::validation(
                    "filter",
                    format!(
                        "unknown filter '{value}' (expected all, active, cooling, expired, nsfw or no-nsfw)"
                    ),
                )
            })
    }
}

/// Reject page sizes outside [`PAGE_SIZE_OPTIONS`].
///
/// # Errors
///
/// Returns a validation error naming the allowed sizes.
pub fn validate_page_size(page_size: usize) -> Result<usize, PoolError> {
    if PAGE_SIZE_OPTIONS.contains(&page_size) {
        Ok(page_size)
    } else {
        Err(PoolError::validation(
            "page_size",
            format!("page size must be one of {PAGE_SIZE_OPTIONS:?}"),
        ))
    }
}

/// `max(1, ceil(count / page_size))`.
#[must_use]
pub const fn total_pages(count: usize, page_size: usize) -> usize {
    if page_size == 0 || count == 0 {
        1
    } else {
        count.div_ceil(page_size)
    }
}

/// Clamp a 1-based page into `[1, total_pages]`.
#[must_use]
pub fn clamp_page(page: usize, total_pages: usize) -> usize {
    page.clamp(1, total_pages.max(1))
}

/// One computed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageView {
    /// Filter the page was computed with.
    pub filter: TokenFilter,
    /// Records matching the filter.
    pub total_count: usize,
    /// Number of pages at the current size.
    pub total_pages: usize,
    /// Effective 1-based page after clamping.
    pub page: usize,
    /// Page size used.
    pub page_size: usize,
    /// Store indices of the visible records, in store order.
    pub indices: Vec<usize>,
}

impl PageView {
    /// Borrow the visible records.
    pub fn rows<'a>(&'a self, records: &'a [TokenRecord]) -> impl Iterator<Item = &'a TokenRecord> {
        self.indices.iter().filter_map(|index| records.get(*index))
    }

    /// True when no record is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Compute the visible page. Pure: the store is only read.
#[must_use]
pub fn compute_page(
    records: &[TokenRecord],
    filter: TokenFilter,
    page: usize,
    page_size: usize,
) -> PageView {
    let matching: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| filter.matches(record))
        .map(|(index, _)| index)
        .collect();
    let total_count = matching.len();
    let total_pages = total_pages(total_count, page_size);
    let page = clamp_page(page, total_pages);
    let start = (page - 1).saturating_mul(page_size);
    let indices = matching
        .into_iter()
        .skip(start)
        .take(page_size)
        .collect();
    PageView {
        filter,
        total_count,
        total_pages,
        page,
        page_size,
        indices,
    }
}

/// Navigation state owned by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewState {
    /// Active filter.
    pub filter: TokenFilter,
    /// Requested 1-based page.
    pub page: usize,
    /// Active page size.
    pub page_size: usize,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            filter: TokenFilter::All,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ViewState {
    /// Compute the page and write the clamped page number back.
    pub fn refresh(&mut self, records: &[TokenRecord]) -> PageView {
        let view = compute_page(records, self.filter, self.page, self.page_size);
        self.page = view.page;
        view
    }

    /// Switch filter, keeping the page when still in range.
    pub fn set_filter(&mut self, records: &[TokenRecord], filter: TokenFilter) -> PageView {
        self.filter = filter;
        self.refresh(records)
    }

    /// Switch page size.
    ///
    /// # Errors
    ///
    /// Rejects sizes outside [`PAGE_SIZE_OPTIONS`].
    pub fn set_page_size(
        &mut self,
        records: &[TokenRecord],
        page_size: usize,
    ) -> Result<PageView, PoolError> {
        self.page_size = validate_page_size(page_size)?;
        Ok(self.refresh(records))
    }

    /// Jump to a page; out-of-range values are clamped.
    pub fn go_to(&mut self, records: &[TokenRecord], page: usize) -> PageView {
        self.page = page;
        self.refresh(records)
    }
}
