//! Pure selection helpers over the record list.
//!
//! Selection lives on the records, so it survives page and filter changes.

use serde::Serialize;

use crate::record::TokenRecord;
use crate::view::{PageView, TokenFilter};

/// Tri-state header checkbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderCheck {
    /// Every visible row is selected.
    Checked,
    /// Some, not all, visible rows are selected.
    Indeterminate,
    /// No visible row is selected, or the page is empty.
    Unchecked,
}

/// Flip the flag of one token. Returns the new state, `None` when absent.
pub fn toggle_one(records: &mut [TokenRecord], token: &str) -> Option<bool> {
    let record = records.iter_mut().find(|record| record.token == token)?;
    record.selected = !record.selected;
    Some(record.selected)
}

/// Set the flag of every visible row (header checkbox).
pub fn set_visible(records: &mut [TokenRecord], page: &PageView, checked: bool) {
    for index in &page.indices {
        if let Some(record) = records.get_mut(*index) {
            record.selected = checked;
        }
    }
}

/// Select every visible row.
pub fn select_visible(records: &mut [TokenRecord], page: &PageView) {
    set_visible(records, page, true);
}

/// Select every record passing `filter`, across all pages.
pub fn select_filtered(records: &mut [TokenRecord], filter: TokenFilter) -> usize {
    let mut count = 0;
    for record in records.iter_mut().filter(|record| filter.matches(record)) {
        record.selected = true;
        count += 1;
    }
    count
}

/// Clear every flag.
pub fn clear_all(records: &mut [TokenRecord]) {
    for record in records {
        record.selected = false;
    }
}

/// Selected tokens in store order.
#[must_use]
pub fn selected_tokens(records: &[TokenRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|record| record.selected)
        .map(|record| record.token.clone())
        .collect()
}

/// Number of selected records.
#[must_use]
pub fn selected_count(records: &[TokenRecord]) -> usize {
    records.iter().filter(|record| record.selected).count()
}

/// Header state for the visible rows only.
#[must_use]
pub fn header_state(records: &[TokenRecord], page: &PageView) -> HeaderCheck {
    let visible = page.rows(records).count();
    let checked = page.rows(records).filter(|record| record.selected).count();
    match (visible, checked) {
        (0, _) | (_, 0) => HeaderCheck::Unchecked,
        (visible, checked) if visible == checked => HeaderCheck::Checked,
        _ => HeaderCheck::Indeterminate,
    }
}
