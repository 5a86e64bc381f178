//! Split, extract and remove: page selections copied into a fresh document
//!
//! Page numbers arrive 1-based and are validated against the source before
//! any page is copied.

use std::collections::BTreeSet;

use tracing::info;

use crate::error::{Error, RangeError, Result};
use crate::model::{Document, PageCopier};

/// Largest span a single `a-b` item may expand to
const MAX_RANGE_SPAN: i64 = 100_000;

/// Parse a page selection: either a JSON array (`[1, 3]`) or a comma list
/// with ranges (`1,3,5-7`)
///
/// Numbers are returned as given; bounds are checked later against the
/// document.
pub fn parse_page_list(input: &str) -> Result<Vec<i64>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("Page numbers are required".to_string()));
    }

    if trimmed.starts_with('[') {
        let pages: Vec<i64> = serde_json::from_str(trimmed)
            .map_err(|_| Error::Validation("Invalid page selection".to_string()))?;
        if pages.is_empty() {
            return Err(Error::Validation("Invalid page selection".to_string()));
        }
        return Ok(pages);
    }

    let mut pages = Vec::new();
    for item in trimmed.split(',').map(str::trim) {
        if item.is_empty() {
            return Err(Error::Validation("Invalid page selection".to_string()));
        }
        // A leading '-' is a sign, not a range separator
        let separator = item.get(1..).and_then(|rest| rest.find('-')).map(|i| i + 1);
        match separator {
            Some(at) => {
                let start = parse_page_number(&item[..at])?;
                let end = parse_page_number(&item[at + 1..])?;
                if start > end {
                    return Err(RangeError::StartAfterEnd {
                        start: start.max(0) as usize,
                        end: end.max(0) as usize,
                    }
                    .into());
                }
                if end - start >= MAX_RANGE_SPAN {
                    return Err(Error::Validation(format!("Page range {item} is too large")));
                }
                pages.extend(start..=end);
            }
            None => pages.push(parse_page_number(item)?),
        }
    }
    Ok(pages)
}

fn parse_page_number(text: &str) -> Result<i64> {
    text.trim()
        .parse()
        .map_err(|_| Error::Validation(format!("Page numbers must be numbers, got '{}'", text.trim())))
}

fn check_bound(page: i64, page_count: usize) -> Result<usize> {
    match usize::try_from(page) {
        Ok(n) if (1..=page_count).contains(&n) => Ok(n - 1),
        _ => Err(RangeError::OutOfBounds { page, page_count }.into()),
    }
}

/// Validate an inclusive 1-based range and return its 0-based indices
pub fn validate_range(start: i64, end: i64, page_count: usize) -> Result<Vec<usize>> {
    let first = check_bound(start, page_count)?;
    let last = check_bound(end, page_count)?;
    if first > last {
        return Err(RangeError::StartAfterEnd { start: first + 1, end: last + 1 }.into());
    }
    Ok((first..=last).collect())
}

/// Validate 1-based page numbers and return them 0-based, ascending and
/// without duplicates
pub fn validate_pages(pages: &[i64], page_count: usize) -> Result<BTreeSet<usize>> {
    if pages.is_empty() {
        return Err(Error::Validation("Page numbers are required".to_string()));
    }
    pages.iter().map(|&page| check_bound(page, page_count)).collect()
}

/// Copy pages `start..=end` (1-based) into a new document
pub fn split(source: &Document, start: i64, end: i64) -> Result<Document> {
    let indices = validate_range(start, end, source.page_count())?;
    let output = copy_selection(source, &indices)?;
    info!(start, end, pages = output.page_count(), "split document");
    Ok(output)
}

/// Copy the listed pages (1-based) into a new document in ascending order
pub fn extract(source: &Document, pages: &[i64]) -> Result<Document> {
    let selected = validate_pages(pages, source.page_count())?;
    let indices: Vec<usize> = selected.into_iter().collect();
    let output = copy_selection(source, &indices)?;
    info!(pages = output.page_count(), "extracted pages");
    Ok(output)
}

/// Copy every page except the listed ones (1-based) into a new document
pub fn remove(source: &Document, pages: &[i64]) -> Result<Document> {
    let page_count = source.page_count();
    let removed = validate_pages(pages, page_count)?;
    let keep: Vec<usize> = (0..page_count).filter(|i| !removed.contains(i)).collect();
    if keep.is_empty() {
        return Err(Error::EmptySelection { page_count });
    }
    let output = copy_selection(source, &keep)?;
    info!(removed = removed.len(), remaining = output.page_count(), "removed pages");
    Ok(output)
}

fn copy_selection(source: &Document, indices: &[usize]) -> Result<Document> {
    let mut output = Document::new();
    PageCopier::new(source).copy_pages(indices, &mut output)?;
    Ok(output)
}
