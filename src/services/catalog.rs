//! Catalog maintenance: ingestion, edits, soft delete, and filtered listing.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    book::{Book, NewBook},
    engine::traits::{CatalogStore, Transactional},
    error::{LibraryError, LibraryResult},
    types::BookId,
};

/// Page size used when a request asks for zero items.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Catalog submission for a title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSubmission {
    /// Title; matched exactly (after trimming) against existing books.
    pub title: String,
    /// Author.
    pub author: Option<String>,
    /// Category.
    pub category: Option<String>,
    /// ISBN.
    pub isbn: Option<String>,
    /// Copies being added.
    pub total_copies: u32,
}

/// Sparse edit where each non-blank field overwrites the book value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookUpdate {
    /// Replacement title.
    pub title: Option<String>,
    /// Replacement author.
    pub author: Option<String>,
    /// Replacement category.
    pub category: Option<String>,
    /// Replacement ISBN.
    pub isbn: Option<String>,
    /// Replacement total copy count; zero leaves counts alone.
    pub total_copies: u32,
}

/// Listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookFilter {
    /// Only books in this category.
    pub category: Option<String>,
    /// Only books whose availability flag equals this value.
    pub available: Option<bool>,
}

/// Listing sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Title, ascending.
    #[default]
    Title,
    /// Author, ascending, books without one first.
    Author,
    /// Category, ascending, books without one first.
    Category,
    /// Catalog id.
    Id,
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page index.
    pub page: u32,
    /// Items per page; zero selects [`DEFAULT_PAGE_SIZE`].
    pub size: u32,
    /// Sort key.
    pub sort_by: SortBy,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            sort_by: SortBy::Title,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Page index served.
    pub page: u32,
    /// Page size served.
    pub size: u32,
    /// Matches across all pages.
    pub total: usize,
}

/// Adds copies to the existing title or catalogs a new book.
pub fn submit_book<S>(store: &mut S, submission: BookSubmission) -> LibraryResult<Book>
where
    S: CatalogStore + Transactional,
{
    let title = non_blank(Some(&submission.title))
        .ok_or_else(|| LibraryError::InvalidInput("Title must be provided".to_string()))?;
    if submission.total_copies == 0 {
        return Err(LibraryError::InvalidInput("Total copies must be at least 1".to_string()));
    }
    let isbn = non_blank(submission.isbn.as_deref());

    store.with_transaction(|store| {
        if let Some(isbn) = &isbn {
            if store.find_book_by_isbn(isbn).is_some() {
                return Err(LibraryError::Duplicate(
                    "A book with this ISBN already exists.".to_string(),
                ));
            }
        }

        let book = match store.find_book_by_title(&title) {
            Some(mut book) => {
                let added = submission.total_copies;
                book.total_copies = book.total_copies.saturating_add(added);
                book.available_copies = book.available_copies.saturating_add(added);
                book.refresh_availability();
                store.save_book(book)?
            }
            None => store.insert_book(NewBook {
                title,
                author: submission.author,
                category: submission.category,
                isbn,
                total_copies: submission.total_copies,
            })?,
        };

        debug!(book_id = book.id, total = book.total_copies, "catalog submission stored");
        Ok(book)
    })
}

/// Non-deleted book by id.
pub fn get_book<S: CatalogStore>(store: &S, id: BookId) -> LibraryResult<Book> {
    store
        .find_book(id)
        .ok_or_else(|| LibraryError::book_not_found(id))
}

/// Applies `update` to a non-deleted book.
///
/// A new total shifts the available count by the same difference, floored at
/// zero.
pub fn update_book<S>(store: &mut S, id: BookId, update: BookUpdate) -> LibraryResult<Book>
where
    S: CatalogStore + Transactional,
{
    store.with_transaction(|store| {
        let mut book = get_book(store, id)?;

        if let Some(title) = non_blank(update.title.as_deref()) {
            book.title = title;
        }
        if let Some(author) = non_blank_raw(update.author) {
            book.author = Some(author);
        }
        if let Some(category) = non_blank_raw(update.category) {
            book.category = Some(category);
        }
        if let Some(isbn) = non_blank(update.isbn.as_deref()) {
            book.isbn = Some(isbn);
        }

        if update.total_copies > 0 {
            let diff = i64::from(update.total_copies) - i64::from(book.total_copies);
            let available = (i64::from(book.available_copies) + diff)
                .clamp(0, i64::from(update.total_copies));
            book.total_copies = update.total_copies;
            book.available_copies = available as u32;
        }
        book.refresh_availability();

        let book = store.save_book(book)?;
        debug!(book_id = book.id, "book updated");
        Ok(book)
    })
}

/// Marks a non-deleted book as deleted; it disappears from every lookup.
pub fn soft_delete_book<S>(store: &mut S, id: BookId) -> LibraryResult<()>
where
    S: CatalogStore + Transactional,
{
    store.with_transaction(|store| {
        let mut book = get_book(store, id)?;
        book.deleted = true;
        store.save_book(book)?;
        debug!(book_id = id, "book soft-deleted");
        Ok(())
    })
}

/// Filtered, sorted, paginated view of the non-deleted catalog.
pub fn list_books<S: CatalogStore>(
    store: &S,
    filter: &BookFilter,
    page: PageRequest,
) -> Page<Book> {
    let mut books = match non_blank(filter.category.as_deref()) {
        Some(category) => store.books_in_category(&category),
        None => store.all_books(),
    };
    if let Some(available) = filter.available {
        books.retain(|b| b.is_available == available);
    }

    match page.sort_by {
        SortBy::Title => books.sort_by(|a, b| a.title.cmp(&b.title)),
        SortBy::Author => books.sort_by(|a, b| a.author.cmp(&b.author)),
        SortBy::Category => books.sort_by(|a, b| a.category.cmp(&b.category)),
        SortBy::Id => books.sort_by_key(|b| b.id),
    }

    let size = if page.size == 0 { DEFAULT_PAGE_SIZE } else { page.size };
    let total = books.len();
    let start = (page.page as usize).saturating_mul(size as usize).min(total);
    let end = start.saturating_add(size as usize).min(total);

    Page {
        items: books.drain(start..end).collect(),
        page: page.page,
        size,
        total,
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn non_blank_raw(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
