//! Catalog entries and their drafts.

use serde::{Deserialize, Serialize};

use crate::types::BookId;

/// Catalog entry with copy accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Stable book identifier.
    pub id: BookId,
    /// Title, unique among non-deleted books.
    pub title: String,
    /// Author display text.
    pub author: Option<String>,
    /// Free-text category used for fine lookup.
    pub category: Option<String>,
    /// ISBN, unique among non-deleted books when present.
    pub isbn: Option<String>,
    /// Copies owned by the library.
    pub total_copies: u32,
    /// Copies currently on the shelf.
    pub available_copies: u32,
    /// True when at least one copy can be lent.
    pub is_available: bool,
    /// Soft-delete marker.
    pub deleted: bool,
}

impl Book {
    /// Re-derives [`Book::is_available`] from the available copy count.
    pub fn refresh_availability(&mut self) {
        self.is_available = self.available_copies > 0;
    }

    /// Returns true when the copy counts and availability flag agree.
    pub fn is_consistent(&self) -> bool {
        self.available_copies <= self.total_copies
            && self.is_available == (self.available_copies > 0)
    }
}

/// Insert payload used to create a new [`Book`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewBook {
    /// Title.
    pub title: String,
    /// Author.
    pub author: Option<String>,
    /// Category.
    pub category: Option<String>,
    /// ISBN.
    pub isbn: Option<String>,
    /// Initial copy count; all copies start available.
    pub total_copies: u32,
}

impl NewBook {
    /// Materializes the draft under `id`.
    pub fn into_book(self, id: BookId) -> Book {
        Book {
            id,
            title: self.title,
            author: self.author,
            category: self.category,
            isbn: self.isbn,
            total_copies: self.total_copies,
            available_copies: self.total_copies,
            is_available: self.total_copies > 0,
            deleted: false,
        }
    }
}
