//! Bookmark sharing between sessions
//!
//! Sessions configured with the same [`BookmarkManager`] see each other's
//! commits without passing bookmarks by hand: every BEGIN includes the
//! manager's bookmarks and every commit feeds its bookmark back.

use arbor_core::Bookmarks;
use parking_lot::Mutex;
use std::fmt;

/// A shared, thread-safe source and sink of bookmarks
pub trait BookmarkManager: Send + Sync {
    /// Bookmarks a new transaction must wait for
    fn bookmarks(&self) -> Bookmarks;

    /// Record bookmarks produced by a commit
    fn update(&self, committed: &Bookmarks);
}

/// [`BookmarkManager`] keeping the union of everything it has seen
#[derive(Default)]
pub struct InMemoryBookmarkManager {
    bookmarks: Mutex<Bookmarks>,
}

impl InMemoryBookmarkManager {
    /// Manager starting from `initial`
    pub fn new(initial: Bookmarks) -> Self {
        Self {
            bookmarks: Mutex::new(initial),
        }
    }
}

impl fmt::Debug for InMemoryBookmarkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBookmarkManager")
            .field("bookmarks", &*self.bookmarks.lock())
            .finish()
    }
}

impl BookmarkManager for InMemoryBookmarkManager {
    fn bookmarks(&self) -> Bookmarks {
        self.bookmarks.lock().clone()
    }

    fn update(&self, committed: &Bookmarks) {
        let mut current = self.bookmarks.lock();
        *current = current.merge(committed);
    }
}
