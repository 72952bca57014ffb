use crate::{
    api::{CommentRecord, CommentSource, Cursor, Page, Scope},
    Error,
};

/// Fetches a single page for `scope`, tagging failures with where they happened.
///
/// This is a pure I/O boundary: no retry, no caching. Items that are not direct
/// children of `scope` are kept (the assembler files them as provisional roots)
/// but logged, as the server contract says they should never show up.
pub(crate) async fn fetch_page<S>(
    source: &S,
    scope: &Scope,
    cursor: Option<&Cursor>,
) -> Result<Page<CommentRecord>, Error>
where
    S: CommentSource + ?Sized,
{
    tracing::debug!(?scope, ?cursor, "fetching comment page");
    let page = source
        .fetch_page(scope, cursor)
        .await
        .map_err(|source| Error::FetchFailed {
            scope: scope.clone(),
            cursor: cursor.cloned(),
            source,
        })?;
    for c in page.items.iter() {
        let direct = match scope {
            Scope::Post(post) => c.parent_id.is_none() && c.post_id == *post,
            Scope::Parent(parent) => c.parent_id.as_ref() == Some(parent),
        };
        if !direct {
            tracing::warn!(?scope, comment = %c.id, parent = ?c.parent_id, "page returned a comment outside of its scope");
        }
    }
    tracing::debug!(?scope, items = page.items.len(), last = page.is_last(), "fetched comment page");
    Ok(page)
}

/// Cursor bookkeeping for one paginated scope
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Pagination {
    next: Option<Cursor>,
    started: bool,
}

impl Pagination {
    /// Whether at least one page came back
    pub fn started(&self) -> bool {
        self.started
    }

    /// Whether another page can be requested
    pub fn has_more(&self) -> bool {
        !self.started || self.next.is_some()
    }

    /// Whether pages beyond the ones already fetched exist
    pub fn has_more_after_first(&self) -> bool {
        self.started && self.next.is_some()
    }

    pub fn next_cursor(&self) -> Option<&Cursor> {
        self.next.as_ref()
    }

    pub fn record(&mut self, next: Option<Cursor>) {
        self.started = true;
        self.next = next;
    }
}
