use async_trait::async_trait;

use crate::{CommentId, CommentRecord, Cursor, Error, LikeState, NewComment, PostId};

/// What a page of comments is fetched for: root comments of a post, or the
/// direct replies to one comment
#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Scope {
    Post(PostId),
    Parent(CommentId),
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,

    /// None once the scope is exhausted
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn empty() -> Page<T> {
        Page {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// The REST collaborators the comment engine talks to.
///
/// Pages only ever contain direct children of their scope, ordered newest
/// first with ties broken by ascending id. Implementations do not retry.
#[async_trait]
pub trait CommentSource: Send + Sync {
    async fn fetch_root_comments(
        &self,
        post: &PostId,
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error>;

    async fn fetch_replies(
        &self,
        parent: &CommentId,
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error>;

    async fn create_comment(&self, comment: NewComment) -> Result<CommentRecord, Error>;

    async fn toggle_like(&self, comment: &CommentId, desired: bool) -> Result<LikeState, Error>;

    async fn delete_comment(&self, comment: &CommentId) -> Result<(), Error>;

    async fn fetch_page(
        &self,
        scope: &Scope,
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error> {
        match scope {
            Scope::Post(post) => self.fetch_root_comments(post, cursor).await,
            Scope::Parent(parent) => self.fetch_replies(parent, cursor).await,
        }
    }
}

#[async_trait]
impl<S: CommentSource + ?Sized> CommentSource for std::sync::Arc<S> {
    async fn fetch_root_comments(
        &self,
        post: &PostId,
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error> {
        (**self).fetch_root_comments(post, cursor).await
    }

    async fn fetch_replies(
        &self,
        parent: &CommentId,
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error> {
        (**self).fetch_replies(parent, cursor).await
    }

    async fn create_comment(&self, comment: NewComment) -> Result<CommentRecord, Error> {
        (**self).create_comment(comment).await
    }

    async fn toggle_like(&self, comment: &CommentId, desired: bool) -> Result<LikeState, Error> {
        (**self).toggle_like(comment, desired).await
    }

    async fn delete_comment(&self, comment: &CommentId) -> Result<(), Error> {
        (**self).delete_comment(comment).await
    }
}
