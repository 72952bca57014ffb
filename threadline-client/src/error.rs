use std::fmt;

use crate::api::{self, CommentId, Cursor, PostId, Scope};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MutationKind {
    Create,
    Like,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Create => "create",
            MutationKind::Like => "like",
            MutationKind::Delete => "delete",
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// Retrying the same call is safe, cursors are stable
    #[error("Failed fetching {scope:?} at cursor {cursor:?}: {source}")]
    FetchFailed {
        scope: Scope,
        cursor: Option<Cursor>,
        source: api::Error,
    },

    /// The optimistic change has already been rolled back when this is returned
    #[error("Failed to {kind} comment {target}: {source}")]
    MutationFailed {
        kind: MutationKind,
        target: CommentId,
        /// Content of a failed create, handed back so it can be re-submitted
        unsent_content: Option<String>,
        source: api::Error,
    },

    #[error("Comment {id} cannot hang under {parent}, it would create a cycle")]
    InconsistentParent { id: CommentId, parent: CommentId },

    #[error("Unknown comment {0}")]
    UnknownComment(CommentId),

    #[error("Comment {0} is not confirmed by the server yet")]
    NotConfirmed(CommentId),

    #[error("Post {0} is not open")]
    UnknownPost(PostId),

    #[error("Thread for post {0} has been torn down")]
    TornDown(PostId),
}

impl Error {
    /// The text a failed reply carried, if any
    pub fn into_unsent_content(self) -> Option<String> {
        match self {
            Error::MutationFailed { unsent_content, .. } => unsent_content,
            _ => None,
        }
    }
}
