use std::cmp::Reverse;

use crate::{CommentId, PostId, Time, UserId};

/// Snapshot of the author at the time the comment was served
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorRef {
    pub id: UserId,
    pub display_name: String,
    pub avatar: Option<String>,
}

impl AuthorRef {
    pub fn stub() -> AuthorRef {
        AuthorRef {
            id: UserId::stub(),
            display_name: String::from("anonymous"),
            avatar: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub id: CommentId,
    pub post_id: PostId,

    /// None for comments posted directly on the post
    #[serde(default)]
    pub parent_id: Option<CommentId>,

    #[serde(rename = "authorRef")]
    pub author: AuthorRef,
    pub content: String,

    // counters as seen by the server when this record was served
    pub like_count: u64,
    pub reply_count: u64,
    pub viewer_has_liked: bool,

    pub created_at: Time,
    pub updated_at: Time,
}

impl CommentRecord {
    /// Newest first, ties broken by ascending id
    pub fn sort_key(&self) -> (Reverse<Time>, &CommentId) {
        (Reverse(self.created_at), &self.id)
    }

    pub fn like_state(&self) -> LikeState {
        LikeState {
            like_count: self.like_count,
            viewer_has_liked: self.viewer_has_liked,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub post_id: PostId,
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<CommentId>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub like_count: u64,
    pub viewer_has_liked: bool,
}

impl LikeState {
    /// The state the server should reach once it applies `desired`
    pub fn toward(self, desired: bool) -> LikeState {
        match (self.viewer_has_liked, desired) {
            (false, true) => LikeState {
                like_count: self.like_count + 1,
                viewer_has_liked: true,
            },
            (true, false) => LikeState {
                like_count: self.like_count.saturating_sub(1),
                viewer_has_liked: false,
            },
            _ => self,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LikeRequest {
    pub desired: bool,
}
