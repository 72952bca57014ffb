use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use threadline_api::{
    AuthorRef, CommentId, CommentRecord, CommentSource, Cursor, Error, LikeState, NewComment,
    Page, PostId, Time,
};
use tokio::sync::Semaphore;
use uuid::Uuid;

mod http;
pub use http::router;

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Kinds of calls, for failure injection and gating
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Op {
    FetchRoots,
    FetchReplies,
    Create,
    Like,
    Delete,
}

/// In-memory comment server with a single viewer.
///
/// Besides answering like the real thing, it lets tests make the next call of
/// some kind fail, or hold calls until released to force interleavings.
pub struct MockServer {
    page_size: usize,
    viewer: AuthorRef,
    comments: Mutex<BTreeMap<CommentId, CommentRecord>>,
    failures: Mutex<HashMap<Op, VecDeque<Error>>>,
    gates: Mutex<HashMap<Op, Arc<Semaphore>>>,
    calls: Mutex<HashMap<Op, usize>>,
}

fn encode_cursor(r: &CommentRecord) -> Cursor {
    Cursor(format!(
        "{}|{}",
        r.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        r.id
    ))
}

fn decode_cursor(c: &Cursor) -> Result<(Time, CommentId), Error> {
    let invalid = || Error::InvalidCursor(c.0.clone());
    let (time, id) = c.0.split_once('|').ok_or_else(invalid)?;
    let time = DateTime::parse_from_rfc3339(time).map_err(|_| invalid())?;
    Ok((time.with_timezone(&Utc), CommentId::new(id)))
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            page_size: DEFAULT_PAGE_SIZE,
            viewer: AuthorRef::stub(),
            comments: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> MockServer {
        self.page_size = std::cmp::max(1, page_size);
        self
    }

    pub fn with_viewer(mut self, viewer: AuthorRef) -> MockServer {
        self.viewer = viewer;
        self
    }

    /// Stores records as-is, replacing any comment with the same id
    pub fn seed(&self, records: Vec<CommentRecord>) {
        let mut comments = self.comments.lock();
        for r in records {
            comments.insert(r.id.clone(), r);
        }
    }

    pub fn get(&self, id: &CommentId) -> Option<CommentRecord> {
        self.comments.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.comments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.lock().is_empty()
    }

    /// Makes the next call of kind `op` fail with `err`
    pub fn fail_next(&self, op: Op, err: Error) {
        self.failures.lock().entry(op).or_default().push_back(err);
    }

    /// Holds every subsequent call of kind `op` until `release` lets it through
    pub fn gate(&self, op: Op) {
        self.gates
            .lock()
            .entry(op)
            .or_insert_with(|| Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, op: Op, n: usize) {
        if let Some(g) = self.gates.lock().get(&op) {
            g.add_permits(n);
        }
    }

    /// Lets calls of kind `op` through freely again
    pub fn ungate(&self, op: Op) {
        if let Some(g) = self.gates.lock().remove(&op) {
            g.close();
        }
    }

    /// Number of calls of kind `op` received so far, held ones included
    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    async fn enter(&self, op: Op) -> Result<(), Error> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        let gate = self.gates.lock().get(&op).cloned();
        if let Some(gate) = gate {
            // a closed gate means ungate() was called while we waited
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        match self.failures.lock().get_mut(&op).and_then(|f| f.pop_front()) {
            Some(err) => {
                tracing::debug!(?op, %err, "injected failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn page(
        &self,
        mut items: Vec<CommentRecord>,
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error> {
        items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        if let Some(c) = cursor {
            let (time, id) = decode_cursor(c)?;
            let after = (std::cmp::Reverse(time), &id);
            items.retain(|r| r.sort_key() > after);
        }
        let next_cursor = match items.len() > self.page_size {
            true => {
                items.truncate(self.page_size);
                items.last().map(encode_cursor)
            }
            false => None,
        };
        Ok(Page { items, next_cursor })
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

#[async_trait]
impl CommentSource for MockServer {
    async fn fetch_root_comments(
        &self,
        post: &PostId,
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error> {
        self.enter(Op::FetchRoots).await?;
        let items = self
            .comments
            .lock()
            .values()
            .filter(|c| c.post_id == *post && c.parent_id.is_none())
            .cloned()
            .collect();
        self.page(items, cursor)
    }

    async fn fetch_replies(
        &self,
        parent: &CommentId,
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error> {
        self.enter(Op::FetchReplies).await?;
        let items = {
            let comments = self.comments.lock();
            if !comments.contains_key(parent) {
                return Err(Error::NotFound(parent.0.clone()));
            }
            comments
                .values()
                .filter(|c| c.parent_id.as_ref() == Some(parent))
                .cloned()
                .collect()
        };
        self.page(items, cursor)
    }

    async fn create_comment(&self, comment: NewComment) -> Result<CommentRecord, Error> {
        self.enter(Op::Create).await?;
        let mut comments = self.comments.lock();
        if let Some(p) = &comment.parent_id {
            match comments.get_mut(p) {
                Some(parent) if parent.post_id == comment.post_id => parent.reply_count += 1,
                _ => return Err(Error::NotFound(p.0.clone())),
            }
        }
        let now = Utc::now();
        let record = CommentRecord {
            id: CommentId(Uuid::new_v4().to_string()),
            post_id: comment.post_id,
            parent_id: comment.parent_id,
            author: self.viewer.clone(),
            content: comment.content,
            like_count: 0,
            reply_count: 0,
            viewer_has_liked: false,
            created_at: now,
            updated_at: now,
        };
        comments.insert(record.id.clone(), record.clone());
        tracing::debug!(comment = %record.id, "created comment");
        Ok(record)
    }

    async fn toggle_like(&self, comment: &CommentId, desired: bool) -> Result<LikeState, Error> {
        self.enter(Op::Like).await?;
        let mut comments = self.comments.lock();
        let c = comments
            .get_mut(comment)
            .ok_or_else(|| Error::NotFound(comment.0.clone()))?;
        let state = c.like_state().toward(desired);
        c.like_count = state.like_count;
        c.viewer_has_liked = state.viewer_has_liked;
        Ok(state)
    }

    async fn delete_comment(&self, comment: &CommentId) -> Result<(), Error> {
        self.enter(Op::Delete).await?;
        let mut comments = self.comments.lock();
        let removed = comments
            .remove(comment)
            .ok_or_else(|| Error::NotFound(comment.0.clone()))?;
        if let Some(p) = removed.parent_id.as_ref().and_then(|p| comments.get_mut(p)) {
            p.reply_count = p.reply_count.saturating_sub(1);
        }
        let mut stack = vec![removed.id];
        while let Some(id) = stack.pop() {
            let children = comments
                .values()
                .filter(|c| c.parent_id.as_ref() == Some(&id))
                .map(|c| c.id.clone())
                .collect::<Vec<_>>();
            for c in children {
                comments.remove(&c);
                stack.push(c);
            }
        }
        Ok(())
    }
}
