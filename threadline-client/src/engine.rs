use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    api::{CommentId, CommentSource, PostId},
    Error, Thread, ThreadConfig, VisibleNode,
};

/// Every comment thread currently open, keyed by post
pub struct Engine<S: ?Sized> {
    config: ThreadConfig,
    threads: RwLock<HashMap<PostId, Arc<Thread<S>>>>,
    source: Arc<S>,
}

impl<S: CommentSource + ?Sized> Engine<S> {
    pub fn new(source: Arc<S>, config: ThreadConfig) -> Engine<S> {
        Engine {
            config,
            threads: RwLock::new(HashMap::new()),
            source,
        }
    }

    /// Returns the thread for `post`, creating an empty one if needed
    pub fn open(&self, post: &PostId) -> Arc<Thread<S>> {
        if let Some(t) = self.threads.read().get(post) {
            return t.clone();
        }
        self.threads
            .write()
            .entry(post.clone())
            .or_insert_with(|| {
                tracing::debug!(%post, "opening comment thread");
                Arc::new(Thread::new(
                    post.clone(),
                    self.source.clone(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    pub fn thread(&self, post: &PostId) -> Option<Arc<Thread<S>>> {
        self.threads.read().get(post).cloned()
    }

    /// Tears down the thread of `post`; requests still in flight for it will
    /// not touch any other thread
    pub fn close(&self, post: &PostId) -> bool {
        match self.threads.write().remove(post) {
            Some(t) => {
                t.close();
                true
            }
            None => false,
        }
    }

    pub fn get_visible_nodes(&self, post: &PostId) -> Result<Vec<VisibleNode>, Error> {
        Ok(self
            .thread(post)
            .ok_or_else(|| Error::UnknownPost(post.clone()))?
            .visible_nodes())
    }

    fn thread_of(&self, id: &CommentId) -> Result<Arc<Thread<S>>, Error> {
        self.threads
            .read()
            .values()
            .find(|t| t.contains(id))
            .cloned()
            .ok_or_else(|| Error::UnknownComment(id.clone()))
    }

    pub async fn expand(&self, id: &CommentId) -> Result<(), Error> {
        self.thread_of(id)?.expand(id).await
    }

    pub fn collapse(&self, id: &CommentId) -> Result<(), Error> {
        self.thread_of(id)?.collapse(id)
    }

    pub async fn load_more_replies(&self, id: &CommentId) -> Result<(), Error> {
        self.thread_of(id)?.load_more_replies(id).await
    }

    pub async fn submit_reply(&self, parent: &CommentId, content: String) -> Result<CommentId, Error> {
        self.thread_of(parent)?
            .submit_reply(Some(parent), content)
            .await
    }

    /// Posts a root-level comment on `post`
    pub async fn submit_comment(&self, post: &PostId, content: String) -> Result<CommentId, Error> {
        self.thread(post)
            .ok_or_else(|| Error::UnknownPost(post.clone()))?
            .submit_reply(None, content)
            .await
    }

    pub async fn toggle_like(&self, id: &CommentId) -> Result<(), Error> {
        self.thread_of(id)?.toggle_like(id).await
    }

    pub async fn delete_comment(&self, id: &CommentId) -> Result<(), Error> {
        self.thread_of(id)?.delete_comment(id).await
    }
}
