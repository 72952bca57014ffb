use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    api::{
        AuthorRef, CommentId, CommentRecord, CommentSource, Cursor, NewComment, PostId, Scope,
    },
    expansion::Fetch,
    fetcher::fetch_page,
    forest::Detached,
    view::Projection,
    CommentView, Error, Forest, MergeReport, MutationKind, NodeState, Overlay, Pagination,
    VisibleNode,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadConfig {
    /// Author of the comments submitted through this thread
    pub viewer: AuthorRef,
}

impl Default for ThreadConfig {
    fn default() -> ThreadConfig {
        ThreadConfig {
            viewer: AuthorRef::stub(),
        }
    }
}

#[derive(Debug)]
struct PendingDelete {
    detached: Detached,
    nodes: Vec<(CommentId, NodeState)>,
    overlays: Vec<(CommentId, Overlay)>,

    /// Failed deletes of comments that hung inside this subtree; they come
    /// back only if this delete fails too
    nested: Vec<PendingDelete>,
}

impl PendingDelete {
    /// Overlay of a comment held in this snapshot, created if missing
    fn overlay_mut(&mut self, id: &CommentId) -> Option<&mut Overlay> {
        if self.detached.ids().any(|c| c == id) {
            let i = match self.overlays.iter().position(|(c, _)| c == id) {
                Some(i) => i,
                None => {
                    self.overlays.push((id.clone(), Overlay::default()));
                    self.overlays.len() - 1
                }
            };
            return Some(&mut self.overlays[i].1);
        }
        self.nested.iter_mut().find_map(|n| n.overlay_mut(id))
    }

    /// Files `child` under the snapshot holding its parent, handing it back if
    /// there is none
    fn adopt(&mut self, mut child: PendingDelete) -> Result<(), PendingDelete> {
        let holds_parent = match child.detached.parent() {
            Some(p) => self.detached.ids().any(|c| c == p),
            None => false,
        };
        if holds_parent {
            self.nested.push(child);
            return Ok(());
        }
        for n in self.nested.iter_mut() {
            match n.adopt(child) {
                Ok(()) => return Ok(()),
                Err(c) => child = c,
            }
        }
        Err(child)
    }
}

#[derive(Debug)]
struct ThreadState {
    forest: Forest,
    nodes: HashMap<CommentId, NodeState>,
    overlays: HashMap<CommentId, Overlay>,
    roots: Pagination,
    roots_fetching: bool,
    pending_deletes: HashMap<CommentId, PendingDelete>,
    torn_down: bool,
}

impl ThreadState {
    fn check_alive(&self) -> Result<(), Error> {
        match self.torn_down {
            true => Err(Error::TornDown(self.forest.post().clone())),
            false => Ok(()),
        }
    }

    fn projection(&self) -> Projection<'_> {
        Projection {
            forest: &self.forest,
            nodes: &self.nodes,
            overlays: &self.overlays,
        }
    }

    fn node_mut(&mut self, id: &CommentId) -> &mut NodeState {
        self.nodes.entry(id.clone()).or_default()
    }

    fn overlay_mut(&mut self, id: &CommentId) -> &mut Overlay {
        self.overlays.entry(id.clone()).or_default()
    }

    fn prune_overlay(&mut self, id: &CommentId) {
        if self.overlays.get(id).map(Overlay::is_empty).unwrap_or(false) {
            self.overlays.remove(id);
        }
    }

    /// A comment that exists on the server, i.e. can be mutated
    fn confirmed_record(&self, id: &CommentId) -> Result<Arc<CommentRecord>, Error> {
        let record = self
            .forest
            .get(id)
            .ok_or_else(|| Error::UnknownComment(id.clone()))?;
        if id.is_provisional() {
            return Err(Error::NotConfirmed(id.clone()));
        }
        Ok(record.clone())
    }

    fn merge(&mut self, records: Vec<CommentRecord>) -> MergeReport {
        let report = self.forest.merge(records);
        for id in report.refreshed.iter() {
            if let Some(o) = self.overlays.get_mut(id) {
                o.refresh();
            }
            self.prune_overlay(id);
        }
        report
    }

    /// Overlay of a comment, whether attached or held by a pending delete
    fn any_overlay_mut(&mut self, id: &CommentId) -> Option<&mut Overlay> {
        if self.forest.contains(id) {
            return Some(self.overlay_mut(id));
        }
        self.pending_deletes
            .values_mut()
            .find_map(|p| p.overlay_mut(id))
    }

    fn restore(&mut self, mut pending: PendingDelete) {
        if let Some(p) = pending.detached.parent().cloned() {
            if !self.forest.contains(&p) {
                for owner in self.pending_deletes.values_mut() {
                    match owner.adopt(pending) {
                        Ok(()) => {
                            tracing::debug!(parent = %p, "parent is being deleted, restore waits for it");
                            return;
                        }
                        Err(back) => pending = back,
                    }
                }
                if self.forest.is_tombstoned(&p) {
                    tracing::debug!(comment = %pending.detached.root, parent = %p, "parent got deleted, not restoring");
                    return;
                }
            }
        }
        self.forest.reattach(pending.detached);
        for (id, mut state) in pending.nodes {
            // whatever was in flight has been dropped on the floor
            if state.is_fetching() {
                state.fetch_failed();
            }
            self.nodes.insert(id, state);
        }
        for (id, overlay) in pending.overlays {
            // a like still in flight lands here once restored
            if !overlay.is_empty() {
                self.overlays.insert(id, overlay);
            }
        }
        for n in pending.nested {
            self.restore(n);
        }
    }
}

/// The comment thread of one post.
///
/// All state sits behind a single lock: mutations take it for one short,
/// synchronous step at a time, and it is never held across a network call, so
/// readers always see a fully-applied update.
pub struct Thread<S: ?Sized> {
    post: PostId,
    config: ThreadConfig,
    state: RwLock<ThreadState>,
    source: Arc<S>,
}

impl<S: CommentSource + ?Sized> Thread<S> {
    pub fn new(post: PostId, source: Arc<S>, config: ThreadConfig) -> Thread<S> {
        Thread {
            state: RwLock::new(ThreadState {
                forest: Forest::new(post.clone()),
                nodes: HashMap::new(),
                overlays: HashMap::new(),
                roots: Pagination::default(),
                roots_fetching: false,
                pending_deletes: HashMap::new(),
                torn_down: false,
            }),
            post,
            config,
            source,
        }
    }

    pub fn post(&self) -> &PostId {
        &self.post
    }

    pub fn contains(&self, id: &CommentId) -> bool {
        self.state.read().forest.contains(id)
    }

    /// Tears the thread down: results of requests still in flight get dropped
    pub fn close(&self) {
        let mut st = self.state.write();
        st.torn_down = true;
        tracing::debug!(post = %self.post, "closed comment thread");
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.read().torn_down
    }

    pub fn visible_nodes(&self) -> Vec<VisibleNode> {
        self.state.read().projection().visible()
    }

    pub fn node(&self, id: &CommentId) -> Option<CommentView> {
        self.state.read().projection().view(id)
    }

    pub fn children(&self, id: &CommentId) -> Vec<CommentId> {
        self.state.read().forest.children(id).to_vec()
    }

    /// A copy of the assembled forest
    pub fn forest(&self) -> Forest {
        self.state.read().forest.clone()
    }

    pub fn has_more_roots(&self) -> bool {
        self.state.read().roots.has_more()
    }

    /// Merges records obtained elsewhere, e.g. from a push or a full refetch
    pub fn merge_records(&self, records: Vec<CommentRecord>) -> Result<MergeReport, Error> {
        let mut st = self.state.write();
        st.check_alive()?;
        Ok(st.merge(records))
    }

    /// Fetches the next page of root comments, if any
    pub async fn load_more_roots(&self) -> Result<(), Error> {
        let cursor = {
            let mut st = self.state.write();
            st.check_alive()?;
            if st.roots_fetching {
                tracing::debug!(post = %self.post, "root page already in flight");
                return Ok(());
            }
            if !st.roots.has_more() {
                return Ok(());
            }
            st.roots_fetching = true;
            st.roots.next_cursor().cloned()
        };
        let scope = Scope::Post(self.post.clone());
        let res = fetch_page(&*self.source, &scope, cursor.as_ref()).await;

        let mut st = self.state.write();
        st.roots_fetching = false;
        if st.torn_down {
            tracing::debug!(post = %self.post, "dropping root page fetched after teardown");
            return Ok(());
        }
        let page = res?;
        st.roots.record(page.next_cursor);
        st.merge(page.items);
        Ok(())
    }

    /// Re-fetches the first page of root comments so that server counters
    /// replace whatever has been confirmed locally in the meantime
    pub async fn refresh(&self) -> Result<MergeReport, Error> {
        let started = {
            let st = self.state.read();
            st.check_alive()?;
            st.roots.started()
        };
        if !started {
            self.load_more_roots().await?;
            return Ok(MergeReport::default());
        }
        let scope = Scope::Post(self.post.clone());
        let page = fetch_page(&*self.source, &scope, None).await?;
        let mut st = self.state.write();
        if st.torn_down {
            return Ok(MergeReport::default());
        }
        Ok(st.merge(page.items))
    }

    pub async fn expand(&self, id: &CommentId) -> Result<(), Error> {
        let fetch = {
            let mut st = self.state.write();
            st.check_alive()?;
            let reply_count = st
                .projection()
                .view(id)
                .ok_or_else(|| Error::UnknownComment(id.clone()))?
                .reply_count;
            st.node_mut(id).request_expand(reply_count)
        };
        tracing::debug!(comment = %id, ?fetch, "expanding comment");
        match fetch {
            Fetch::Start(cursor) => self.fetch_replies(id, cursor).await,
            Fetch::InFlight | Fetch::Skip => Ok(()),
        }
    }

    pub fn collapse(&self, id: &CommentId) -> Result<(), Error> {
        let mut st = self.state.write();
        st.check_alive()?;
        if !st.forest.contains(id) {
            return Err(Error::UnknownComment(id.clone()));
        }
        if st.node_mut(id).collapse() {
            tracing::debug!(comment = %id, "collapsed comment");
        }
        Ok(())
    }

    pub async fn load_more_replies(&self, id: &CommentId) -> Result<(), Error> {
        let fetch = {
            let mut st = self.state.write();
            st.check_alive()?;
            if !st.forest.contains(id) {
                return Err(Error::UnknownComment(id.clone()));
            }
            st.node_mut(id).request_more()
        };
        tracing::debug!(comment = %id, ?fetch, "loading more replies");
        match fetch {
            Fetch::Start(cursor) => self.fetch_replies(id, cursor).await,
            Fetch::InFlight | Fetch::Skip => Ok(()),
        }
    }

    async fn fetch_replies(&self, id: &CommentId, cursor: Option<Cursor>) -> Result<(), Error> {
        let scope = Scope::Parent(id.clone());
        let res = fetch_page(&*self.source, &scope, cursor.as_ref()).await;

        let mut st = self.state.write();
        if st.torn_down {
            tracing::debug!(comment = %id, "dropping replies fetched after teardown");
            return Ok(());
        }
        if !st.forest.contains(id) {
            tracing::debug!(comment = %id, "dropping replies of a comment that went away");
            return res.map(|_| ());
        }
        match res {
            Ok(page) => {
                st.merge(page.items);
                st.node_mut(id).fetch_succeeded(page.next_cursor);
                Ok(())
            }
            Err(e) => {
                st.node_mut(id).fetch_failed();
                tracing::warn!(comment = %id, err = %e, "failed loading replies");
                Err(e)
            }
        }
    }

    /// Posts `content` as a reply to `parent`, or as a root comment.
    ///
    /// The comment shows up immediately; on failure it is removed again and
    /// the error carries `content` back.
    pub async fn submit_reply(
        &self,
        parent: Option<&CommentId>,
        content: String,
    ) -> Result<CommentId, Error> {
        let provisional = {
            let mut st = self.state.write();
            st.check_alive()?;
            if let Some(p) = parent {
                st.confirmed_record(p)?;
            }
            let now = Utc::now();
            let id = CommentId::provisional();
            let inserted = st.forest.insert_provisional(CommentRecord {
                id: id.clone(),
                post_id: self.post.clone(),
                parent_id: parent.cloned(),
                author: self.config.viewer.clone(),
                content: content.clone(),
                like_count: 0,
                reply_count: 0,
                viewer_has_liked: false,
                created_at: now,
                updated_at: now,
            });
            if !inserted {
                return Err(Error::UnknownComment(parent.cloned().unwrap_or(id)));
            }
            st.nodes.insert(id.clone(), NodeState::fully_loaded());
            if let Some(p) = parent {
                st.overlay_mut(p).pending_replies.insert(id.clone());
            }
            id
        };
        tracing::debug!(comment = %provisional, ?parent, "submitting comment");

        let res = self
            .source
            .create_comment(NewComment {
                post_id: self.post.clone(),
                content: content.clone(),
                parent_id: parent.cloned(),
            })
            .await;

        let mut st = self.state.write();
        if let Some(p) = parent {
            if let Some(o) = st.overlays.get_mut(p) {
                o.pending_replies.remove(&provisional);
            }
        }
        let res = match res {
            Ok(record) if !st.torn_down => {
                let id = record.id.clone();
                st.forest.confirm_provisional(&provisional, record);
                if let Some(state) = st.nodes.remove(&provisional) {
                    st.nodes.entry(id.clone()).or_insert(state);
                }
                if let Some(p) = parent {
                    st.overlay_mut(p).confirmed_replies += 1;
                }
                tracing::info!(comment = %id, ?parent, "comment created");
                Ok(id)
            }
            Ok(record) => Ok(record.id),
            Err(source) => {
                st.forest.remove_provisional(&provisional);
                st.nodes.remove(&provisional);
                tracing::warn!(comment = %provisional, err = %source, "comment creation failed, rolled back");
                Err(Error::MutationFailed {
                    kind: MutationKind::Create,
                    target: provisional,
                    unsent_content: Some(content),
                    source,
                })
            }
        };
        if let Some(p) = parent {
            st.prune_overlay(p);
        }
        res
    }

    /// Flips the viewer's like on `id`.
    ///
    /// The displayed state flips at once. Only one request per comment is in
    /// flight: clicks made meanwhile just move the desired state, and a
    /// follow-up request is sent if the server ends up disagreeing with it.
    pub async fn toggle_like(&self, id: &CommentId) -> Result<(), Error> {
        let mut sending = {
            let mut st = self.state.write();
            st.check_alive()?;
            let record = st.confirmed_record(id)?;
            let like = st.overlay_mut(id).like_mut();
            let desired = !like.state(&record).viewer_has_liked;
            like.desired = Some(desired);
            if like.in_flight {
                tracing::debug!(comment = %id, desired, "like request in flight, updated intent");
                return Ok(());
            }
            like.in_flight = true;
            desired
        };

        loop {
            tracing::debug!(comment = %id, desired = sending, "sending like");
            let res = self.source.toggle_like(id, sending).await;

            let mut st = self.state.write();
            if st.torn_down {
                return Ok(());
            }
            if !st.forest.contains(id) {
                // a pending delete holds the comment: record the server's answer
                // so that a failed delete restores the right state
                let held = st
                    .pending_deletes
                    .values_mut()
                    .find_map(|p| p.overlay_mut(id));
                if let Some(o) = held {
                    let like = o.like_mut();
                    if let Ok(server) = &res {
                        like.confirmed = Some(*server);
                    }
                    like.desired = None;
                    like.in_flight = false;
                }
                tracing::debug!(comment = %id, "like answered while the comment is detached");
                return res.map(|_| ()).map_err(|source| Error::MutationFailed {
                    kind: MutationKind::Like,
                    target: id.clone(),
                    unsent_content: None,
                    source,
                });
            }
            let like = st.overlay_mut(id).like_mut();
            match res {
                Ok(server) => {
                    like.confirmed = Some(server);
                    match like.desired {
                        Some(d) if like.in_flight && d != server.viewer_has_liked => {
                            sending = d;
                            continue;
                        }
                        _ => {
                            like.desired = None;
                            like.in_flight = false;
                        }
                    }
                    st.prune_overlay(id);
                    tracing::info!(
                        comment = %id,
                        liked = server.viewer_has_liked,
                        like_count = server.like_count,
                        "like confirmed"
                    );
                    return Ok(());
                }
                Err(source) => {
                    like.desired = None;
                    like.in_flight = false;
                    st.prune_overlay(id);
                    tracing::warn!(comment = %id, err = %source, "like failed, reverted to last confirmed state");
                    return Err(Error::MutationFailed {
                        kind: MutationKind::Like,
                        target: id.clone(),
                        unsent_content: None,
                        source,
                    });
                }
            }
        }
    }

    /// Removes `id` and its replies at once, putting them back if the server
    /// refuses
    pub async fn delete_comment(&self, id: &CommentId) -> Result<(), Error> {
        {
            let mut st = self.state.write();
            st.check_alive()?;
            st.confirmed_record(id)?;
            if let Some(p) = st
                .forest
                .subtree(id)
                .into_iter()
                .find(CommentId::is_provisional)
            {
                return Err(Error::NotConfirmed(p));
            }
            let detached = st
                .forest
                .detach(id)
                .ok_or_else(|| Error::UnknownComment(id.clone()))?;
            let nodes = detached
                .ids()
                .filter_map(|c| st.nodes.remove(c).map(|s| (c.clone(), s)))
                .collect();
            let overlays = detached
                .ids()
                .filter_map(|c| st.overlays.remove(c).map(|o| (c.clone(), o)))
                .collect();
            if let Some(p) = detached.parent().cloned() {
                st.overlay_mut(&p).pending_removals.insert(id.clone());
            }
            tracing::debug!(comment = %id, removed = detached.ids().count(), "deleting comment");
            st.pending_deletes.insert(
                id.clone(),
                PendingDelete {
                    detached,
                    nodes,
                    overlays,
                    nested: Vec::new(),
                },
            );
        }

        let res = self.source.delete_comment(id).await;

        let mut st = self.state.write();
        let pending = match st.pending_deletes.remove(id) {
            Some(p) => p,
            None => return Ok(()),
        };
        let parent = pending.detached.parent().cloned();
        if let Some(o) = parent.as_ref().and_then(|p| st.any_overlay_mut(p)) {
            o.pending_removals.remove(id);
        }
        let res = match res {
            Ok(()) => {
                if let Some(o) = parent.as_ref().and_then(|p| st.any_overlay_mut(p)) {
                    o.confirmed_replies -= 1;
                }
                tracing::info!(comment = %id, "comment deleted");
                Ok(())
            }
            Err(source) if st.torn_down => Err(Error::MutationFailed {
                kind: MutationKind::Delete,
                target: id.clone(),
                unsent_content: None,
                source,
            }),
            Err(source) => {
                st.restore(pending);
                tracing::warn!(comment = %id, err = %source, "delete failed, restored comment");
                Err(Error::MutationFailed {
                    kind: MutationKind::Delete,
                    target: id.clone(),
                    unsent_content: None,
                    source,
                })
            }
        };
        if let Some(p) = &parent {
            st.prune_overlay(p);
        }
        res
    }
}
