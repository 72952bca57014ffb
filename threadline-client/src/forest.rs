use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::api::{CommentId, CommentRecord, PostId, Time};

/// What a merge changed, mostly for logging and tests
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergeReport {
    pub inserted: Vec<CommentId>,

    /// Already-known comments whose server record changed
    pub refreshed: Vec<CommentId>,

    /// Provisional roots that got moved under their now-known parent
    pub reparented: Vec<CommentId>,

    /// Comments left where they were because their parent would create a cycle
    /// or contradict the parent they were first seen with
    pub inconsistent: Vec<CommentId>,

    /// Records ignored because they belong to another post or to a deleted subtree
    pub skipped: Vec<CommentId>,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty() && self.refreshed.is_empty() && self.reparented.is_empty()
    }
}

/// Where a node hangs: under a parent, or in the post's root list
type Parent = Option<CommentId>;

/// A subtree cut out of the forest, with enough to put it back exactly
#[derive(Clone, Debug)]
pub(crate) struct Detached {
    pub root: CommentId,
    parent: Parent,
    index: usize,
    orphan_of: Option<CommentId>,
    nodes: Vec<DetachedNode>,
}

#[derive(Clone, Debug)]
struct DetachedNode {
    record: Arc<CommentRecord>,
    attached_to: Parent,
    children: Vec<CommentId>,
}

impl Detached {
    pub fn ids(&self) -> impl Iterator<Item = &CommentId> {
        self.nodes.iter().map(|n| &n.record.id)
    }

    /// The comment the subtree hung under
    pub fn parent(&self) -> Option<&CommentId> {
        self.parent.as_ref()
    }
}

/// The comments of one post, arranged as a forest.
///
/// Records live in an arena keyed by id; the tree shape is kept in separate
/// indices so that moving a node is an index update. A record whose parent has
/// not been seen yet sits in the root list until the parent shows up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Forest {
    post: PostId,
    records: HashMap<CommentId, Arc<CommentRecord>>,
    attached_to: HashMap<CommentId, Parent>,
    children: HashMap<CommentId, Vec<CommentId>>,
    roots: Vec<CommentId>,

    /// Declared parent -> provisional roots waiting for it
    orphans: HashMap<CommentId, Vec<CommentId>>,

    /// Deleted (or being deleted) comments, which merges must not resurrect
    tombstones: HashSet<CommentId>,
}

fn sort_ids(records: &HashMap<CommentId, Arc<CommentRecord>>, ids: &mut [CommentId]) {
    fn key<'a>(
        records: &'a HashMap<CommentId, Arc<CommentRecord>>,
        id: &'a CommentId,
    ) -> (Option<Reverse<Time>>, &'a CommentId) {
        (records.get(id).map(|r| Reverse(r.created_at)), id)
    }
    ids.sort_by(|a, b| key(records, a).cmp(&key(records, b)));
}

impl Forest {
    pub fn new(post: PostId) -> Forest {
        Forest {
            post,
            records: HashMap::new(),
            attached_to: HashMap::new(),
            children: HashMap::new(),
            roots: Vec::new(),
            orphans: HashMap::new(),
            tombstones: HashSet::new(),
        }
    }

    /// Builds a forest from scratch
    pub fn assemble(post: PostId, records: Vec<CommentRecord>) -> Forest {
        let mut forest = Forest::new(post);
        forest.merge(records);
        forest
    }

    pub fn post(&self) -> &PostId {
        &self.post
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &CommentId) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &CommentId) -> Option<&Arc<CommentRecord>> {
        self.records.get(id)
    }

    pub fn roots(&self) -> &[CommentId] {
        &self.roots
    }

    pub fn children(&self, id: &CommentId) -> &[CommentId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The parent this node is currently displayed under, None for the root list
    pub fn attached_parent(&self, id: &CommentId) -> Option<&CommentId> {
        self.attached_to.get(id).and_then(|p| p.as_ref())
    }

    pub fn is_tombstoned(&self, id: &CommentId) -> bool {
        self.tombstones.contains(id)
    }

    /// Depth-first listing of every node with its depth
    pub fn walk(&self) -> Vec<(CommentId, usize)> {
        let mut res = Vec::with_capacity(self.records.len());
        let mut stack = self
            .roots
            .iter()
            .rev()
            .map(|id| (id, 0))
            .collect::<Vec<_>>();
        while let Some((id, depth)) = stack.pop() {
            res.push((id.clone(), depth));
            stack.extend(self.children(id).iter().rev().map(|c| (c, depth + 1)));
        }
        res
    }

    /// `id` followed by all its descendants
    pub fn subtree(&self, id: &CommentId) -> Vec<CommentId> {
        let mut res = Vec::new();
        if !self.records.contains_key(id) {
            return res;
        }
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            res.push(cur.clone());
            stack.extend(self.children(cur).iter());
        }
        res
    }

    /// Merges a batch of server records into the forest.
    ///
    /// Merging the same records twice is a no-op. Known comments get their
    /// record replaced; new ones are attached under their parent, or kept as a
    /// provisional root until the parent is merged in.
    pub fn merge(&mut self, records: Vec<CommentRecord>) -> MergeReport {
        let mut report = MergeReport::default();
        if records.is_empty() {
            return report;
        }

        // Within a batch the first occurrence wins, except for the counters
        let mut batch: Vec<CommentRecord> = Vec::with_capacity(records.len());
        let mut batch_idx: HashMap<CommentId, usize> = HashMap::new();
        for r in records {
            match batch_idx.get(&r.id) {
                Some(&i) => {
                    tracing::warn!(comment = %r.id, "same comment twice in one batch");
                    let first = &mut batch[i];
                    first.like_count = r.like_count;
                    first.reply_count = r.reply_count;
                    first.viewer_has_liked = r.viewer_has_liked;
                }
                None => {
                    batch_idx.insert(r.id.clone(), batch.len());
                    batch.push(r);
                }
            }
        }

        let mut touched: HashSet<Parent> = HashSet::new();
        for r in batch {
            if r.post_id != self.post {
                tracing::warn!(comment = %r.id, post = %r.post_id, expected = %self.post, "dropping comment of another post");
                report.skipped.push(r.id);
                continue;
            }
            let parent_deleted = r
                .parent_id
                .as_ref()
                .map(|p| self.tombstones.contains(p))
                .unwrap_or(false);
            if self.tombstones.contains(&r.id) || parent_deleted {
                tracing::debug!(comment = %r.id, "ignoring deleted comment");
                report.skipped.push(r.id);
                continue;
            }
            let known = self.records.get(&r.id).cloned();
            match known {
                Some(known) if known.parent_id != r.parent_id => {
                    tracing::warn!(
                        comment = %r.id,
                        known = ?known.parent_id,
                        got = ?r.parent_id,
                        "comment changed parent, keeping the first one"
                    );
                    report.inconsistent.push(r.id);
                }
                Some(known) if *known == r => (),
                Some(_) => {
                    report.refreshed.push(r.id.clone());
                    self.records.insert(r.id.clone(), Arc::new(r));
                }
                None => {
                    let id = r.id.clone();
                    let parent = self.insert_new(r);
                    touched.insert(parent);
                    report.inserted.push(id.clone());
                    self.adopt_orphans(&id, &mut report, &mut touched);
                }
            }
        }

        for parent in touched {
            self.sort_list(&parent);
        }
        if !report.is_noop() {
            tracing::debug!(
                inserted = report.inserted.len(),
                refreshed = report.refreshed.len(),
                reparented = report.reparented.len(),
                "merged comments"
            );
        }
        report
    }

    /// Places a record nobody knew of yet, returning the list it went into
    fn insert_new(&mut self, r: CommentRecord) -> Parent {
        let id = r.id.clone();
        let parent = match &r.parent_id {
            None => None,
            Some(p) if self.records.contains_key(p) => Some(p.clone()),
            Some(p) => {
                tracing::debug!(comment = %id, parent = %p, "parent not loaded yet, keeping at root");
                self.orphans.entry(p.clone()).or_default().push(id.clone());
                None
            }
        };
        self.records.insert(id.clone(), Arc::new(r));
        self.list_mut(&parent).push(id.clone());
        self.attached_to.insert(id, parent.clone());
        parent
    }

    /// Moves the provisional roots that were waiting for `parent` under it
    fn adopt_orphans(
        &mut self,
        parent: &CommentId,
        report: &mut MergeReport,
        touched: &mut HashSet<Parent>,
    ) {
        let waiting = match self.orphans.remove(parent) {
            None => return,
            Some(w) => w,
        };
        for child in waiting {
            if self.is_ancestor(&child, parent) {
                let err = crate::Error::InconsistentParent {
                    id: child.clone(),
                    parent: parent.clone(),
                };
                tracing::warn!(%err, "leaving comment at root");
                report.inconsistent.push(child);
                continue;
            }
            self.roots.retain(|r| *r != child);
            self.children
                .entry(parent.clone())
                .or_default()
                .push(child.clone());
            self.attached_to.insert(child.clone(), Some(parent.clone()));
            report.reparented.push(child);
        }
        touched.insert(None);
        touched.insert(Some(parent.clone()));
    }

    /// Whether `ancestor` is `id` or on the chain of parents above it
    fn is_ancestor(&self, ancestor: &CommentId, id: &CommentId) -> bool {
        let mut cur = Some(id);
        let mut steps = 0;
        while let Some(c) = cur {
            if c == ancestor || steps > self.records.len() {
                return true;
            }
            cur = self.attached_parent(c);
            steps += 1;
        }
        false
    }

    fn list_mut(&mut self, parent: &Parent) -> &mut Vec<CommentId> {
        match parent {
            None => &mut self.roots,
            Some(p) => self.children.entry(p.clone()).or_default(),
        }
    }

    fn sort_list(&mut self, parent: &Parent) {
        let list = match parent {
            None => &mut self.roots,
            Some(p) => match self.children.get_mut(p) {
                Some(l) => l,
                None => return,
            },
        };
        sort_ids(&self.records, list);
    }

    /// Inserts a locally-created comment at the front of its list.
    ///
    /// Returns false if the declared parent is not in the forest.
    pub(crate) fn insert_provisional(&mut self, r: CommentRecord) -> bool {
        let parent = r.parent_id.clone();
        if let Some(p) = &parent {
            if !self.records.contains_key(p) {
                return false;
            }
        }
        let id = r.id.clone();
        self.records.insert(id.clone(), Arc::new(r));
        self.list_mut(&parent).insert(0, id.clone());
        self.attached_to.insert(id, parent);
        true
    }

    /// Swaps a provisional comment for its server-confirmed record, in place.
    ///
    /// The list is not re-sorted, so the comment keeps its slot even when the
    /// server's timestamp would order it elsewhere; the next merge touching
    /// that list puts it back in sort order. If the confirmed comment already
    /// made it in through a fetch, the provisional one is just dropped.
    pub(crate) fn confirm_provisional(
        &mut self,
        provisional: &CommentId,
        confirmed: CommentRecord,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        if self.records.contains_key(&confirmed.id) {
            self.remove_provisional(provisional);
            let mut report = self.merge(vec![confirmed]);
            report.skipped.push(provisional.clone());
            return report;
        }
        let parent = match self.attached_to.remove(provisional) {
            Some(p) => p,
            None => return self.merge(vec![confirmed]),
        };
        self.records.remove(provisional);
        let id = confirmed.id.clone();
        let list = self.list_mut(&parent);
        let slot = list.iter().position(|c| c == provisional);
        match slot {
            Some(i) => list[i] = id.clone(),
            None => list.insert(0, id.clone()),
        }
        if let Some(c) = self.children.remove(provisional) {
            self.children.insert(id.clone(), c);
        }
        self.records.insert(id.clone(), Arc::new(confirmed));
        self.attached_to.insert(id.clone(), parent);
        report.inserted.push(id.clone());
        let mut touched = HashSet::new();
        self.adopt_orphans(&id, &mut report, &mut touched);
        for parent in touched {
            self.sort_list(&parent);
        }
        report
    }

    /// Drops a provisional comment without leaving a tombstone
    pub(crate) fn remove_provisional(&mut self, provisional: &CommentId) -> bool {
        match self.detach(provisional) {
            None => false,
            Some(d) => {
                for id in d.ids() {
                    self.tombstones.remove(id);
                }
                true
            }
        }
    }

    /// Cuts `id` and everything below it out of the forest, tombstoning it all
    pub(crate) fn detach(&mut self, id: &CommentId) -> Option<Detached> {
        let parent = self.attached_to.get(id)?.clone();
        let list = self.list_mut(&parent);
        let index = list.iter().position(|c| c == id)?;
        list.remove(index);

        let orphan_of = match (&parent, self.records.get(id).and_then(|r| r.parent_id.clone())) {
            (None, Some(declared)) => {
                if let Some(w) = self.orphans.get_mut(&declared) {
                    w.retain(|c| c != id);
                }
                Some(declared)
            }
            _ => None,
        };

        let mut nodes = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(cur) = stack.pop() {
            let record = match self.records.remove(&cur) {
                Some(r) => r,
                None => continue,
            };
            let attached_to = self.attached_to.remove(&cur).unwrap_or(None);
            let children = self.children.remove(&cur).unwrap_or_default();
            stack.extend(children.iter().cloned());
            self.tombstones.insert(cur);
            nodes.push(DetachedNode {
                record,
                attached_to,
                children,
            });
        }
        Some(Detached {
            root: id.clone(),
            parent,
            index,
            orphan_of,
            nodes,
        })
    }

    /// Puts back a subtree cut out by `detach`, at the position it had
    pub(crate) fn reattach(&mut self, d: Detached) {
        let mut parent = d.parent;
        if let Some(p) = &parent {
            if !self.records.contains_key(p) {
                tracing::warn!(comment = %d.root, parent = %p, "parent vanished, restoring at root");
                parent = None;
            }
        }
        for n in d.nodes {
            let id = n.record.id.clone();
            self.tombstones.remove(&id);
            if !n.children.is_empty() {
                self.children.insert(id.clone(), n.children);
            }
            self.attached_to.insert(id.clone(), n.attached_to);
            self.records.insert(id, n.record);
        }
        self.attached_to.insert(d.root.clone(), parent.clone());
        if let Some(declared) = d.orphan_of {
            if !self.records.contains_key(&declared) {
                self.orphans
                    .entry(declared)
                    .or_default()
                    .push(d.root.clone());
            }
        }
        let list = self.list_mut(&parent);
        let index = std::cmp::min(d.index, list.len());
        list.insert(index, d.root);
    }
}
