use std::{collections::HashMap, sync::Arc};

use crate::{
    api::{CommentId, CommentRecord},
    Expansion, Forest, NodeState, Overlay,
};

/// A comment as the rendering layer should show it
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentView {
    pub record: Arc<CommentRecord>,
    pub like_count: u64,
    pub viewer_has_liked: bool,
    pub reply_count: u64,
    pub expansion: Expansion,
    pub has_more_replies: bool,

    /// Created locally and not yet acknowledged by the server
    pub pending: bool,
}

impl CommentView {
    pub fn id(&self) -> &CommentId {
        &self.record.id
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VisibleNode {
    pub comment: CommentView,
    pub depth: usize,
}

/// Read-only access to everything the projection needs
pub(crate) struct Projection<'a> {
    pub forest: &'a Forest,
    pub nodes: &'a HashMap<CommentId, NodeState>,
    pub overlays: &'a HashMap<CommentId, Overlay>,
}

impl<'a> Projection<'a> {
    pub fn view(&self, id: &CommentId) -> Option<CommentView> {
        let record = self.forest.get(id)?;
        let default_overlay = Overlay::default();
        let overlay = self.overlays.get(id).unwrap_or(&default_overlay);
        let default_state = NodeState::default();
        let state = self.nodes.get(id).unwrap_or(&default_state);
        let like = overlay.like_state(record);
        Some(CommentView {
            record: record.clone(),
            like_count: like.like_count,
            viewer_has_liked: like.viewer_has_liked,
            reply_count: overlay.reply_count(record, self.forest.children(id).len()),
            expansion: state.expansion(),
            has_more_replies: state.has_more_replies(),
            pending: id.is_provisional(),
        })
    }

    /// Depth-first list of the nodes to draw: roots always, replies only
    /// below expanded comments
    pub fn visible(&self) -> Vec<VisibleNode> {
        let mut res = Vec::new();
        let mut stack = self
            .forest
            .roots()
            .iter()
            .rev()
            .map(|id| (id, 0))
            .collect::<Vec<_>>();
        while let Some((id, depth)) = stack.pop() {
            let comment = match self.view(id) {
                Some(c) => c,
                None => continue,
            };
            if comment.expansion == Expansion::Expanded {
                stack.extend(
                    self.forest
                        .children(id)
                        .iter()
                        .rev()
                        .map(|c| (c, depth + 1)),
                );
            }
            res.push(VisibleNode { comment, depth });
        }
        res
    }
}
