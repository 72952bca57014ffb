use std::collections::HashSet;

use crate::api::{CommentId, CommentRecord, LikeState};

/// Local like state layered over the server record
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LikeOverlay {
    /// Latest server answer to a toggle, newer than the record
    pub confirmed: Option<LikeState>,

    /// What the viewer last asked for, until the server agrees
    pub desired: Option<bool>,

    pub in_flight: bool,
}

impl LikeOverlay {
    pub fn base(&self, record: &CommentRecord) -> LikeState {
        self.confirmed.unwrap_or_else(|| record.like_state())
    }

    pub fn state(&self, record: &CommentRecord) -> LikeState {
        let base = self.base(record);
        match self.desired {
            Some(d) => base.toward(d),
            None => base,
        }
    }

    fn is_empty(&self) -> bool {
        self.confirmed.is_none() && self.desired.is_none() && !self.in_flight
    }
}

/// The few fields of a comment that change before the server confirms them.
///
/// Read-time only: the displayed values are derived from the immutable record
/// plus this overlay, so dropping the overlay gets back to server truth.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Overlay {
    pub like: Option<LikeOverlay>,

    /// Provisional replies waiting for the server
    pub pending_replies: HashSet<CommentId>,

    /// Replies hidden by a delete waiting for the server
    pub pending_removals: HashSet<CommentId>,

    /// Replies created (positive) or deleted (negative) and confirmed since the
    /// record was served
    pub confirmed_replies: i64,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.like.as_ref().map(LikeOverlay::is_empty).unwrap_or(true)
            && self.pending_replies.is_empty()
            && self.pending_removals.is_empty()
            && self.confirmed_replies == 0
    }

    pub fn like_state(&self, record: &CommentRecord) -> LikeState {
        match &self.like {
            Some(l) => l.state(record),
            None => record.like_state(),
        }
    }

    pub fn like_mut(&mut self) -> &mut LikeOverlay {
        self.like.get_or_insert_with(LikeOverlay::default)
    }

    /// Reply count to display, given how many replies currently hang below
    pub fn reply_count(&self, record: &CommentRecord, attached: usize) -> u64 {
        let pending = self.pending_replies.len() as i64;
        let removed = self.pending_removals.len() as i64;
        let confirmed_attached = (attached as i64 - pending).max(0);
        let server = record.reply_count as i64 + self.confirmed_replies;
        let base = std::cmp::max(server, confirmed_attached + removed);
        (base + pending - removed).max(0) as u64
    }

    /// A fresh server record came in: its counters supersede everything
    /// confirmed so far, pending intents stay on top of it
    pub fn refresh(&mut self) {
        self.confirmed_replies = 0;
        if let Some(l) = &mut self.like {
            if !l.in_flight {
                l.confirmed = None;
            }
        }
        if self.like.as_ref().map(LikeOverlay::is_empty).unwrap_or(false) {
            self.like = None;
        }
    }
}
