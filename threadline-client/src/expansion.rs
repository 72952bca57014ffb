use crate::{api::Cursor, Pagination};

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Expansion {
    #[default]
    Collapsed,
    Loading,
    Expanded,
}

/// What the caller has to do after asking for a transition
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Fetch {
    /// Issue a page fetch starting at this cursor
    Start(Option<Cursor>),

    /// A fetch for this node is already in flight, its result will do
    InFlight,

    /// Nothing to fetch
    Skip,
}

/// Per-comment reply loading state.
///
/// At most one reply fetch per comment is in flight at any time, whichever of
/// expand or load-more started it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeState {
    expansion: Expansion,
    replies: Pagination,
    fetching: bool,
}

impl NodeState {
    pub fn expansion(&self) -> Expansion {
        self.expansion
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    /// Whether a "load more replies" affordance makes sense
    pub fn has_more_replies(&self) -> bool {
        self.replies.has_more_after_first()
    }

    pub fn replies_started(&self) -> bool {
        self.replies.started()
    }

    pub(crate) fn request_expand(&mut self, reply_count: u64) -> Fetch {
        match self.expansion {
            Expansion::Loading | Expansion::Expanded => Fetch::Skip,
            Expansion::Collapsed if self.fetching => {
                self.expansion = Expansion::Loading;
                Fetch::InFlight
            }
            Expansion::Collapsed if reply_count == 0 || self.replies.started() => {
                self.expansion = Expansion::Expanded;
                Fetch::Skip
            }
            Expansion::Collapsed => {
                self.expansion = Expansion::Loading;
                self.fetching = true;
                Fetch::Start(None)
            }
        }
    }

    pub(crate) fn request_more(&mut self) -> Fetch {
        if self.fetching {
            Fetch::InFlight
        } else if !self.replies.has_more() {
            Fetch::Skip
        } else {
            self.fetching = true;
            Fetch::Start(self.replies.next_cursor().cloned())
        }
    }

    /// Returns whether the node was visibly collapsed by this call
    pub(crate) fn collapse(&mut self) -> bool {
        let changed = self.expansion != Expansion::Collapsed;
        self.expansion = Expansion::Collapsed;
        changed
    }

    /// A collapse that happened while loading is honored: the replies are
    /// kept but stay hidden
    pub(crate) fn fetch_succeeded(&mut self, next: Option<Cursor>) {
        self.fetching = false;
        self.replies.record(next);
        if self.expansion == Expansion::Loading {
            self.expansion = Expansion::Expanded;
        }
    }

    pub(crate) fn fetch_failed(&mut self) {
        self.fetching = false;
        if self.expansion == Expansion::Loading {
            self.expansion = Expansion::Collapsed;
        }
    }

    /// Used for locally-created comments, which have nothing on the server yet
    pub(crate) fn fully_loaded() -> NodeState {
        let mut replies = Pagination::default();
        replies.record(None);
        NodeState {
            expansion: Expansion::Collapsed,
            replies,
            fetching: false,
        }
    }
}
