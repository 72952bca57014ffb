mod error;
pub use error::{Error, MutationKind};

mod fetcher;
pub use fetcher::Pagination;

mod forest;
pub use forest::{Forest, MergeReport};

mod expansion;
pub use expansion::{Expansion, NodeState};

mod overlay;
pub use overlay::{LikeOverlay, Overlay};

mod view;
pub use view::{CommentView, VisibleNode};

mod thread;
pub use thread::{Thread, ThreadConfig};

mod engine;
pub use engine::Engine;

pub mod api {
    pub use threadline_api::*;
}
