use std::sync::Arc;

use chrono::{TimeZone, Utc};
use threadline_client::{
    api::{self, AuthorRef, CommentId, CommentRecord, PostId},
    Engine, Error, Expansion, MutationKind, Thread, ThreadConfig,
};
use threadline_mock_server::{MockServer, Op};

fn rec(id: &str, parent: Option<&str>, secs: i64) -> CommentRecord {
    let t = Utc.timestamp_opt(secs, 0).unwrap();
    CommentRecord {
        id: CommentId::new(id),
        post_id: PostId::new("P1"),
        parent_id: parent.map(CommentId::new),
        author: AuthorRef::stub(),
        content: format!("comment {id}"),
        like_count: 0,
        reply_count: 0,
        viewer_has_liked: false,
        created_at: t,
        updated_at: t,
    }
}

fn with_replies(mut r: CommentRecord, n: u64) -> CommentRecord {
    r.reply_count = n;
    r
}

fn id(s: &str) -> CommentId {
    CommentId::new(s)
}

async fn setup(server: MockServer) -> (Arc<MockServer>, Arc<Thread<MockServer>>) {
    let server = Arc::new(server);
    let thread = Arc::new(Thread::new(
        PostId::new("P1"),
        server.clone(),
        ThreadConfig::default(),
    ));
    thread.load_more_roots().await.unwrap();
    (server, thread)
}

async fn wait_for_calls(server: &MockServer, op: Op, n: usize) {
    while server.calls(op) < n {
        tokio::task::yield_now().await;
    }
}

fn visible(thread: &Thread<MockServer>) -> Vec<String> {
    thread
        .visible_nodes()
        .into_iter()
        .map(|n| format!("{}@{}", n.comment.id(), n.depth))
        .collect()
}

#[tokio::test]
async fn expand_shows_replies() {
    let server = MockServer::new();
    server.seed(vec![
        with_replies(rec("c1", None, 10), 1),
        rec("c2", Some("c1"), 20),
    ]);
    let (server, thread) = setup(server).await;
    assert_eq!(visible(&thread), ["c1@0"]);

    thread.expand(&id("c1")).await.unwrap();
    assert_eq!(visible(&thread), ["c1@0", "c2@1"]);
    assert_eq!(server.calls(Op::FetchReplies), 1);
    assert_eq!(
        thread.node(&id("c1")).unwrap().expansion,
        Expansion::Expanded
    );
}

#[tokio::test]
async fn collapse_keeps_loaded_replies() {
    let server = MockServer::new();
    server.seed(vec![
        with_replies(rec("c1", None, 10), 1),
        rec("c2", Some("c1"), 20),
    ]);
    let (server, thread) = setup(server).await;
    thread.expand(&id("c1")).await.unwrap();
    thread.collapse(&id("c1")).unwrap();
    assert_eq!(visible(&thread), ["c1@0"]);
    assert_eq!(thread.children(&id("c1")), [id("c2")]);

    thread.expand(&id("c1")).await.unwrap();
    assert_eq!(visible(&thread), ["c1@0", "c2@1"]);
    assert_eq!(server.calls(Op::FetchReplies), 1);
}

#[tokio::test]
async fn concurrent_expands_share_one_fetch() {
    let server = MockServer::new();
    server.seed(vec![
        with_replies(rec("c1", None, 10), 1),
        rec("c2", Some("c1"), 20),
    ]);
    let (server, thread) = setup(server).await;
    server.gate(Op::FetchReplies);

    let first = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.expand(&id("c1")).await })
    };
    wait_for_calls(&server, Op::FetchReplies, 1).await;
    assert_eq!(thread.node(&id("c1")).unwrap().expansion, Expansion::Loading);

    thread.expand(&id("c1")).await.unwrap();
    thread.load_more_replies(&id("c1")).await.unwrap();
    server.release(Op::FetchReplies, 1);
    first.await.unwrap().unwrap();

    assert_eq!(server.calls(Op::FetchReplies), 1);
    assert_eq!(visible(&thread), ["c1@0", "c2@1"]);
}

#[tokio::test]
async fn failed_fetch_collapses_back() {
    let server = MockServer::new();
    server.seed(vec![
        with_replies(rec("c1", None, 10), 1),
        rec("c2", Some("c1"), 20),
    ]);
    let (server, thread) = setup(server).await;
    server.fail_next(Op::FetchReplies, api::Error::Timeout);

    let err = thread.expand(&id("c1")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::FetchFailed {
            source: api::Error::Timeout,
            ..
        }
    ));
    assert_eq!(
        thread.node(&id("c1")).unwrap().expansion,
        Expansion::Collapsed
    );
    assert_eq!(visible(&thread), ["c1@0"]);

    thread.expand(&id("c1")).await.unwrap();
    assert_eq!(visible(&thread), ["c1@0", "c2@1"]);
}

#[tokio::test]
async fn replies_load_page_by_page() {
    let server = MockServer::new().with_page_size(2);
    server.seed(vec![
        with_replies(rec("c1", None, 10), 3),
        rec("r1", Some("c1"), 11),
        rec("r2", Some("c1"), 12),
        rec("r3", Some("c1"), 13),
    ]);
    let (_server, thread) = setup(server).await;

    thread.expand(&id("c1")).await.unwrap();
    assert_eq!(visible(&thread), ["c1@0", "r3@1", "r2@1"]);
    assert!(thread.node(&id("c1")).unwrap().has_more_replies);

    thread.load_more_replies(&id("c1")).await.unwrap();
    assert_eq!(visible(&thread), ["c1@0", "r3@1", "r2@1", "r1@1"]);
    assert!(!thread.node(&id("c1")).unwrap().has_more_replies);
}

#[tokio::test]
async fn root_comments_load_page_by_page() {
    let server = MockServer::new().with_page_size(2);
    server.seed(vec![
        rec("a", None, 1),
        rec("b", None, 2),
        rec("c", None, 3),
    ]);
    let (_server, thread) = setup(server).await;
    assert_eq!(visible(&thread), ["c@0", "b@0"]);
    assert!(thread.has_more_roots());

    thread.load_more_roots().await.unwrap();
    assert_eq!(visible(&thread), ["c@0", "b@0", "a@0"]);
    assert!(!thread.has_more_roots());
}

#[tokio::test]
async fn like_clicks_during_a_request_converge() {
    let server = MockServer::new();
    let mut c1 = rec("c1", None, 10);
    c1.like_count = 4;
    server.seed(vec![c1]);
    let (server, thread) = setup(server).await;
    server.gate(Op::Like);

    let first = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.toggle_like(&id("c1")).await })
    };
    wait_for_calls(&server, Op::Like, 1).await;
    let v = thread.node(&id("c1")).unwrap();
    assert_eq!((v.like_count, v.viewer_has_liked), (5, true));

    thread.toggle_like(&id("c1")).await.unwrap();
    let v = thread.node(&id("c1")).unwrap();
    assert_eq!((v.like_count, v.viewer_has_liked), (4, false));

    // the first answer disagrees with the latest click, so a follow-up goes out
    server.release(Op::Like, 1);
    wait_for_calls(&server, Op::Like, 2).await;
    server.release(Op::Like, 1);
    first.await.unwrap().unwrap();

    let v = thread.node(&id("c1")).unwrap();
    assert_eq!((v.like_count, v.viewer_has_liked), (4, false));
    let stored = server.get(&id("c1")).unwrap();
    assert_eq!((stored.like_count, stored.viewer_has_liked), (4, false));
}

#[tokio::test]
async fn like_unlike_like_sends_a_single_request() {
    let server = MockServer::new();
    let mut c1 = rec("c1", None, 10);
    c1.like_count = 4;
    server.seed(vec![c1]);
    let (server, thread) = setup(server).await;
    server.gate(Op::Like);

    let first = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.toggle_like(&id("c1")).await })
    };
    wait_for_calls(&server, Op::Like, 1).await;
    thread.toggle_like(&id("c1")).await.unwrap();
    thread.toggle_like(&id("c1")).await.unwrap();
    let v = thread.node(&id("c1")).unwrap();
    assert_eq!((v.like_count, v.viewer_has_liked), (5, true));

    server.release(Op::Like, 1);
    first.await.unwrap().unwrap();
    assert_eq!(server.calls(Op::Like), 1);
    let v = thread.node(&id("c1")).unwrap();
    assert_eq!((v.like_count, v.viewer_has_liked), (5, true));
}

#[tokio::test]
async fn failed_like_reverts() {
    let server = MockServer::new();
    let mut c1 = rec("c1", None, 10);
    c1.like_count = 4;
    server.seed(vec![c1]);
    let (server, thread) = setup(server).await;
    server.fail_next(Op::Like, api::Error::PermissionDenied);

    let err = thread.toggle_like(&id("c1")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::MutationFailed {
            kind: MutationKind::Like,
            source: api::Error::PermissionDenied,
            ..
        }
    ));
    let v = thread.node(&id("c1")).unwrap();
    assert_eq!((v.like_count, v.viewer_has_liked), (4, false));
}

async fn deep_thread() -> (Arc<MockServer>, Arc<Thread<MockServer>>) {
    let server = MockServer::new();
    server.seed(vec![
        with_replies(rec("c1", None, 10), 1),
        rec("c0", None, 5),
        with_replies(rec("c2", Some("c1"), 20), 1),
        rec("c3", Some("c2"), 30),
    ]);
    let (server, thread) = setup(server).await;
    thread.expand(&id("c1")).await.unwrap();
    thread.expand(&id("c2")).await.unwrap();
    assert_eq!(visible(&thread), ["c1@0", "c2@1", "c3@2", "c0@0"]);
    (server, thread)
}

#[tokio::test]
async fn failed_delete_restores_the_subtree() {
    let (server, thread) = deep_thread().await;
    let nodes_before = thread.visible_nodes();
    let forest_before = thread.forest();
    server.gate(Op::Delete);

    let task = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.delete_comment(&id("c2")).await })
    };
    wait_for_calls(&server, Op::Delete, 1).await;
    assert_eq!(visible(&thread), ["c1@0", "c0@0"]);
    assert_eq!(thread.node(&id("c1")).unwrap().reply_count, 0);
    assert!(thread.node(&id("c3")).is_none());

    server.fail_next(Op::Delete, api::Error::PermissionDenied);
    server.release(Op::Delete, 1);
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::MutationFailed {
            kind: MutationKind::Delete,
            ..
        }
    ));

    assert_eq!(thread.visible_nodes(), nodes_before);
    assert_eq!(thread.forest(), forest_before);
}

#[tokio::test]
async fn delete_removes_the_subtree() {
    let (server, thread) = deep_thread().await;
    thread.delete_comment(&id("c2")).await.unwrap();
    assert_eq!(visible(&thread), ["c1@0", "c0@0"]);
    assert_eq!(thread.node(&id("c1")).unwrap().reply_count, 0);
    assert!(server.get(&id("c3")).is_none());
    assert!(!thread.contains(&id("c3")));
}

#[tokio::test]
async fn like_answer_during_a_failed_delete_is_kept() {
    let (server, thread) = deep_thread().await;
    server.gate(Op::Like);
    let like = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.toggle_like(&id("c2")).await })
    };
    wait_for_calls(&server, Op::Like, 1).await;

    server.gate(Op::Delete);
    let delete = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.delete_comment(&id("c2")).await })
    };
    wait_for_calls(&server, Op::Delete, 1).await;

    server.release(Op::Like, 1);
    like.await.unwrap().unwrap();
    server.fail_next(Op::Delete, api::Error::PermissionDenied);
    server.release(Op::Delete, 1);
    delete.await.unwrap().unwrap_err();

    let on_server = server.get(&id("c2")).unwrap();
    let shown = thread.node(&id("c2")).unwrap();
    assert!(on_server.viewer_has_liked);
    assert_eq!(shown.viewer_has_liked, on_server.viewer_has_liked);
    assert_eq!(shown.like_count, on_server.like_count);
    assert_eq!(visible(&thread), ["c1@0", "c2@1", "c3@2", "c0@0"]);
}

#[tokio::test]
async fn like_answer_after_a_failed_delete_is_applied() {
    let (server, thread) = deep_thread().await;
    server.gate(Op::Like);
    let like = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.toggle_like(&id("c2")).await })
    };
    wait_for_calls(&server, Op::Like, 1).await;

    server.gate(Op::Delete);
    server.fail_next(Op::Delete, api::Error::PermissionDenied);
    let delete = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.delete_comment(&id("c2")).await })
    };
    wait_for_calls(&server, Op::Delete, 1).await;
    server.release(Op::Delete, 1);
    delete.await.unwrap().unwrap_err();
    assert!(thread.node(&id("c2")).unwrap().viewer_has_liked);

    server.release(Op::Like, 1);
    like.await.unwrap().unwrap();
    let shown = thread.node(&id("c2")).unwrap();
    assert!(shown.viewer_has_liked);
    assert_eq!(shown.like_count, 1);
    assert_eq!(server.calls(Op::Like), 1);
}

#[tokio::test]
async fn failed_delete_under_a_deleted_parent_stays_gone() {
    let (server, thread) = deep_thread().await;
    server.gate(Op::Delete);
    let child = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.delete_comment(&id("c2")).await })
    };
    wait_for_calls(&server, Op::Delete, 1).await;
    let parent = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.delete_comment(&id("c1")).await })
    };
    wait_for_calls(&server, Op::Delete, 2).await;

    server.fail_next(Op::Delete, api::Error::PermissionDenied);
    server.release(Op::Delete, 1);
    child.await.unwrap().unwrap_err();
    assert_eq!(visible(&thread), ["c0@0"]);

    server.release(Op::Delete, 1);
    parent.await.unwrap().unwrap();
    assert_eq!(visible(&thread), ["c0@0"]);
    for c in ["c1", "c2", "c3"] {
        assert!(!thread.contains(&id(c)), "{c} came back");
        assert!(server.get(&id(c)).is_none());
    }
}

#[tokio::test]
async fn overlapping_failed_deletes_restore_everything() {
    let (server, thread) = deep_thread().await;
    let nodes_before = thread.visible_nodes();
    let forest_before = thread.forest();
    server.gate(Op::Delete);
    let child = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.delete_comment(&id("c2")).await })
    };
    wait_for_calls(&server, Op::Delete, 1).await;
    let parent = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.delete_comment(&id("c1")).await })
    };
    wait_for_calls(&server, Op::Delete, 2).await;

    server.fail_next(Op::Delete, api::Error::PermissionDenied);
    server.release(Op::Delete, 1);
    child.await.unwrap().unwrap_err();
    server.fail_next(Op::Delete, api::Error::PermissionDenied);
    server.release(Op::Delete, 1);
    parent.await.unwrap().unwrap_err();

    assert_eq!(thread.visible_nodes(), nodes_before);
    assert_eq!(thread.forest(), forest_before);
}

#[tokio::test]
async fn fetch_error_is_reported_after_the_comment_is_deleted() {
    let server = MockServer::new();
    server.seed(vec![
        with_replies(rec("c1", None, 10), 1),
        rec("c2", Some("c1"), 20),
    ]);
    let (server, thread) = setup(server).await;
    server.gate(Op::FetchReplies);
    let expand = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.expand(&id("c1")).await })
    };
    wait_for_calls(&server, Op::FetchReplies, 1).await;

    thread.delete_comment(&id("c1")).await.unwrap();
    server.fail_next(Op::FetchReplies, api::Error::Timeout);
    server.release(Op::FetchReplies, 1);

    let err = expand.await.unwrap().unwrap_err();
    assert!(
        matches!(
            err,
            Error::FetchFailed {
                source: api::Error::Timeout,
                ..
            }
        ),
        "{err:?}"
    );
    assert!(!thread.contains(&id("c1")));
}

#[tokio::test]
async fn reply_shows_up_before_the_server_answers() {
    let (server, thread) = deep_thread().await;
    server.gate(Op::Create);

    let task = {
        let thread = thread.clone();
        tokio::spawn(async move {
            thread
                .submit_reply(Some(&id("c1")), String::from("hello"))
                .await
        })
    };
    wait_for_calls(&server, Op::Create, 1).await;
    let nodes = thread.visible_nodes();
    assert_eq!(nodes[1].depth, 1);
    assert!(nodes[1].comment.pending);
    assert_eq!(nodes[1].comment.record.content, "hello");
    assert_eq!(thread.node(&id("c1")).unwrap().reply_count, 2);

    server.release(Op::Create, 1);
    let created = task.await.unwrap().unwrap();
    assert!(!created.is_provisional());
    assert_eq!(thread.children(&id("c1")), [created.clone(), id("c2")]);
    assert!(!thread.node(&created).unwrap().pending);
    assert_eq!(thread.node(&id("c1")).unwrap().reply_count, 2);
    assert_eq!(server.get(&id("c1")).unwrap().reply_count, 2);
}

#[tokio::test]
async fn failed_reply_hands_content_back() {
    let (server, thread) = deep_thread().await;
    let before = thread.visible_nodes();
    server.fail_next(Op::Create, api::Error::Timeout);

    let err = thread
        .submit_reply(Some(&id("c2")), String::from("lost words"))
        .await
        .unwrap_err();
    assert_eq!(err.into_unsent_content().as_deref(), Some("lost words"));
    assert_eq!(thread.visible_nodes(), before);
}

#[tokio::test]
async fn replies_to_unconfirmed_comments_are_refused() {
    let (server, thread) = deep_thread().await;
    server.gate(Op::Create);
    let task = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.submit_reply(None, String::from("root")).await })
    };
    wait_for_calls(&server, Op::Create, 1).await;
    let pending = thread.visible_nodes()[0].comment.id().clone();
    assert!(pending.is_provisional());

    let err = thread
        .submit_reply(Some(&pending), String::from("too early"))
        .await
        .unwrap_err();
    assert_eq!(err, Error::NotConfirmed(pending.clone()));
    assert!(matches!(
        thread.toggle_like(&pending).await,
        Err(Error::NotConfirmed(_))
    ));

    server.release(Op::Create, 1);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn results_after_teardown_are_dropped() {
    let server = MockServer::new();
    server.seed(vec![
        with_replies(rec("c1", None, 10), 1),
        rec("c2", Some("c1"), 20),
    ]);
    let (server, thread) = setup(server).await;
    server.gate(Op::FetchReplies);

    let task = {
        let thread = thread.clone();
        tokio::spawn(async move { thread.expand(&id("c1")).await })
    };
    wait_for_calls(&server, Op::FetchReplies, 1).await;
    thread.close();
    server.release(Op::FetchReplies, 1);
    task.await.unwrap().unwrap();

    assert!(thread.children(&id("c1")).is_empty());
    assert_eq!(
        thread.expand(&id("c1")).await,
        Err(Error::TornDown(PostId::new("P1")))
    );
}

#[tokio::test]
async fn engine_files_orphans_under_late_parents() {
    let server = Arc::new(MockServer::new());
    server.seed(vec![
        with_replies(rec("c1", None, 10), 1),
        rec("r1", Some("c1"), 20),
    ]);
    let engine = Engine::new(server.clone(), ThreadConfig::default());
    let post = PostId::new("P1");
    let thread = engine.open(&post);

    thread
        .merge_records(vec![rec("r1", Some("c1"), 20)])
        .unwrap();
    assert_eq!(visible(&thread), ["r1@0"]);

    thread.load_more_roots().await.unwrap();
    assert_eq!(visible(&thread), ["c1@0"]);
    assert_eq!(thread.forest().attached_parent(&id("r1")), Some(&id("c1")));

    engine.expand(&id("c1")).await.unwrap();
    let nodes = engine.get_visible_nodes(&post).unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[1].comment.id(), &id("r1"));
    assert_eq!(nodes[1].depth, 1);
}

#[tokio::test]
async fn engine_routes_by_comment() {
    let server = Arc::new(MockServer::new());
    let mut other = rec("o1", None, 10);
    other.post_id = PostId::new("P2");
    server.seed(vec![rec("c1", None, 10), other]);
    let engine = Engine::new(server.clone(), ThreadConfig::default());
    let (p1, p2) = (PostId::new("P1"), PostId::new("P2"));
    engine.open(&p1).load_more_roots().await.unwrap();
    engine.open(&p2).load_more_roots().await.unwrap();

    engine.toggle_like(&id("o1")).await.unwrap();
    assert!(server.get(&id("o1")).unwrap().viewer_has_liked);
    let p2_nodes = engine.get_visible_nodes(&p2).unwrap();
    assert!(p2_nodes[0].comment.viewer_has_liked);
    assert!(!engine.get_visible_nodes(&p1).unwrap()[0].comment.viewer_has_liked);

    assert_eq!(
        engine.toggle_like(&id("nope")).await,
        Err(Error::UnknownComment(id("nope")))
    );

    let created = engine
        .submit_comment(&p2, String::from("second"))
        .await
        .unwrap();
    assert_eq!(engine.get_visible_nodes(&p2).unwrap()[0].comment.id(), &created);

    assert!(engine.close(&p2));
    assert_eq!(
        engine.get_visible_nodes(&p2),
        Err(Error::UnknownPost(p2.clone()))
    );
    assert_eq!(
        engine.delete_comment(&id("o1")).await,
        Err(Error::UnknownComment(id("o1")))
    );
}
