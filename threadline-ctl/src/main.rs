use std::{sync::Arc, time::Duration};

use anyhow::Context;
use structopt::StructOpt;
use threadline_api::{CommentId, CommentSource, NewComment, PostId};
use threadline_client::{Thread, ThreadConfig};
use threadline_ctl::{render, HttpSource};

#[derive(StructOpt)]
#[structopt(name = "threadline-ctl", about = "Browse and edit comment threads")]
struct Opt {
    #[structopt(short, long, env = "THREADLINE_HOST", default_value = "http://127.0.0.1:3000")]
    host: String,

    /// Bearer token sent with every request
    #[structopt(long, env = "THREADLINE_TOKEN")]
    token: Option<String>,

    #[structopt(long, default_value = "10")]
    timeout_secs: u64,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Print the comment tree of a post
    Show {
        post: String,

        /// Comments to expand, parents before their replies
        #[structopt(long)]
        expand: Vec<String>,

        /// Load every page instead of only the first ones
        #[structopt(long)]
        all_pages: bool,
    },

    /// Post a comment, or a reply with --parent
    Reply {
        post: String,

        #[structopt(long)]
        parent: Option<String>,

        content: String,
    },

    /// Like a comment
    Like {
        id: String,

        /// Remove the like instead
        #[structopt(long)]
        undo: bool,
    },

    /// Delete a comment and all its replies
    Delete { id: String },
}

async fn show(
    source: HttpSource,
    post: PostId,
    expand: Vec<String>,
    all_pages: bool,
) -> anyhow::Result<()> {
    let thread = Thread::new(post, Arc::new(source), ThreadConfig::default());
    thread
        .load_more_roots()
        .await
        .context("loading root comments")?;
    while all_pages && thread.has_more_roots() {
        thread
            .load_more_roots()
            .await
            .context("loading root comments")?;
    }
    for id in expand.into_iter().map(CommentId) {
        thread
            .expand(&id)
            .await
            .with_context(|| format!("expanding comment {id}"))?;
        while all_pages
            && thread
                .node(&id)
                .map(|n| n.has_more_replies)
                .unwrap_or(false)
        {
            thread
                .load_more_replies(&id)
                .await
                .with_context(|| format!("loading replies of {id}"))?;
        }
    }
    print!("{}", render(&thread.visible_nodes()));
    if thread.has_more_roots() {
        println!("(more comments available, use --all-pages)");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::from_args();
    let source = HttpSource::new(
        &opt.host,
        opt.token,
        Duration::from_secs(opt.timeout_secs),
    )?;

    match opt.cmd {
        Command::Show {
            post,
            expand,
            all_pages,
        } => show(source, PostId(post), expand, all_pages).await?,
        Command::Reply {
            post,
            parent,
            content,
        } => {
            let c = source
                .create_comment(NewComment {
                    post_id: PostId(post),
                    content,
                    parent_id: parent.map(CommentId),
                })
                .await
                .context("creating comment")?;
            println!("{}", c.id);
        }
        Command::Like { id, undo } => {
            let state = source
                .toggle_like(&CommentId(id), !undo)
                .await
                .context("updating like")?;
            println!("{} likes", state.like_count);
        }
        Command::Delete { id } => {
            source
                .delete_comment(&CommentId(id))
                .await
                .context("deleting comment")?;
        }
    }

    Ok(())
}
