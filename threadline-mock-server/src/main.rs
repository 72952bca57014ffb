use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use structopt::StructOpt;
use threadline_api::CommentRecord;
use threadline_mock_server::{router, MockServer, DEFAULT_PAGE_SIZE};

#[derive(Debug, StructOpt)]
#[structopt(name = "threadline-mock-server", about = "In-memory comment server")]
struct Opt {
    /// Address to listen on
    #[structopt(long, env = "THREADLINE_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    #[structopt(long, default_value = "20")]
    page_size: usize,

    /// JSON file holding an array of comment records to start with
    #[structopt(long, parse(from_os_str))]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let opt = Opt::from_args();
    let server = MockServer::new().with_page_size(opt.page_size);
    if opt.page_size != DEFAULT_PAGE_SIZE {
        tracing::info!(page_size = opt.page_size, "using custom page size");
    }
    if let Some(seed) = &opt.seed {
        let data = std::fs::read(seed)
            .with_context(|| format!("reading seed file {}", seed.display()))?;
        let records: Vec<CommentRecord> = serde_json::from_slice(&data)
            .with_context(|| format!("parsing seed file {}", seed.display()))?;
        tracing::info!(count = records.len(), "seeding comments");
        server.seed(records);
    }

    let app = router(Arc::new(server));
    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
