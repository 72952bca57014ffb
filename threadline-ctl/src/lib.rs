use std::{fmt::Write, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use threadline_api::{
    CommentId, CommentRecord, CommentSource, Cursor, Error, LikeRequest, LikeState, NewComment,
    Page, PostId,
};
use threadline_client::{Expansion, VisibleNode};

/// `CommentSource` speaking the REST API over HTTP
pub struct HttpSource {
    client: reqwest::Client,
    base: reqwest::Url,
    token: Option<String>,
}

fn transport_error(err: reqwest::Error) -> Error {
    match err.is_timeout() {
        true => Error::Timeout,
        false => Error::Transport(err.to_string()),
    }
}

impl HttpSource {
    pub fn new(host: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<HttpSource> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        let base = reqwest::Url::parse(host).with_context(|| format!("parsing host {host:?}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("host {host:?} cannot have a path");
        }
        Ok(HttpSource {
            client,
            base,
            token,
        })
    }

    /// Request to `/api/<segments>`, each segment percent-encoded on its own
    fn request(&self, method: reqwest::Method, segments: &[&str]) -> reqwest::RequestBuilder {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        let req = self.client.request(method, url);
        match &self.token {
            Some(tok) => req.bearer_auth(tok),
            None => req,
        }
    }

    async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.bytes().await.map_err(transport_error)?;
        Err(Error::parse(&body).unwrap_or_else(|err| {
            tracing::warn!(?err, %status, "server returned an unparseable error");
            Error::Unknown(format!("server answered {status}"))
        }))
    }

    async fn json<T>(req: reqwest::RequestBuilder) -> Result<T, Error>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        Self::send(req).await?.json().await.map_err(transport_error)
    }

    async fn page(
        &self,
        segments: &[&str],
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error> {
        let mut req = self.request(reqwest::Method::GET, segments);
        if let Some(c) = cursor {
            req = req.query(&[("cursor", c.as_str())]);
        }
        Self::json(req).await
    }
}

#[async_trait]
impl CommentSource for HttpSource {
    async fn fetch_root_comments(
        &self,
        post: &PostId,
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error> {
        self.page(&["posts", post.as_str(), "comments"], cursor)
            .await
    }

    async fn fetch_replies(
        &self,
        parent: &CommentId,
        cursor: Option<&Cursor>,
    ) -> Result<Page<CommentRecord>, Error> {
        self.page(&["comments", parent.as_str(), "replies"], cursor)
            .await
    }

    async fn create_comment(&self, comment: NewComment) -> Result<CommentRecord, Error> {
        Self::json(self.request(reqwest::Method::POST, &["comments"]).json(&comment)).await
    }

    async fn toggle_like(&self, comment: &CommentId, desired: bool) -> Result<LikeState, Error> {
        Self::json(
            self.request(reqwest::Method::POST, &["comments", comment.as_str(), "like"])
                .json(&LikeRequest { desired }),
        )
        .await
    }

    async fn delete_comment(&self, comment: &CommentId) -> Result<(), Error> {
        Self::send(self.request(reqwest::Method::DELETE, &["comments", comment.as_str()]))
            .await?;
        Ok(())
    }
}

/// Renders the visible nodes as an indented listing, one comment per line
pub fn render(nodes: &[VisibleNode]) -> String {
    let mut out = String::new();
    for n in nodes {
        let c = &n.comment;
        let marker = match (c.expansion, c.reply_count) {
            (Expansion::Expanded, _) => '-',
            (Expansion::Loading, _) => '~',
            (Expansion::Collapsed, 0) => ' ',
            (Expansion::Collapsed, _) => '+',
        };
        let _ = write!(
            out,
            "{:indent$}{marker} [{}] {}: {} ({} likes{}, {} replies{})",
            "",
            c.id(),
            c.record.author.display_name,
            c.record.content,
            c.like_count,
            if c.viewer_has_liked { ", liked" } else { "" },
            c.reply_count,
            if c.has_more_replies { ", more" } else { "" },
            indent = 2 * n.depth,
        );
        out.push('\n');
    }
    out
}
