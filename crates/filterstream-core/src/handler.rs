//! `statuses/filter` request handler
//!
//! Checks, in order: method, form, protocol. The first failing check answers
//! with a plain-text error. On success the response head goes out with
//! `Content-Type: application/json` and an [`Emitter`] task starts feeding
//! the body.

use crate::filter::{FilterSpec, FormError, FormParams};
use crate::response::{self, ResponseBody};
use crate::stream::Emitter;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, Version};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bytes buffered between the emitter and hyper before writes wait
const PIPE_CAPACITY: usize = 8 * 1024;

/// Default cap on the form body, in bytes
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// What the host hands the handler for one request
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub emitter: Emitter,
    /// Fires when the client goes away or the server shuts down
    pub cancel: CancellationToken,
    pub body_limit: usize,
}

impl StreamContext {
    pub fn new(emitter: Emitter, cancel: CancellationToken) -> Self {
        Self {
            emitter,
            cancel,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

/// Reasons a filter request is answered without a stream
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Invalid form data")]
    InvalidForm(#[source] FormError),

    #[error("Streaming not supported")]
    StreamingUnsupported,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Rejection::InvalidForm(_) => StatusCode::BAD_REQUEST,
            Rejection::StreamingUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response<ResponseBody> {
        response::error(self.status(), &self.to_string())
    }
}

/// Handle a request to the filter endpoint
pub async fn handle_filter<B>(req: Request<B>, ctx: StreamContext) -> Response<ResponseBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match open_stream(req, ctx).await {
        Ok(res) => res,
        Err(rejection) => {
            match &rejection {
                Rejection::InvalidForm(cause) => debug!(%cause, "rejected filter request"),
                other => debug!(reason = %other, "rejected filter request"),
            }
            rejection.into_response()
        }
    }
}

async fn open_stream<B>(
    req: Request<B>,
    ctx: StreamContext,
) -> Result<Response<ResponseBody>, Rejection>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if req.method() != Method::POST {
        return Err(Rejection::MethodNotAllowed);
    }

    let (parts, body) = req.into_parts();
    let form = read_form(parts.uri.query(), body, ctx.body_limit)
        .await
        .map_err(Rejection::InvalidForm)?;
    let spec = FilterSpec::from_form(&form);

    if !supports_streaming(parts.version) {
        return Err(Rejection::StreamingUnsupported);
    }

    info!(topics = %spec, "simulating tweets for topics");

    let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let StreamContext { emitter, cancel, .. } = ctx;
    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();
        emitter.run(&mut writer, &spec, &mut rng, &cancel).await;
    });

    Ok(response::json_stream(reader))
}

/// HTTP/1.0 bodies are close-delimited and HTTP/1.1 bodies chunked; both
/// can be flushed a line at a time.
fn supports_streaming(version: Version) -> bool {
    matches!(version, Version::HTTP_10 | Version::HTTP_11)
}

async fn read_form<B>(query: Option<&str>, body: B, limit: usize) -> Result<FormParams, FormError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let collected = Limited::new(body, limit).collect().await.map_err(|e| {
        if e.is::<LengthLimitError>() {
            FormError::BodyTooLarge { limit }
        } else {
            FormError::Body(e.to_string())
        }
    })?;
    FormParams::parse(query, &collected.to_bytes())
}
