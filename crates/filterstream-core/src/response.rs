//! Response constructors
//!
//! Every response body is boxed into [`ResponseBody`] so fixed error
//! messages and the open-ended tweet stream share one service type.

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::{header, HeaderValue, Response, StatusCode};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Body type for every response the server produces
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, std::io::Error>;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// Plain-text error with the message on its own line
pub fn error(status: StatusCode, message: &str) -> Response<ResponseBody> {
    let mut body = String::with_capacity(message.len() + 1);
    body.push_str(message);
    body.push('\n');

    let mut res = Response::new(full(body));
    *res.status_mut() = status;
    let headers = res.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    res
}

/// 404 Not Found
pub fn not_found() -> Response<ResponseBody> {
    error(StatusCode::NOT_FOUND, "404 page not found")
}

/// 200 with `application/json` and a body fed from `reader` as it fills.
///
/// Each chunk the reader yields becomes one body frame; hyper writes and
/// flushes frames as they arrive.
pub fn json_stream<R>(reader: R) -> Response<ResponseBody>
where
    R: AsyncRead + Send + Sync + 'static,
{
    let frames = ReaderStream::new(reader).map_ok(Frame::data);
    let mut res = Response::new(BodyExt::boxed(StreamBody::new(frames)));
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(APPLICATION_JSON),
    );
    res
}

fn full(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed()
}
