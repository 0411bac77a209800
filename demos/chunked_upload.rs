//! Minimal h1bridge example: a chunked upload and a plain GET on one
//! keep-alive connection, with the raw response bytes written to stdout.
//!
//! Run with:
//!   RUST_LOG=trace cargo run --example chunked_upload
//!
//! A real transport would feed events decoded from a socket; here they are
//! built by hand.

use std::time::Duration;

use h1bridge::{
    Chunk, Error, Event, Request, RequestBridge, RequestHead, ResponseWriter, SharedConnection,
    StreamConnection,
};
use http::header::{CONTENT_TYPE, EXPECT, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Version};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let bridge = RequestBridge::new(app);
    let conn: SharedConnection = StreamConnection::spawn(tokio::io::stdout(), None);

    // POST /upload, body "hello world" in three chunks. Answered with a
    // 100 Continue first, then a streamed (chunked) response.
    let upload = RequestHead::new(Method::POST, "/upload", Version::HTTP_11)
        .header(TRANSFER_ENCODING, HeaderValue::from_static("chunked"))
        .header(EXPECT, HeaderValue::from_static("100-continue"));
    let chunked = upload.declares_chunked();
    let upload = upload.chunked(chunked);

    bridge.on_event(&conn, Event::Head(upload)).await;
    for part in ["hello", " ", "world"] {
        bridge.on_event(&conn, Event::Chunk(Chunk::new(part))).await;
    }
    bridge.on_event(&conn, Event::Chunk(Chunk::last(""))).await;

    // GET /status on the same connection: a buffered response.
    let status = RequestHead::new(Method::GET, "/status", Version::HTTP_11);
    bridge.on_event(&conn, Event::Head(status)).await;

    // GET with a target that does not parse: a 400, then the connection closes.
    let bad = RequestHead::new(Method::GET, "/files/%zz", Version::HTTP_11);
    bridge.on_event(&conn, Event::Head(bad)).await;

    // Let the writer task drain before the runtime shuts down.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn app(req: Request, writer: ResponseWriter) -> Result<(), Error> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

    match req.path() {
        "/upload" => {
            // Length unknown up front: streamed as one chunk per write.
            let body = writer.write_status_and_headers(StatusCode::OK, headers, None)?;
            body.write(b"received ")?;
            body.write(format!("{} bytes\n", req.body().len()).as_bytes())?;
            body.commit()
        }
        "/status" => {
            let text = b"ok\n";
            let body = writer.write_status_and_headers(StatusCode::OK, headers, Some(text.len() as u64))?;
            body.write(text)?;
            body.commit()
        }
        _ => writer.write_status_and_headers(StatusCode::NOT_FOUND, headers, Some(0))?.commit(),
    }
}
