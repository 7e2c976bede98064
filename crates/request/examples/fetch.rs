//! Fetches a page and prints what each view sees.
//!
//! ```sh
//! cargo run --example fetch -- https://example.com/
//! ```

use micro_request::Request;
use micro_request::cookie::FlexibleJar;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let url = std::env::args().nth(1).unwrap_or_else(|| "https://example.com/".to_owned());

    let mut request = Request::get(url);
    request.cookie_jar = Some(FlexibleJar::new("fetch-example"));
    request.headers.push(("User-Agent".into(), "micro-request/0.3".into()));

    let (text, document) = tokio::join!(request.text(), request.html());
    let text = match text {
        Ok(text) => text,
        Err(e) => {
            error!(cause = %e, "request failed");
            return;
        }
    };

    info!(status = ?request.status_message(), content_type = ?request.header("content-type"), len = text.len(), "response");
    match document {
        Ok(document) => {
            info!(title = ?document.title(), "document");
            if let Ok(links) = document.select("a[href]") {
                for link in links {
                    info!(text = %link.text.trim(), href = ?link.attrs.iter().find(|(n, _)| n == "href").map(|(_, v)| v), "link");
                }
            }
        }
        Err(e) => error!(cause = %e, "markup view failed"),
    }

    match request.to_json() {
        Ok(json) => println!("{json}"),
        Err(e) => error!(cause = %e, "serialization failed"),
    }
}
