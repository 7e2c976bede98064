//! Response body transcoding.
//!
//! The encoding is chosen in this order: a byte order mark, the caller's
//! explicit charset, the `charset` parameter of the response content type, a
//! `<meta>` declaration near the top of an HTML body, then UTF-8. Malformed
//! sequences decode to U+FFFD.

use crate::error::{RequestError, Result};
use encoding_rs::{Encoding, UTF_8};
use mime::Mime;

const PRESCAN_LEN: usize = 1024;

pub fn decode(bytes: &[u8], charset: Option<&str>, content_type: Option<&str>) -> Result<String> {
    let encoding = match charset {
        Some(label) => Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| RequestError::charset(label))?,
        None => detect(bytes, content_type),
    };

    // decode() lets a BOM override the encoding it is given
    let (text, _, _) = encoding.decode(bytes);
    Ok(text.into_owned())
}

fn detect(bytes: &[u8], content_type: Option<&str>) -> &'static Encoding {
    let mime = content_type.and_then(|value| value.parse::<Mime>().ok());

    let declared = mime
        .as_ref()
        .and_then(|mime| mime.get_param(mime::CHARSET))
        .and_then(|label| Encoding::for_label(label.as_str().as_bytes()));
    if let Some(encoding) = declared {
        return encoding;
    }

    let html = mime.as_ref().is_none_or(|mime| mime.subtype() == mime::HTML);
    if html && let Some(encoding) = prescan_meta(bytes) {
        return encoding;
    }

    UTF_8
}

/// Looks for `charset=` inside a `<meta` tag in the first bytes of the body.
fn prescan_meta(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(PRESCAN_LEN)]).to_ascii_lowercase();

    let mut rest = head.as_str();
    while let Some(start) = rest.find("<meta") {
        let tag = &rest[start..];
        let tag = &tag[..tag.find('>').unwrap_or(tag.len())];
        if let Some(at) = tag.find("charset=") {
            let label: String = tag[at + "charset=".len()..]
                .trim_start_matches(['"', '\''])
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
                .collect();
            if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
                return Some(encoding);
            }
        }
        rest = &rest[start + "<meta".len()..];
    }
    None
}
