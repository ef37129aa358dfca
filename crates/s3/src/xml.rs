//! Response body parsing and request body rendering
//!
//! The provider answers in small XML documents. Only the handful of
//! elements the engine needs are extracted; everything else is skipped.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use bfs_core::{Error, ListEntry, ListResult, MultipartUploadInfo, Result};

/// One parse event, reduced to what the extractors need
enum Node<'a> {
    Open(&'a str),
    Close(&'a str),
    Text(&'a str, &'a str),
}

/// Walk `body`, reporting element opens, closes and text with its element name.
fn walk(body: &str, mut visit: impl FnMut(Node<'_>)) -> Result<()> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                visit(Node::Open(&name));
                stack.push(name);
            }
            Ok(Event::End(_)) => {
                if let Some(name) = stack.pop() {
                    visit(Node::Close(&name));
                }
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                visit(Node::Open(&name));
                visit(Node::Close(&name));
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| Error::Xml(format!("bad text at {}: {e}", reader.buffer_position())))?;
                if let Some(element) = stack.last() {
                    visit(Node::Text(element, &text));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Xml(format!(
                    "malformed response at {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Text of the first `element` in the document
fn first_text(body: &str, element: &str) -> Result<Option<String>> {
    let mut found = None;
    walk(body, |node| {
        if let Node::Text(name, text) = node
            && name == element
            && found.is_none()
        {
            found = Some(text.to_string());
        }
    })?;
    Ok(found)
}

/// `UploadId` from an initiate-multipart response
pub fn parse_upload_id(body: &str) -> Result<String> {
    match first_text(body, "UploadId")? {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(Error::Xml("no UploadId in initiate response".into())),
    }
}

/// `ETag` from a part-copy (`CopyPartResult`) or object-copy response, quotes removed
pub fn parse_copy_etag(body: &str) -> Result<String> {
    match first_text(body, "ETag")? {
        Some(etag) => Ok(etag.trim_matches('"').to_string()),
        None => Err(Error::Xml("no ETag in copy response".into())),
    }
}

/// `(Code, Message)` from an error response body, when it is one
pub fn parse_error(body: &str) -> Option<(Option<String>, Option<String>)> {
    let mut code = None;
    let mut message = None;
    walk(body, |node| match node {
        Node::Text("Code", text) => code = Some(text.to_string()),
        Node::Text("Message", text) => message = Some(text.to_string()),
        _ => {}
    })
    .ok()?;
    if code.is_none() && message.is_none() {
        return None;
    }
    Some((code, message))
}

fn parse_timestamp(text: &str) -> Option<jiff::Timestamp> {
    text.parse().ok()
}

/// A `ListBucketResult` page
pub fn parse_list_bucket(body: &str) -> Result<ListResult> {
    let mut result = ListResult::default();
    let mut entry: Option<ListEntry> = None;
    let mut in_prefixes = false;

    walk(body, |node| match node {
        Node::Open("Contents") => {
            entry = Some(ListEntry {
                key: String::new(),
                size_bytes: 0,
                last_modified: None,
                etag: None,
                storage_class: None,
            });
        }
        Node::Close("Contents") => {
            if let Some(e) = entry.take() {
                result.items.push(e);
            }
        }
        Node::Open("CommonPrefixes") => in_prefixes = true,
        Node::Close("CommonPrefixes") => in_prefixes = false,
        Node::Text(name, text) => match (entry.as_mut(), name) {
            (Some(e), "Key") => e.key = text.to_string(),
            (Some(e), "Size") => e.size_bytes = text.parse().unwrap_or(0),
            (Some(e), "LastModified") => e.last_modified = parse_timestamp(text),
            (Some(e), "ETag") => e.etag = Some(text.trim_matches('"').to_string()),
            (Some(e), "StorageClass") => e.storage_class = Some(text.to_string()),
            (None, "Prefix") if in_prefixes => result.common_prefixes.push(text.to_string()),
            (None, "IsTruncated") => result.truncated = text == "true",
            (None, "NextMarker") => result.next_marker = Some(text.to_string()),
            _ => {}
        },
        _ => {}
    })?;

    // Without a NextMarker the last key is the marker for the next page
    if result.truncated && result.next_marker.is_none() {
        result.next_marker = result.items.last().map(|e| e.key.clone());
    }
    Ok(result)
}

/// Sessions from a `ListMultipartUploadsResult`
pub fn parse_multipart_uploads(body: &str) -> Result<Vec<MultipartUploadInfo>> {
    let mut uploads = Vec::new();
    let mut current: Option<MultipartUploadInfo> = None;

    walk(body, |node| match node {
        Node::Open("Upload") => {
            current = Some(MultipartUploadInfo {
                key: String::new(),
                upload_id: String::new(),
                initiated: None,
            });
        }
        Node::Close("Upload") => {
            if let Some(u) = current.take() {
                uploads.push(u);
            }
        }
        Node::Text(name, text) => {
            if let Some(u) = current.as_mut() {
                match name {
                    "Key" => u.key = text.to_string(),
                    "UploadId" => u.upload_id = text.to_string(),
                    "Initiated" => u.initiated = parse_timestamp(text),
                    _ => {}
                }
            }
        }
        _ => {}
    })?;
    Ok(uploads)
}

/// Body of the complete-multipart request, parts in ascending number
pub fn complete_multipart_body(etags: &[String]) -> String {
    let mut body = String::from("<CompleteMultipartUpload>\n");
    for (index, etag) in etags.iter().enumerate() {
        body.push_str(&format!(
            "  <Part>\n    <PartNumber>{}</PartNumber>\n    <ETag>\"{}\"</ETag>\n  </Part>\n",
            index + 1,
            escape(etag.as_str())
        ));
    }
    body.push_str("</CompleteMultipartUpload>\n");
    body
}
