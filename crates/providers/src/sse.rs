//! SSE plumbing shared by provider adapters.
//!
//! The pattern: receive a `reqwest::Response`, buffer chunks, split on
//! `\n\n`, extract `data:` payloads, and feed each payload to an
//! adapter-specific parser.

use mnemon_domain::error::Error;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by `\n\n`; only `data:` lines matter. The buffer
/// is drained in place and any trailing partial event remains for the
/// next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else if e.is_connect() {
        Error::Http(format!("connection failed: {e}"))
    } else {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["{\"a\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        assert_eq!(drain_data_lines(&mut buf), vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 7\ndata: payload\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["payload"]);
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("data: chunk1");
        assert!(drain_data_lines(&mut buf).is_empty());
        buf.push_str("\n\ndata: chunk2\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["chunk1", "chunk2"]);
        assert!(buf.is_empty());
    }
}
