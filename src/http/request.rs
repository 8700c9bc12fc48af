/// Minimal parsed view of one HTTP request. The server treats every method
/// as a path-based fetch, so only the request line matters; the body is
/// consumed (to keep the socket well-behaved) but never interpreted.
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
}

impl HttpRequest {
    pub fn parse(raw_data: &[u8]) -> Option<Self> {
        let header_end = Self::find_header_end(raw_data)?;
        let header_str = std::str::from_utf8(&raw_data[..header_end]).ok()?;

        let first_line = header_str.split("\r\n").next()?;
        let mut parts = first_line.split_whitespace();
        let method = parts.next()?.to_string();
        let uri = parts.next()?.to_string();

        Some(HttpRequest { method, uri })
    }

    /// The request URI without any query string.
    pub fn path(&self) -> &str {
        match self.uri.split_once('?') {
            Some((path, _)) => path,
            None => &self.uri,
        }
    }

    /// True once the headers and any Content-Length body are buffered.
    pub fn is_complete(buf: &[u8]) -> bool {
        if let Some(header_end) = Self::find_header_end(buf) {
            let content_length = Self::get_content_length(&buf[..header_end]).unwrap_or(0);
            let body_len = buf.len() - header_end;
            return body_len >= content_length;
        }
        false
    }

    fn find_header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|pos| pos + 4)
    }

    fn get_content_length(header_bytes: &[u8]) -> Option<usize> {
        let header_str = std::str::from_utf8(header_bytes).ok()?;
        for line in header_str.lines() {
            let line_lower = line.to_lowercase();
            if line_lower.starts_with("content-length:") {
                return line_lower["content-length:".len()..].trim().parse().ok();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_request_line() {
        let req = HttpRequest::parse(b"GET /a/b.html?x=1 HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.uri, "/a/b.html?x=1");
        assert_eq!(req.path(), "/a/b.html");
    }

    #[test]
    fn incomplete_until_headers_end() {
        assert!(!HttpRequest::is_complete(b"GET / HTTP/1.1\r\nHost: x\r\n"));
        assert!(HttpRequest::is_complete(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
    }

    #[test]
    fn waits_for_a_content_length_body() {
        let partial = b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab";
        let full = b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd";
        assert!(!HttpRequest::is_complete(partial));
        assert!(HttpRequest::is_complete(full));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(HttpRequest::parse(b"\r\n\r\n").is_none());
    }
}
