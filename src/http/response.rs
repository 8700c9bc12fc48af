/// One fully materialized HTTP response. Only 200 and 404 are produced;
/// the dispatcher degrades every per-request failure to a bodyless 404.
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.to_string()),
            body,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: None,
            body: Vec::new(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            404 => "Not Found",
            _ => "Unknown",
        }
    }

    /// Serializes the status line, headers and body into wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason());
        if let Some(ct) = &self.content_type {
            header.push_str(&format!("Content-Type: {}\r\n", ct));
        }
        header.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        header.push_str("Server: gomiweb\r\n");
        header.push_str("Connection: close\r\n\r\n");

        [header.as_bytes(), &self.body].concat()
    }
}
