use crate::auth::AuthStore;
use crate::buffer::Buffer;
use crate::error::{ServerError, ServerResult};
use log::{debug, trace, warn};
use std::collections::HashMap;

const CRLF: &[u8] = b"\r\n";

/// Pages reachable without their `.html` suffix
const DEFAULT_HTML: [&str; 6] = ["/index", "/register", "/login", "/welcome", "/video", "/picture"];

/// Headers the server acts on; everything else is ignored
const RECOGNIZED_HEADERS: [&str; 4] = ["Connection", "Content-Length", "Content-Type", "Host"];

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// HTTP Status Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 200,
    BadRequest = 400,
    Forbidden = 403,
    NotFound = 404,
    ServiceUnavailable = 503,
}

impl Status {
    /// Look up a code in the status table
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(Status::Ok),
            400 => Some(Status::BadRequest),
            403 => Some(Status::Forbidden),
            404 => Some(Status::NotFound),
            503 => Some(Status::ServiceUnavailable),
            _ => None,
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the text description for this status code
    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Static page served as the body for this status, if any
    pub fn error_page(&self) -> Option<&'static str> {
        match *self {
            Status::BadRequest => Some("/400.html"),
            Status::Forbidden => Some("/403.html"),
            Status::NotFound => Some("/404.html"),
            _ => None,
        }
    }
}

/// HTTP Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Parse a method from a string
    pub fn parse(s: &str) -> ServerResult<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            _ => Err(ServerError::HttpParse(format!("Unsupported method: {}", s))),
        }
    }

    /// Convert the method to a string
    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// HTTP Parser State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body,
    Finish,
}

/// Outcome of feeding buffered bytes to [`HttpRequest::parse`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// A whole request was parsed and consumed from the buffer
    Complete,
    /// More bytes are needed; the buffer was left untouched
    Incomplete,
}

/// Login/register form targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormTag {
    Register,
    Login,
}

impl FormTag {
    fn for_path(path: &str) -> Option<Self> {
        match path {
            "/register.html" => Some(FormTag::Register),
            "/login.html" => Some(FormTag::Login),
            _ => None,
        }
    }
}

/// The request parser and the request it produces
#[derive(Debug, Clone)]
pub struct HttpRequest {
    state: ParseState,
    method: Option<Method>,
    path: String,
    version: String,
    headers: HashMap<String, String>,
    body: String,
    post: HashMap<String, String>,
}

impl HttpRequest {
    /// Create a new HTTP parser
    pub fn new() -> Self {
        Self {
            state: ParseState::RequestLine,
            method: None,
            path: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            body: String::new(),
            post: HashMap::new(),
        }
    }

    /// Reset to a fresh parser state
    pub fn init(&mut self) {
        self.state = ParseState::RequestLine;
        self.method = None;
        self.path.clear();
        self.version.clear();
        self.headers.clear();
        self.body.clear();
        self.post.clear();
    }

    /// Parse one request from the readable bytes of `buf`.
    ///
    /// On success the request's bytes are consumed. `Incomplete` leaves the
    /// buffer as it was. A malformed request line is an error.
    pub fn parse(&mut self, buf: &mut Buffer, auth: &dyn AuthStore) -> ServerResult<ParseStatus> {
        if self.state == ParseState::Finish {
            self.init();
        }

        let data = buf.peek();
        let mut pos = 0;

        while self.state != ParseState::Finish {
            match self.state {
                ParseState::RequestLine => {
                    let Some(end) = find_crlf(&data[pos..]) else {
                        return Ok(ParseStatus::Incomplete);
                    };
                    self.parse_request_line(&data[pos..pos + end])?;
                    self.parse_path();
                    pos += end + CRLF.len();
                }
                ParseState::Headers => {
                    let Some(end) = find_crlf(&data[pos..]) else {
                        return Ok(ParseStatus::Incomplete);
                    };
                    let line = &data[pos..pos + end];
                    pos += end + CRLF.len();
                    if !self.parse_header(line) && !line.is_empty() {
                        // Drop the rest of the block up to its blank line
                        loop {
                            let Some(end) = find_crlf(&data[pos..]) else {
                                return Ok(ParseStatus::Incomplete);
                            };
                            pos += end + CRLF.len();
                            if end == 0 {
                                break;
                            }
                        }
                    }
                }
                ParseState::Body => {
                    let remaining = &data[pos..];
                    let len = match self.content_length()? {
                        Some(len) if len > remaining.len() => return Ok(ParseStatus::Incomplete),
                        Some(len) => len,
                        None if self.method == Some(Method::Post) => remaining.len(),
                        None => 0,
                    };
                    self.parse_body(&remaining[..len], auth);
                    pos += len;
                }
                ParseState::Finish => {}
            }
        }

        debug!("[{}], [{}], [{}]", self.method_str(), self.path, self.version);
        buf.retrieve(pos);
        Ok(ParseStatus::Complete)
    }

    /// `METHOD SP PATH SP HTTP/VERSION`, no other spaces
    fn parse_request_line(&mut self, line: &[u8]) -> ServerResult<()> {
        let line = std::str::from_utf8(line)
            .map_err(|_| ServerError::HttpParse("request line is not UTF-8".to_string()))?;

        let mut parts = line.splitn(3, ' ');
        let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            warn!("request line error: {:?}", line);
            return Err(ServerError::HttpParse(format!("Invalid request line: {:?}", line)));
        };

        let version = match version.strip_prefix("HTTP/") {
            Some(v) if !v.contains(' ') => v,
            _ => {
                warn!("request line error: {:?}", line);
                return Err(ServerError::HttpParse(format!("Invalid request line: {:?}", line)));
            }
        };

        self.method = Some(Method::parse(method)?);
        self.path = path.to_string();
        self.version = version.to_string();
        self.state = ParseState::Headers;
        Ok(())
    }

    fn parse_path(&mut self) {
        if let Some(query) = self.path.find('?') {
            self.path.truncate(query);
        }

        if self.path == "/" {
            self.path = "/index.html".to_string();
        } else if DEFAULT_HTML.contains(&self.path.as_str()) {
            self.path.push_str(".html");
        }
    }

    /// `Name: Value` with an optional single space after the colon. Anything
    /// else, the empty line included, ends the header block. Returns whether
    /// the line was a header.
    fn parse_header(&mut self, line: &[u8]) -> bool {
        let line = String::from_utf8_lossy(line);
        match line.split_once(':') {
            Some((name, value)) => {
                let value = value.strip_prefix(' ').unwrap_or(value);
                if !RECOGNIZED_HEADERS.contains(&name) {
                    trace!("ignoring header {}: {}", name, value);
                }
                self.headers.insert(name.to_string(), value.to_string());
                true
            }
            None => {
                if !line.is_empty() {
                    debug!("non-header line ends header block: {:?}", line);
                }
                self.state = ParseState::Body;
                false
            }
        }
    }

    fn parse_body(&mut self, body: &[u8], auth: &dyn AuthStore) {
        self.body = String::from_utf8_lossy(body).into_owned();
        self.parse_post(auth);
        self.state = ParseState::Finish;
        debug!("body: {} bytes", self.body.len());
    }

    fn parse_post(&mut self, auth: &dyn AuthStore) {
        let is_form = self
            .header("Content-Type")
            .is_some_and(|ct| ct.starts_with(FORM_URLENCODED));
        if self.method != Some(Method::Post) || !is_form {
            return;
        }

        self.post = parse_urlencoded(&self.body);

        if let Some(tag) = FormTag::for_path(&self.path) {
            debug!("form tag: {:?}", tag);
            let username = self.post.get("username").map(String::as_str).unwrap_or("");
            let password = self.post.get("password").map(String::as_str).unwrap_or("");
            self.path = if auth.verify(username, password, tag == FormTag::Login) {
                "/welcome.html".to_string()
            } else {
                "/error.html".to_string()
            };
        }
    }

    fn content_length(&self) -> ServerResult<Option<usize>> {
        match self.header("Content-Length") {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ServerError::HttpParse(format!("Invalid Content-Length: {}", value))),
            None => Ok(None),
        }
    }

    /// True iff `Connection: keep-alive` was sent over HTTP/1.1
    pub fn is_keep_alive(&self) -> bool {
        self.header("Connection") == Some("keep-alive") && self.version == "1.1"
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    fn method_str(&self) -> &'static str {
        self.method.map_or("", |m| m.as_str())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// A decoded form field
    pub fn post(&self, key: &str) -> Option<&str> {
        self.post.get(key).map(String::as_str)
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(CRLF.len()).position(|w| w == CRLF)
}

/// Decode an `application/x-www-form-urlencoded` body.
///
/// Pairs split on `&`, key and value on the first `=`; `+` becomes a space
/// and `%XX` the byte it encodes. A later duplicate key wins.
pub fn parse_urlencoded(body: &str) -> HashMap<String, String> {
    let mut form = HashMap::new();
    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = decode_component(value);
        debug!("{} = {}", key, value);
        form.insert(key, value);
    }
    form
}

fn decode_component(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi * 16 + lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}
