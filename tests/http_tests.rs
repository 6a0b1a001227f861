use reactor_http_server::auth::{AuthStore, InMemoryAuthStore};
use reactor_http_server::buffer::Buffer;
use reactor_http_server::http::{parse_urlencoded, HttpRequest, Method, ParseState, ParseStatus, Status};

fn buffer_with(data: &str) -> Buffer {
    let mut buf = Buffer::default();
    buf.append(data);
    buf
}

#[test]
fn test_parse_keep_alive_get() {
    let auth = InMemoryAuthStore::new();
    let mut buf = buffer_with("GET /index HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n");
    let mut request = HttpRequest::new();

    let status = request.parse(&mut buf, &auth).unwrap();
    assert_eq!(status, ParseStatus::Complete);
    assert_eq!(request.state(), ParseState::Finish);
    assert_eq!(request.method(), Some(Method::Get));
    assert_eq!(request.path(), "/index.html");
    assert_eq!(request.version(), "1.1");
    assert_eq!(request.header("Host"), Some("x"));
    assert!(request.is_keep_alive());
    assert_eq!(buf.readable_bytes(), 0);
}

#[test]
fn test_parse_root_and_query() {
    let auth = InMemoryAuthStore::new();
    let mut request = HttpRequest::new();

    let mut buf = buffer_with("GET / HTTP/1.1\r\n\r\n");
    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.path(), "/index.html");

    request.init();
    let mut buf = buffer_with("GET /picture?size=big HTTP/1.1\r\n\r\n");
    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.path(), "/picture.html");

    request.init();
    let mut buf = buffer_with("GET /images/cat.png HTTP/1.1\r\n\r\n");
    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.path(), "/images/cat.png");
}

#[test]
fn test_keep_alive_requires_http_1_1() {
    let auth = InMemoryAuthStore::new();
    let mut buf = buffer_with("GET /index HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
    let mut request = HttpRequest::new();
    request.parse(&mut buf, &auth).unwrap();
    assert!(!request.is_keep_alive());

    let mut buf = buffer_with("GET /index HTTP/1.1\r\nConnection: close\r\n\r\n");
    request.init();
    request.parse(&mut buf, &auth).unwrap();
    assert!(!request.is_keep_alive());
}

#[test]
fn test_garbage_request_line_is_an_error() {
    let auth = InMemoryAuthStore::new();
    let mut buf = buffer_with("GARBAGE\r\n\r\n");
    let mut request = HttpRequest::new();
    assert!(request.parse(&mut buf, &auth).is_err());

    let mut buf = buffer_with("PUT /index HTTP/1.1\r\n\r\n");
    request.init();
    assert!(request.parse(&mut buf, &auth).is_err());

    let mut buf = buffer_with("GET /index FTP/1.1\r\n\r\n");
    request.init();
    assert!(request.parse(&mut buf, &auth).is_err());
}

#[test]
fn test_incomplete_request_leaves_buffer_untouched() {
    let auth = InMemoryAuthStore::new();
    let partial = "GET /index HTTP/1.1\r\nHost: x\r\n";
    let mut buf = buffer_with(partial);
    let mut request = HttpRequest::new();

    assert_eq!(request.parse(&mut buf, &auth).unwrap(), ParseStatus::Incomplete);
    assert_eq!(buf.readable_bytes(), partial.len());

    buf.append("\r\n");
    request.init();
    assert_eq!(request.parse(&mut buf, &auth).unwrap(), ParseStatus::Complete);
    assert_eq!(buf.readable_bytes(), 0);
}

#[test]
fn test_headers_last_write_wins_and_unknown_are_kept() {
    let auth = InMemoryAuthStore::new();
    let mut buf = buffer_with(
        "GET /index HTTP/1.1\r\nHost: a\r\nHost: b\r\nUser-Agent:test\r\nX-Trace: 1\r\n\r\n",
    );
    let mut request = HttpRequest::new();
    request.parse(&mut buf, &auth).unwrap();

    assert_eq!(request.header("Host"), Some("b"));
    assert_eq!(request.header("User-Agent"), Some("test"));
    assert_eq!(request.header("X-Trace"), Some("1"));
    assert_eq!(request.header("host"), None);
}

#[test]
fn test_pipelined_gets_are_parsed_in_order() {
    let auth = InMemoryAuthStore::new();
    let mut buf = buffer_with("GET /login HTTP/1.1\r\n\r\nGET /register HTTP/1.1\r\n\r\n");
    let mut request = HttpRequest::new();

    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.path(), "/login.html");
    assert!(buf.readable_bytes() > 0);

    request.init();
    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.path(), "/register.html");
    assert_eq!(buf.readable_bytes(), 0);
}

#[test]
fn test_content_length_body_waits_for_all_bytes() {
    let auth = InMemoryAuthStore::new();
    let head = "POST /submit HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 11\r\n\r\n";
    let mut buf = buffer_with(head);
    buf.append("hello");
    let mut request = HttpRequest::new();

    assert_eq!(request.parse(&mut buf, &auth).unwrap(), ParseStatus::Incomplete);

    buf.append(" world");
    request.init();
    assert_eq!(request.parse(&mut buf, &auth).unwrap(), ParseStatus::Complete);
    assert_eq!(request.method(), Some(Method::Post));
    assert_eq!(request.body(), "hello world");
}

#[test]
fn test_invalid_content_length_is_an_error() {
    let auth = InMemoryAuthStore::new();
    let mut buf = buffer_with("POST /submit HTTP/1.1\r\nContent-Length: lots\r\n\r\nbody");
    let mut request = HttpRequest::new();
    assert!(request.parse(&mut buf, &auth).is_err());
}

#[test]
fn test_form_decoding() {
    let form = parse_urlencoded("username=a%20b&password=pw");
    assert_eq!(form.len(), 2);
    assert_eq!(form["username"], "a b");
    assert_eq!(form["password"], "pw");

    let form = parse_urlencoded("q=x+y%21&q=last&&flag&bad=%zz%4");
    assert_eq!(form["q"], "last");
    assert_eq!(form["flag"], "");
    assert_eq!(form["bad"], "%zz%4");
}

fn login_request(path: &str, body: &str) -> String {
    format!(
        "POST {} HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        path,
        body.len(),
        body
    )
}

#[test]
fn test_register_then_login() {
    let auth = InMemoryAuthStore::new();
    let mut request = HttpRequest::new();

    let mut buf = buffer_with(&login_request("/register", "username=alice&password=secret"));
    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.post("username"), Some("alice"));
    assert_eq!(request.path(), "/welcome.html");
    assert_eq!(auth.len(), 1);

    request.init();
    let mut buf = buffer_with(&login_request("/register", "username=alice&password=other"));
    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.path(), "/error.html");

    request.init();
    let mut buf = buffer_with(&login_request("/login", "username=alice&password=secret"));
    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.path(), "/welcome.html");

    request.init();
    let mut buf = buffer_with(&login_request("/login", "username=alice&password=wrong"));
    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.path(), "/error.html");
}

#[test]
fn test_form_on_other_paths_skips_auth() {
    let auth = InMemoryAuthStore::new();
    let mut request = HttpRequest::new();
    let mut buf = buffer_with(&login_request("/feedback", "username=bob&password=pw"));
    request.parse(&mut buf, &auth).unwrap();

    assert_eq!(request.path(), "/feedback");
    assert_eq!(request.post("password"), Some("pw"));
    assert!(auth.is_empty());
}

#[test]
fn test_auth_store_contract() {
    let auth = InMemoryAuthStore::with_users([("carol", "pw")]);
    assert!(auth.verify("carol", "pw", true));
    assert!(!auth.verify("carol", "nope", true));
    assert!(!auth.verify("dave", "pw", true));
    assert!(!auth.verify("", "pw", false));
    assert!(auth.verify("dave", "pw", false));
    assert!(auth.verify("dave", "pw", true));
}

#[test]
fn test_status_table() {
    assert_eq!(Status::from_code(404), Some(Status::NotFound));
    assert_eq!(Status::from_code(418), None);
    assert_eq!(Status::Forbidden.as_str(), "Forbidden");
    assert_eq!(Status::BadRequest.error_page(), Some("/400.html"));
    assert_eq!(Status::Ok.error_page(), None);
}

#[test]
fn test_non_header_line_consumes_rest_of_header_block() {
    let auth = InMemoryAuthStore::new();
    let mut buf = buffer_with(
        "GET /index HTTP/1.1\r\nConnection: keep-alive\r\nX-Junk-No-Colon\r\nHost: x\r\n\r\n",
    );
    let mut request = HttpRequest::new();

    assert_eq!(request.parse(&mut buf, &auth).unwrap(), ParseStatus::Complete);
    assert_eq!(request.path(), "/index.html");
    assert!(request.is_keep_alive());
    assert_eq!(request.header("Host"), None);
    assert_eq!(buf.readable_bytes(), 0);
}

#[test]
fn test_non_header_line_then_pipelined_request() {
    let auth = InMemoryAuthStore::new();
    let mut buf = buffer_with("GET /login HTTP/1.1\r\nbogus\r\nHost: x\r\n");
    let mut request = HttpRequest::new();
    assert_eq!(request.parse(&mut buf, &auth).unwrap(), ParseStatus::Incomplete);

    buf.append("\r\nGET /register HTTP/1.1\r\n\r\n");
    request.init();
    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.path(), "/login.html");

    request.init();
    request.parse(&mut buf, &auth).unwrap();
    assert_eq!(request.path(), "/register.html");
    assert_eq!(buf.readable_bytes(), 0);
}
