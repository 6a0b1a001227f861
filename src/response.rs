//! Response assembly for static resources.
//!
//! The status line and headers go into the connection's write buffer; the
//! file itself stays in a read-only mapping and is sent as a second
//! gather segment.

use crate::buffer::Buffer;
use crate::http::Status;
use crate::static_files::{content_type, MappedFile};
use log::{debug, warn};
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

/// "Other" read permission bit
const S_IROTH: u32 = 0o004;

/// The response builder for one request
#[derive(Debug, Default)]
pub struct HttpResponse {
    code: u16,
    src_dir: PathBuf,
    path: String,
    keep_alive: bool,
    file: Option<MappedFile>,
    file_len: usize,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for a new response, releasing any previous mapping.
    ///
    /// A 200 `code` is subject to resource resolution; any other code is
    /// kept as is.
    pub fn init(&mut self, src_dir: &Path, path: &str, keep_alive: bool, code: u16) {
        self.unmap_file();
        self.code = code;
        self.keep_alive = keep_alive;
        self.path = path.to_string();
        self.src_dir = src_dir.to_path_buf();
        self.file_len = 0;
    }

    /// Resolve the resource and serialize status line and headers into `buf`
    pub fn make_response(&mut self, buf: &mut Buffer) {
        if self.code == Status::Ok.code() {
            self.resolve();
        }
        self.error_html();
        self.add_state_line(buf);
        self.add_header(buf);
        self.add_content(buf);
    }

    fn resolve(&mut self) {
        if has_parent_component(&self.path) {
            warn!("refusing path with parent components: {}", self.path);
            self.code = Status::Forbidden.code();
            return;
        }

        match fs::metadata(self.full_path()) {
            Ok(meta) if meta.is_dir() => self.code = Status::NotFound.code(),
            Ok(meta) if meta.permissions().mode() & S_IROTH == 0 => {
                self.code = Status::Forbidden.code()
            }
            Ok(meta) => self.file_len = meta.len() as usize,
            Err(_) => self.code = Status::NotFound.code(),
        }
    }

    /// Swap in the static page for error codes that have one
    fn error_html(&mut self) {
        let Some(page) = Status::from_code(self.code).and_then(|s| s.error_page()) else {
            return;
        };
        self.path = page.to_string();
        self.file_len = fs::metadata(self.full_path())
            .map(|meta| meta.len() as usize)
            .unwrap_or(0);
    }

    fn add_state_line(&mut self, buf: &mut Buffer) {
        let status = match Status::from_code(self.code) {
            Some(status) => status,
            None => {
                self.code = Status::BadRequest.code();
                Status::BadRequest
            }
        };
        buf.append(format!("HTTP/1.1 {} {}\r\n", self.code, status.as_str()));
    }

    fn add_header(&self, buf: &mut Buffer) {
        buf.append("Connection: ");
        if self.keep_alive {
            buf.append("keep-alive\r\n");
            buf.append("keep-alive: max=6, timeout=120\r\n");
        } else {
            buf.append("close\r\n");
        }
        buf.append(format!("Content-type: {}\r\n", content_type(&self.path)));
    }

    fn add_content(&mut self, buf: &mut Buffer) {
        let full_path = self.full_path();
        let file = match File::open(&full_path) {
            Ok(file) => file,
            Err(e) => {
                debug!("open {} failed: {}", full_path.display(), e);
                self.error_content(buf, "File NotFound!");
                return;
            }
        };

        // The file may have changed since it was resolved
        self.file_len = match file.metadata() {
            Ok(meta) => meta.len() as usize,
            Err(e) => {
                warn!("stat {} failed: {}", full_path.display(), e);
                self.file_len = 0;
                self.error_content(buf, "File NotFound!");
                return;
            }
        };

        if self.file_len > 0 {
            match MappedFile::from_file(&file) {
                Ok(mapped) => self.file = Some(mapped),
                Err(e) => {
                    warn!("mmap {} failed: {}", full_path.display(), e);
                    self.file_len = 0;
                    self.error_content(buf, "File NotFound!");
                    return;
                }
            }
        }

        debug!("file path {}", full_path.display());
        buf.append(format!("Content-length: {}\r\n\r\n", self.file_len));
    }

    /// Synthesize an HTML error body directly into `buf`
    pub fn error_content(&self, buf: &mut Buffer, message: &str) {
        let status = Status::from_code(self.code).unwrap_or(Status::BadRequest);
        let body = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>ReactorWebServer</em></body></html>",
            self.code,
            status.as_str(),
            message
        );

        buf.append(format!("Content-length: {}\r\n\r\n", body.len()));
        buf.append(body);
    }

    /// Release the mapped file, if any
    pub fn unmap_file(&mut self) {
        self.file = None;
    }

    /// Mapped file content, if the body is a file
    pub fn file(&self) -> Option<&[u8]> {
        self.file.as_ref().map(MappedFile::as_slice)
    }

    pub fn file_len(&self) -> usize {
        self.file.as_ref().map_or(0, MappedFile::len)
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    fn full_path(&self) -> PathBuf {
        self.src_dir.join(self.path.trim_start_matches('/'))
    }
}

fn has_parent_component(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
}
