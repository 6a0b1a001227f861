use crate::auth::AuthStore;
use crate::buffer::Buffer;
use crate::http::{HttpRequest, ParseStatus, Status};
use crate::response::HttpResponse;
use log::{debug, warn};
use std::io::{self, ErrorKind, IoSlice, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

/// Level-triggered writes keep looping while more than this remains queued
pub const WRITE_FLUSH_THRESHOLD: usize = 10 * 1024;

/// What request processing needs from the server
#[derive(Clone, Copy)]
pub struct RequestContext<'a> {
    pub doc_root: &'a Path,
    pub auth: &'a dyn AuthStore,
    pub max_request_size: usize,
}

/// One accepted client socket and its per-request state.
///
/// Slots are reused: [`HttpConnection::init`] resets everything in place.
#[derive(Debug)]
pub struct HttpConnection {
    stream: Option<TcpStream>,
    peer_addr: Option<SocketAddr>,
    read_buf: Buffer,
    write_buf: Buffer,
    request: HttpRequest,
    response: HttpResponse,
    file_offset: usize,
    edge_triggered: bool,
    closed: bool,
}

impl HttpConnection {
    pub fn new() -> Self {
        Self {
            stream: None,
            peer_addr: None,
            read_buf: Buffer::default(),
            write_buf: Buffer::default(),
            request: HttpRequest::new(),
            response: HttpResponse::new(),
            file_offset: 0,
            edge_triggered: false,
            closed: true,
        }
    }

    /// Take ownership of an accepted socket, resetting all per-request state
    pub fn init(&mut self, stream: TcpStream, peer_addr: SocketAddr, edge_triggered: bool) {
        self.stream = Some(stream);
        self.peer_addr = Some(peer_addr);
        self.read_buf.retrieve_all();
        self.write_buf.retrieve_all();
        self.request.init();
        self.response.unmap_file();
        self.file_offset = 0;
        self.edge_triggered = edge_triggered;
        self.closed = false;
    }

    /// Close the socket and release the mapped file
    pub fn close(&mut self) {
        self.response.unmap_file();
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Read what the socket has into the read buffer.
    ///
    /// Edge-triggered connections drain until `WouldBlock` or until more than
    /// `limit` bytes are buffered; level-triggered ones read once. Peer close
    /// is `UnexpectedEof`.
    pub fn read(&mut self, limit: usize) -> io::Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let mut total = 0;

        loop {
            match self.read_buf.read_from(stream) {
                Ok(0) => {
                    return Err(io::Error::new(ErrorKind::UnexpectedEof, "peer closed"));
                }
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            if !self.edge_triggered || self.read_buf.readable_bytes() > limit {
                break;
            }
        }

        Ok(total)
    }

    /// Gather-write the header segment and the file segment.
    ///
    /// Keeps going while edge-triggered or while more than
    /// [`WRITE_FLUSH_THRESHOLD`] bytes remain. `WouldBlock` is passed
    /// through for the caller to re-arm.
    pub fn write(&mut self) -> io::Result<usize> {
        let mut total = 0;

        loop {
            if self.to_write_bytes() == 0 {
                break;
            }

            let written = {
                let stream = self.stream.as_mut().ok_or_else(not_connected)?;
                let header = self.write_buf.peek();
                let file = self
                    .response
                    .file()
                    .map_or(&[][..], |f| &f[self.file_offset.min(f.len())..]);
                match stream.write_vectored(&[IoSlice::new(header), IoSlice::new(file)]) {
                    Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            };

            let header_len = self.write_buf.readable_bytes();
            if written > header_len {
                self.file_offset += written - header_len;
                self.write_buf.retrieve_all();
            } else {
                self.write_buf.retrieve(written);
            }
            total += written;

            if !(self.edge_triggered || self.to_write_bytes() > WRITE_FLUSH_THRESHOLD) {
                break;
            }
        }

        Ok(total)
    }

    /// Parse buffered input and stage a response.
    ///
    /// Returns false when there is nothing (or not yet enough) to answer;
    /// true once a response, possibly an error page, is ready to write.
    pub fn process(&mut self, ctx: &RequestContext<'_>) -> bool {
        self.request.init();
        if self.read_buf.readable_bytes() == 0 {
            return false;
        }

        match self.request.parse(&mut self.read_buf, ctx.auth) {
            Ok(ParseStatus::Complete) => {
                debug!("processing {}", self.request.path());
                self.response.init(
                    ctx.doc_root,
                    self.request.path(),
                    self.request.is_keep_alive(),
                    Status::Ok.code(),
                );
            }
            Ok(ParseStatus::Incomplete) if self.read_buf.readable_bytes() <= ctx.max_request_size => {
                return false;
            }
            Ok(ParseStatus::Incomplete) => {
                warn!(
                    "request from {:?} exceeds {} bytes",
                    self.peer_addr, ctx.max_request_size
                );
                self.reject(ctx.doc_root);
            }
            Err(e) => {
                warn!("bad request from {:?}: {}", self.peer_addr, e);
                self.reject(ctx.doc_root);
            }
        }

        self.write_buf.retrieve_all();
        self.response.make_response(&mut self.write_buf);
        self.file_offset = 0;
        debug!(
            "file size: {}, to write: {}",
            self.response.file_len(),
            self.to_write_bytes()
        );
        true
    }

    fn reject(&mut self, doc_root: &Path) {
        self.read_buf.retrieve_all();
        self.response
            .init(doc_root, self.request.path(), false, Status::BadRequest.code());
    }

    /// Bytes still queued across both segments
    pub fn to_write_bytes(&self) -> usize {
        self.write_buf.readable_bytes() + self.response.file_len().saturating_sub(self.file_offset)
    }

    /// Whether the last staged response keeps the connection open
    pub fn is_keep_alive(&self) -> bool {
        self.response.is_keep_alive()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_edge_triggered(&self) -> bool {
        self.edge_triggered
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn read_buffer(&self) -> &Buffer {
        &self.read_buf
    }
}

impl Default for HttpConnection {
    fn default() -> Self {
        Self::new()
    }
}

fn not_connected() -> io::Error {
    io::Error::from(ErrorKind::NotConnected)
}
