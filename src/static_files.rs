use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;
use std::slice;

/// Suffix → MIME type for served files
const SUFFIX_TYPE: [(&str, &str); 19] = [
    (".html", "text/html"),
    (".xml", "text/xml"),
    (".xhtml", "application/xhtml+xml"),
    (".txt", "text/plain"),
    (".rtf", "application/rtf"),
    (".pdf", "application/pdf"),
    (".word", "application/nsword"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".au", "audio/basic"),
    (".mpeg", "video/mpeg"),
    (".mpg", "video/mpeg"),
    (".avi", "video/x-msvideo"),
    (".gz", "application/x-gzip"),
    (".tar", "application/x-tar"),
    (".css", "text/css"),
    (".js", "text/javascript"),
];

/// Get the content type for a request path from its last `.` suffix,
/// `text/plain` when there is none or it is unknown
pub fn content_type(path: &str) -> &'static str {
    let Some(idx) = path.rfind('.') else {
        return "text/plain";
    };
    let suffix = &path[idx..];

    SUFFIX_TYPE
        .iter()
        .find(|(s, _)| *s == suffix)
        .map_or("text/plain", |&(_, mime)| mime)
}

/// A read-only private memory mapping of a whole file
#[derive(Debug)]
pub struct MappedFile {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is read-only and owned exclusively by this handle.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Map `len` bytes of `file`; `len` must be non-zero
    pub fn map(file: &File, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty file",
            ));
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;

        Ok(Self { ptr, len })
    }

    /// Open and map the file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::from_file(&File::open(path)?)
    }

    /// Map an already open file at its current size
    pub fn from_file(file: &File) -> io::Result<Self> {
        let len = file.metadata()?.len() as usize;
        Self::map(file, len)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}
