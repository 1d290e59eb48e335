//! Request body encodings: `application/x-www-form-urlencoded` strings and
//! `multipart/form-data` uploads.

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use url::form_urlencoded;
use uuid::Uuid;

/// Encode `params` as `k1=v1&k2=v2`, in map order, using UTF-8 form
/// encoding. Returns `None` when there is nothing to encode.
pub fn encode_form(params: &BTreeMap<String, String>) -> Option<String> {
    if params.is_empty() {
        return None;
    }
    Some(
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish(),
    )
}

/// Best-effort content type for an uploaded file, by extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("jpg") => "image/jpeg",
        Some("jpeg") => "image/x-jpg",
        Some("png") => "image/x-png",
        _ => "application/octet-stream",
    }
}

/// A multipart boundary token, unique per execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary(String);

impl Boundary {
    pub fn generate() -> Self {
        Self(format!("----{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.0)
    }
}

/// A request body ready for the transport.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Fully encoded bytes, such as a form body.
    Bytes(Vec<u8>),
    /// Multipart framing with attachments read from disk on send.
    Multipart(Multipart),
}

impl RequestBody {
    pub fn len(&self) -> u64 {
        match self {
            RequestBody::Bytes(bytes) => bytes.len() as u64,
            RequestBody::Multipart(multipart) => multipart.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole body into memory.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        match self {
            RequestBody::Bytes(bytes) => Ok(bytes.clone()),
            RequestBody::Multipart(multipart) => {
                let mut bytes = Vec::with_capacity(multipart.len() as usize);
                multipart.reader()?.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// An encoded `multipart/form-data` body.
///
/// Framing is held in memory; file contents are only opened and read when
/// [`Multipart::reader`] is consumed.
#[derive(Debug, Clone)]
pub struct Multipart {
    segments: Vec<Segment>,
    len: u64,
}

impl Multipart {
    /// Total body length, using file sizes taken when the body was built.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Open every attachment and chain the segments in order.
    pub fn reader(&self) -> io::Result<SegmentReader> {
        let mut readers: VecDeque<Box<dyn Read + Send>> = VecDeque::new();
        for segment in &self.segments {
            match segment {
                Segment::Bytes(bytes) => {
                    readers.push_back(Box::new(io::Cursor::new(bytes.clone())));
                }
                Segment::File(path) => readers.push_back(Box::new(File::open(path)?)),
            }
        }
        Ok(SegmentReader { readers })
    }
}

/// Reads a multipart body segment by segment.
pub struct SegmentReader {
    readers: VecDeque<Box<dyn Read + Send>>,
}

impl Read for SegmentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while let Some(reader) = self.readers.front_mut() {
            let n = reader.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.readers.pop_front();
        }
        Ok(0)
    }
}

/// Builder for a `multipart/form-data` body.
///
/// Parts are written in call order; [`MultipartBody::finish`] appends the
/// closing boundary line.
pub struct MultipartBody {
    boundary: Boundary,
    segments: Vec<Segment>,
    buf: Vec<u8>,
    len: u64,
}

impl MultipartBody {
    pub fn new(boundary: Boundary) -> Self {
        Self {
            boundary,
            segments: Vec::new(),
            buf: Vec::new(),
            len: 0,
        }
    }

    /// Write a text field.
    pub fn text(&mut self, name: &str, value: &str) {
        self.open_part();
        self.line(&format!(
            "Content-Disposition: form-data; name=\"{}\"",
            escape_quoted(name)
        ));
        self.line("Content-Type: text/plain; charset=UTF-8");
        self.line("");
        self.buf.extend_from_slice(value.as_bytes());
        self.line("");
    }

    /// Write a file field whose content is read from `path` on send.
    pub fn file(&mut self, name: &str, file_name: &str, path: &Path) -> io::Result<()> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        self.open_part();
        self.line(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"",
            escape_quoted(name),
            escape_quoted(file_name)
        ));
        self.line(&format!("Content-Type: {}", content_type_for(file_name)));
        self.line("Content-Transfer-Encoding: binary");
        self.line("");
        self.flush_buf();
        self.segments.push(Segment::File(path.to_path_buf()));
        self.len += metadata.len();
        self.line("");
        Ok(())
    }

    /// Close the body.
    pub fn finish(mut self) -> Multipart {
        let closing = format!("--{}--", self.boundary.as_str());
        self.line(&closing);
        self.flush_buf();
        Multipart {
            segments: self.segments,
            len: self.len,
        }
    }

    fn open_part(&mut self) {
        let opening = format!("--{}", self.boundary.as_str());
        self.line(&opening);
    }

    fn line(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    fn flush_buf(&mut self) {
        if !self.buf.is_empty() {
            let bytes = std::mem::take(&mut self.buf);
            self.len += bytes.len() as u64;
            self.segments.push(Segment::Bytes(bytes));
        }
    }
}

/// Encode parameters first, then files, each in map order.
pub fn encode_multipart(
    boundary: Boundary,
    params: &BTreeMap<String, String>,
    files: &BTreeMap<String, PathBuf>,
) -> io::Result<Multipart> {
    let mut body = MultipartBody::new(boundary);

    for (name, value) in params {
        body.text(name, value);
    }

    for (name, path) in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());
        body.file(name, &file_name, path)?;
    }

    Ok(body.finish())
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
