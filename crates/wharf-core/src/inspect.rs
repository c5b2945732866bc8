//! Content inspection: archive completeness checks and content identity.
//!
//! The scanner never interprets deployment content; it only needs to know
//! whether a candidate is structurally complete enough to hand to the
//! controller, and an opaque identity it can diff across scans.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::Context;

/// Opaque content identity. Only ever compared for equality.
pub type ContentHash = [u8; 32];

/// What the classifier decided a candidate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// A zipped archive file (`.war`, `.jar`, ...).
    Archive,
    /// A directory-shaped deployment.
    Exploded,
    /// An XML descriptor deployment.
    Xml,
    /// Anything else; deployable only through an explicit marker.
    Other,
}

/// Structural verdict on a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    /// The content may still be arriving (e.g. a copy in progress).
    Incomplete,
    /// The content can never be deployed as-is (e.g. ZIP64 archives).
    Unsupported(String),
}

/// Inspector contract consumed by the scanner.
pub trait ContentInspector: Send + Sync {
    fn completeness(&self, path: &Path, kind: ContentKind) -> anyhow::Result<Completeness>;
    fn identity(&self, path: &Path) -> anyhow::Result<ContentHash>;
}

/// Default inspector: zip central-directory probing, XML well-formedness,
/// blake3 identities.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveInspector;

impl ContentInspector for ArchiveInspector {
    fn completeness(&self, path: &Path, kind: ContentKind) -> anyhow::Result<Completeness> {
        match kind {
            ContentKind::Archive => probe_zip(path),
            ContentKind::Xml => probe_xml(path),
            ContentKind::Exploded => probe_exploded(path),
            ContentKind::Other => Ok(Completeness::Complete),
        }
    }

    fn identity(&self, path: &Path) -> anyhow::Result<ContentHash> {
        if path.is_dir() {
            hash_directory(path)
        } else {
            hash_file(path)
        }
    }
}

const EOCD_SIG: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];
const EOCD64_SIG: [u8; 4] = [0x50, 0x4b, 0x06, 0x06];
const EOCD64_LOCATOR_SIG: [u8; 4] = [0x50, 0x4b, 0x06, 0x07];

// EOCD record: sig(4) disk(2) cd_disk(2) entries_disk(2) entries(2)
// cd_size(4) cd_offset(4) comment_len(2) = 22 bytes minimum.
const EOCD_MIN: usize = 22;

// EOCD must sit in the last 64KiB + 22 bytes of the file (max comment size).
const EOCD_SEARCH_WINDOW: u64 = 64 * 1024 + EOCD_MIN as u64;

/// Probe a zipped archive without trusting its contents.
///
/// A missing end-of-central-directory record means the file is still being
/// written; ZIP64 structures and leading garbage make the archive
/// unsupportable rather than merely incomplete.
pub fn probe_zip(path: &Path) -> anyhow::Result<Completeness> {
    let len = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    if len < EOCD_MIN as u64 {
        return Ok(Completeness::Incomplete);
    }

    let tail_len = len.min(EOCD_SEARCH_WINDOW);
    let tail_start = len - tail_len;
    let mut tail = vec![0u8; tail_len as usize];
    {
        use std::io::{Read, Seek, SeekFrom};
        let mut file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        file.seek(SeekFrom::Start(tail_start))?;
        file.read_exact(&mut tail)?;
    }

    if find_signature(&tail, &EOCD64_SIG).is_some()
        || find_signature(&tail, &EOCD64_LOCATOR_SIG).is_some()
    {
        return Ok(Completeness::Unsupported("ZIP64 archives are not supported".into()));
    }

    let Some(pos) = find_signature(&tail, &EOCD_SIG) else {
        return Ok(Completeness::Incomplete);
    };
    if tail.len() - pos < EOCD_MIN {
        return Ok(Completeness::Incomplete);
    }

    let cd_size = u32::from_le_bytes(tail[pos + 12..pos + 16].try_into().unwrap()) as u64;
    let cd_offset = u32::from_le_bytes(tail[pos + 16..pos + 20].try_into().unwrap()) as u64;
    if cd_size == u64::from(u32::MAX) || cd_offset == u64::from(u32::MAX) {
        return Ok(Completeness::Unsupported("ZIP64 archives are not supported".into()));
    }

    let eocd_abs = tail_start + pos as u64;
    let expected = cd_offset + cd_size;
    if eocd_abs > expected {
        // Extraneous bytes precede the archive; offsets cannot be trusted.
        return Ok(Completeness::Unsupported(
            "archive has extraneous leading bytes".into(),
        ));
    }
    if eocd_abs < expected {
        return Ok(Completeness::Incomplete);
    }

    // Central directory must actually parse.
    let file = File::open(path)?;
    match zip::ZipArchive::new(file) {
        Ok(_) => Ok(Completeness::Complete),
        Err(_) => Ok(Completeness::Incomplete),
    }
}

/// Find the last occurrence of `sig` in `buf`.
fn find_signature(buf: &[u8], sig: &[u8; 4]) -> Option<usize> {
    buf.windows(4).rposition(|window| window == sig)
}

/// A cheap well-formedness check for XML descriptors: every opened element
/// must be closed by the end of the document.
pub fn probe_xml(path: &Path) -> anyhow::Result<Completeness> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    if xml_balanced(&text) {
        Ok(Completeness::Complete)
    } else {
        Ok(Completeness::Incomplete)
    }
}

fn xml_balanced(src: &str) -> bool {
    let bytes = src.as_bytes();
    let mut depth: usize = 0;
    let mut saw_root = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        let rest = &src[i..];
        if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(end) => i += end + 3,
                None => return false,
            }
        } else if rest.starts_with("<?") {
            match rest.find("?>") {
                Some(end) => i += end + 2,
                None => return false,
            }
        } else if rest.starts_with("<!") {
            match rest.find('>') {
                Some(end) => i += end + 1,
                None => return false,
            }
        } else if rest.starts_with("</") {
            match rest.find('>') {
                Some(end) => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                    i += end + 1;
                }
                None => return false,
            }
        } else {
            match rest.find('>') {
                Some(end) => {
                    saw_root = true;
                    if !rest[..end].ends_with('/') {
                        depth += 1;
                    }
                    i += end + 1;
                }
                None => return false,
            }
        }
    }
    depth == 0 && saw_root
}

/// An exploded deployment is complete when every nested archive it contains
/// is complete.
fn probe_exploded(dir: &Path) -> anyhow::Result<Completeness> {
    let mut worst = Completeness::Complete;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)
            .with_context(|| format!("Failed to list {}", current.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !crate::scan::is_archive_name(&name) {
                continue;
            }
            match probe_zip(&path)? {
                Completeness::Complete => {}
                unsupported @ Completeness::Unsupported(_) => return Ok(unsupported),
                Completeness::Incomplete => worst = Completeness::Incomplete,
            }
        }
    }
    Ok(worst)
}

fn hash_file(path: &Path) -> anyhow::Result<ContentHash> {
    let mut hasher = blake3::Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    io::copy(&mut file, &mut hasher)?;
    Ok(*hasher.finalize().as_bytes())
}

/// Identity of a directory tree: names, sizes and mtimes of every file, in
/// sorted order. Content bytes are deliberately not read; for exploded
/// deployments a touched file is a changed deployment.
fn hash_directory(dir: &Path) -> anyhow::Result<ContentHash> {
    let mut records: Vec<(PathBuf, u64, u128)> = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)
            .with_context(|| format!("Failed to list {}", current.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let md = entry.metadata()?;
            let mtime = md
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let rel = path.strip_prefix(dir).unwrap_or(&path).to_path_buf();
            records.push((rel, md.len(), mtime));
        }
    }
    records.sort();

    let mut hasher = blake3::Hasher::new();
    for (rel, len, mtime) in records {
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(&len.to_le_bytes());
        hasher.update(&mtime.to_le_bytes());
    }
    Ok(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, bytes) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn complete_zip_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.war");
        write_zip(&path, &[("index.html", b"hello")]);
        assert_eq!(probe_zip(&path).unwrap(), Completeness::Complete);
    }

    #[test]
    fn truncated_zip_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.war");
        write_zip(&path, &[("index.html", b"hello world")]);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();
        assert_eq!(probe_zip(&path).unwrap(), Completeness::Incomplete);
    }

    #[test]
    fn empty_file_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.war");
        fs::write(&path, b"").unwrap();
        assert_eq!(probe_zip(&path).unwrap(), Completeness::Incomplete);
    }

    #[test]
    fn leading_garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.war");
        write_zip(&path, &[("index.html", b"hello")]);
        let mut bytes = vec![0xde];
        bytes.extend(fs::read(&path).unwrap());
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            probe_zip(&path).unwrap(),
            Completeness::Unsupported(_)
        ));
    }

    #[test]
    fn zip64_locator_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.war");
        write_zip(&path, &[("index.html", b"hello")]);
        let mut bytes = fs::read(&path).unwrap();
        // Splice a ZIP64 EOCD locator ahead of the EOCD record.
        let pos = find_signature(&bytes, &EOCD_SIG).unwrap();
        let mut locator = EOCD64_LOCATOR_SIG.to_vec();
        locator.extend_from_slice(&[0u8; 16]);
        bytes.splice(pos..pos, locator);
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            probe_zip(&path).unwrap(),
            Completeness::Unsupported(_)
        ));
    }

    #[test]
    fn xml_wellformedness() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("ok.xml");
        fs::write(&ok, "<rootElement/>").unwrap();
        assert_eq!(probe_xml(&ok).unwrap(), Completeness::Complete);

        let nested = dir.path().join("nested.xml");
        fs::write(&nested, "<?xml version=\"1.0\"?><a><b>text</b></a>").unwrap();
        assert_eq!(probe_xml(&nested).unwrap(), Completeness::Complete);

        let bad = dir.path().join("bad.xml");
        fs::write(&bad, "<rootElement><incomplete>").unwrap();
        assert_eq!(probe_xml(&bad).unwrap(), Completeness::Incomplete);
    }

    #[test]
    fn exploded_with_incomplete_child() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("foo.ear");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("index.html"), b"not an archive").unwrap();
        let nested = root.join("bar.war");
        write_zip(&nested, &[("a", b"b")]);
        let bytes = fs::read(&nested).unwrap();
        fs::write(&nested, &bytes[..bytes.len() - 4]).unwrap();

        assert_eq!(
            probe_exploded(&root).unwrap(),
            Completeness::Incomplete
        );

        write_zip(&nested, &[("a", b"b")]);
        assert_eq!(probe_exploded(&root).unwrap(), Completeness::Complete);
    }

    #[test]
    fn directory_identity_tracks_children() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("foo.war");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("index.html"), b"one").unwrap();
        let first = ArchiveInspector.identity(&root).unwrap();
        fs::write(root.join("index.html"), b"four").unwrap();
        let second = ArchiveInspector.identity(&root).unwrap();
        assert_ne!(first, second);
    }
}
