//! Document discovery, decoding and parsing.
//!
//! Supported inputs:
//! - `*.transcription.json`: ordered transcript segments with timing
//! - `*.txt`: plain text of unknown encoding
//!
//! Decoding order for plain text (first success wins):
//! 1. UTF-8, with an optional BOM stripped
//! 2. UTF-16 LE, only when the file starts with the `FF FE` BOM
//! 3. UTF-16 BE, only when the file starts with the `FE FF` BOM
//! 4. Windows-1252, for legacy exports without a BOM
//!
//! Text is rejected when the decoded result holds control characters other
//! than tab, line breaks and form feed. Binary files and bytes undefined in
//! Windows-1252 end up there, and become a `DecodeError` for that file.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::semantic::errors::{FileError, FileErrorKind};
use crate::semantic::segment::{Passage, Segmenter};

pub const TRANSCRIPT_SUFFIX: &str = ".transcription.json";
const TRANSCRIPT_TEXT_SUFFIX: &str = ".transcription.txt";
const TEXT_EXTENSION: &str = "txt";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PlainText,
    Transcript,
}

impl DocumentKind {
    /// Classify a path by name; `None` for unsupported files.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if strip_suffix_ignore_case(name, TRANSCRIPT_SUFFIX).is_some() {
            return Some(Self::Transcript);
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(TEXT_EXTENSION) => Some(Self::PlainText),
            _ => None,
        }
    }
}

/// Size and modification time of the file a document was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileFingerprint {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: PathBuf,
    pub name: String,
    pub kind: DocumentKind,
    pub passages: Vec<Passage>,
    pub fingerprint: FileFingerprint,
}

/// Transcript file as written by the transcriber. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptSegment {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

/// Which decoder accepted a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Windows1252,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "utf-8"),
            Encoding::Utf16Le => write!(f, "utf-16le"),
            Encoding::Utf16Be => write!(f, "utf-16be"),
            Encoding::Windows1252 => write!(f, "windows-1252"),
        }
    }
}

/// Decode raw bytes following the documented fallback order.
pub fn decode_text(bytes: &[u8]) -> Result<(String, Encoding), String> {
    let utf8 = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let utf8_error = match std::str::from_utf8(utf8) {
        Ok(text) => match control_char(text) {
            None => return Ok((text.to_string(), Encoding::Utf8)),
            Some(c) => format!("utf-8 text holds control character U+{:04X}", c as u32),
        },
        Err(e) => format!("invalid utf-8: {e}"),
    };

    if let Some(body) = bytes.strip_prefix(UTF16_LE_BOM) {
        return decode_utf16(body, u16::from_le_bytes).map(|text| (text, Encoding::Utf16Le));
    }

    if let Some(body) = bytes.strip_prefix(UTF16_BE_BOM) {
        return decode_utf16(body, u16::from_be_bytes).map(|text| (text, Encoding::Utf16Be));
    }

    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    match control_char(&text) {
        None => Ok((text.into_owned(), Encoding::Windows1252)),
        Some(c) => Err(format!(
            "{utf8_error}; not windows-1252 text either (control character U+{:04X})",
            c as u32
        )),
    }
}

/// First control character that plain text should not contain.
fn control_char(text: &str) -> Option<char> {
    text.chars()
        .find(|&c| c.is_control() && !matches!(c, '\t' | '\n' | '\r' | '\u{0C}'))
}

fn decode_utf16(body: &[u8], to_unit: fn([u8; 2]) -> u16) -> Result<String, String> {
    if body.len() % 2 != 0 {
        return Err("utf-16 body has an odd number of bytes".to_string());
    }

    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();

    String::from_utf16(&units).map_err(|e| format!("invalid utf-16: {e}"))
}

/// Read, decode and segment one file.
pub fn load_document(path: &Path, segmenter: &Segmenter) -> Result<Document, FileError> {
    let kind = DocumentKind::from_path(path)
        .ok_or_else(|| FileError::new(path, FileErrorKind::Unsupported))?;

    let fingerprint =
        FileFingerprint::of(path).map_err(|e| FileError::new(path, FileErrorKind::Read(e.to_string())))?;
    let bytes =
        std::fs::read(path).map_err(|e| FileError::new(path, FileErrorKind::Read(e.to_string())))?;

    let (text, encoding) =
        decode_text(&bytes).map_err(|reason| FileError::new(path, FileErrorKind::Decode(reason)))?;

    log::debug!("decoded {} as {}", path.display(), encoding);

    let file_stem = display_name(path);

    let (name, passages) = match kind {
        DocumentKind::PlainText => (file_stem, segmenter.segment_text(&text)),
        DocumentKind::Transcript => {
            let transcript: Transcript = serde_json::from_str(&text)
                .map_err(|e| FileError::new(path, FileErrorKind::Transcript(e.to_string())))?;
            let name = transcript.name.clone().unwrap_or(file_stem);
            (name, segmenter.segment_transcript(&transcript))
        }
    };

    Ok(Document {
        id: path.to_path_buf(),
        name,
        kind,
        passages,
        fingerprint,
    })
}

/// File name without the transcript/text suffix.
fn display_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    for suffix in [TRANSCRIPT_SUFFIX, TRANSCRIPT_TEXT_SUFFIX, ".txt"] {
        match strip_suffix_ignore_case(&name, suffix) {
            Some(stem) if !stem.is_empty() => return stem.to_string(),
            _ => {}
        }
    }
    name
}

fn strip_suffix_ignore_case<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let split = name.len().checked_sub(suffix.len())?;
    if !name.is_char_boundary(split) || !name[split..].eq_ignore_ascii_case(suffix) {
        return None;
    }
    Some(&name[..split])
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Expand a search scope into the ordered, de-duplicated list of files to
/// index. Folders are walked recursively; explicit files are taken as-is.
/// Missing paths and unreadable directory entries are reported, not fatal.
pub fn collect_files(scope: &[PathBuf]) -> (Vec<PathBuf>, Vec<FileError>) {
    let mut files = BTreeSet::new();
    let mut errors = Vec::new();

    for root in scope {
        if root.is_file() {
            files.insert(root.clone());
            continue;
        }

        if !root.is_dir() {
            errors.push(FileError::new(root, FileErrorKind::Missing));
            continue;
        }

        for entry in WalkDir::new(root).follow_links(true).into_iter().filter_entry(|e| !is_hidden(e)) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if DocumentKind::from_path(entry.path()).is_some() {
                        files.insert(entry.into_path());
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    errors.push(FileError::new(&path, FileErrorKind::Read(e.to_string())));
                }
            }
        }
    }

    // the transcriber writes a plain-text copy next to every transcript
    let transcripts: BTreeSet<PathBuf> = files
        .iter()
        .filter(|p| DocumentKind::from_path(p) == Some(DocumentKind::Transcript))
        .cloned()
        .collect();

    let files = files
        .into_iter()
        .filter(|path| match sibling_transcript(path) {
            Some(sibling) => !transcripts.contains(&sibling),
            None => true,
        })
        .collect();

    (files, errors)
}

/// `x.transcription.json` for `x.transcription.txt`, `None` otherwise.
fn sibling_transcript(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = strip_suffix_ignore_case(name, TRANSCRIPT_TEXT_SUFFIX)?;
    Some(path.with_file_name(format!("{stem}{TRANSCRIPT_SUFFIX}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_path() {
        assert_eq!(
            DocumentKind::from_path(Path::new("a/interview.transcription.json")),
            Some(DocumentKind::Transcript)
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("notes.TXT")),
            Some(DocumentKind::PlainText)
        );
        assert_eq!(DocumentKind::from_path(Path::new("data.json")), None);
        assert_eq!(DocumentKind::from_path(Path::new("clip.mov")), None);
    }

    #[test]
    fn test_decode_utf8_with_and_without_bom() {
        assert_eq!(decode_text(b"hello").unwrap(), ("hello".to_string(), Encoding::Utf8));
        assert_eq!(
            decode_text(b"\xEF\xBB\xBFhello").unwrap(),
            ("hello".to_string(), Encoding::Utf8)
        );
    }

    #[test]
    fn test_decode_utf16_with_bom() {
        let mut le = vec![0xFF, 0xFE];
        le.extend("hé".encode_utf16().flat_map(|u| u.to_le_bytes()));
        assert_eq!(decode_text(&le).unwrap(), ("hé".to_string(), Encoding::Utf16Le));

        let mut be = vec![0xFE, 0xFF];
        be.extend("hé".encode_utf16().flat_map(|u| u.to_be_bytes()));
        assert_eq!(decode_text(&be).unwrap(), ("hé".to_string(), Encoding::Utf16Be));
    }

    #[test]
    fn test_decode_rejects_invalid_bytes() {
        assert!(decode_text(&[0x66, 0x6f, 0xC3, 0x28, 0x81]).is_err());
        assert!(decode_text(b"bin\0ary").is_err());
        assert!(decode_text(&[0xFF, 0xFE, 0x41]).is_err());
    }

    #[test]
    fn test_decode_falls_back_to_windows_1252() {
        assert_eq!(
            decode_text(b"Caf\xe9 r\xe9sum\xe9 \x93quoted\x94.").unwrap(),
            ("Café résumé “quoted”.".to_string(), Encoding::Windows1252)
        );
        // valid utf-8 is never reinterpreted
        assert_eq!(decode_text("Café".as_bytes()).unwrap().1, Encoding::Utf8);
    }

    #[test]
    fn test_display_name_strips_suffixes() {
        assert_eq!(display_name(Path::new("/x/Take 1.transcription.json")), "Take 1");
        assert_eq!(display_name(Path::new("/x/notes.txt")), "notes");
        assert_eq!(display_name(Path::new("/x/.txt")), ".txt");
    }

    #[test]
    fn test_load_plain_text_document() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("story.txt");
        std::fs::write(&path, "One. Two.").unwrap();

        let doc = load_document(&path, &Segmenter::default()).unwrap();
        assert_eq!(doc.name, "story");
        assert_eq!(doc.kind, DocumentKind::PlainText);
        assert_eq!(doc.passages.len(), 2);
        assert_eq!(doc.fingerprint.len, 9);
    }

    #[test]
    fn test_load_transcript_document() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("take.transcription.json");
        std::fs::write(
            &path,
            r#"{"text": "ignored", "language": "en", "segments": [
                {"id": 0, "start": 0.0, "end": 1.5, "text": " Hello there."},
                {"id": 1, "start": 1.5, "end": 3.0, "text": " General Kenobi."}
            ]}"#,
        )
        .unwrap();

        let doc = load_document(&path, &Segmenter::default()).unwrap();
        assert_eq!(doc.name, "take");
        assert_eq!(doc.kind, DocumentKind::Transcript);
        assert_eq!(doc.passages.len(), 2);
        assert_eq!(doc.passages[1].time.unwrap().start, 1.5);
    }

    #[test]
    fn test_load_malformed_transcript_is_file_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.transcription.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_document(&path, &Segmenter::default()).unwrap_err();
        assert!(matches!(err.kind, FileErrorKind::Transcript(_)));
        assert_eq!(err.path, path);
    }

    #[test]
    fn test_collect_files_walks_folders_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("b/nested")).unwrap();
        std::fs::create_dir_all(root.join(".hidden")).unwrap();
        std::fs::write(root.join("b/nested/z.txt"), "z").unwrap();
        std::fs::write(root.join("a.txt"), "a").unwrap();
        std::fs::write(root.join("clip.mov"), "x").unwrap();
        std::fs::write(root.join(".hidden/secret.txt"), "s").unwrap();
        std::fs::write(root.join("t.transcription.json"), "{}").unwrap();
        std::fs::write(root.join("t.transcription.txt"), "dup").unwrap();

        let (files, errors) = collect_files(&[root.to_path_buf(), root.join("a.txt")]);

        assert!(errors.is_empty());
        assert_eq!(
            files,
            vec![
                root.join("a.txt"),
                root.join("b/nested/z.txt"),
                root.join("t.transcription.json"),
            ]
        );
    }

    #[test]
    fn test_collect_files_reports_missing_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");

        let (files, errors) = collect_files(&[missing.clone()]);
        assert!(files.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, missing);
        assert!(matches!(errors[0].kind, FileErrorKind::Missing));
    }
}
