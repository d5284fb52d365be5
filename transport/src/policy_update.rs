//! §6 `GET /C2/policy/update` bundle extraction: path-traversal defense
//! and UTF-8/GBK filename decoding.

use crate::error::BundleError;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

/// Extracts every entry of a zip bundle under `dest_dir`.
///
/// Entries whose resolved path would escape `dest_dir` are rejected
/// and nothing is written for them; extraction of the remaining
/// entries continues. Filenames are decoded as UTF-8 when the raw
/// bytes validate as UTF-8 (the zip UTF-8 flag bit is effectively a
/// promise of exactly that), else as GBK.
pub fn extract_bundle(bundle: &[u8], dest_dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    std::fs::create_dir_all(dest_dir).map_err(|e| BundleError::Io(e.to_string()))?;

    let reader = std::io::Cursor::new(bundle);
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| BundleError::Malformed(e.to_string()))?;

    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| BundleError::Malformed(e.to_string()))?;
        let name = decode_entry_name(entry.name_raw());

        let dest_path = match resolve_within(dest_dir, &name) {
            Some(path) => path,
            None => {
                tracing::warn!(entry = %name, "rejecting zip entry that escapes destination directory");
                continue;
            }
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&dest_path).map_err(|e| BundleError::Io(e.to_string()))?;
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BundleError::Io(e.to_string()))?;
        }

        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| BundleError::Io(e.to_string()))?;
        std::fs::write(&dest_path, &contents).map_err(|e| BundleError::Io(e.to_string()))?;
        written.push(dest_path);
    }

    Ok(written)
}

fn decode_entry_name(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::GBK.decode(raw);
            decoded.into_owned()
        }
    }
}

/// Joins `name` onto `dest_dir` and rejects the result unless it stays
/// within `dest_dir` after normalizing `.`/`..` components — the
/// entry's raw path components are walked rather than relying on
/// `Path::canonicalize`, since the destination file doesn't exist yet.
fn resolve_within(dest_dir: &Path, name: &str) -> Option<PathBuf> {
    let mut resolved = dest_dir.to_path_buf();
    let mut depth: i32 = 0;

    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
                resolved.pop();
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn build_bundle(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            for (name, contents) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn extracts_benign_entries() {
        let dir = tempdir().unwrap();
        let bundle = build_bundle(&[("rules/md5.json", b"{}"), ("readme.txt", b"hi")]);
        let written = extract_bundle(&bundle, dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        assert!(dir.path().join("rules/md5.json").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("readme.txt")).unwrap(),
            "hi"
        );
    }

    #[test]
    fn rejects_path_traversal_entry() {
        let dir = tempdir().unwrap();
        let bundle = build_bundle(&[("../../etc/passwd", b"pwned")]);
        let written = extract_bundle(&bundle, dir.path()).unwrap();
        assert!(written.is_empty());
        assert!(!dir.path().parent().unwrap().join("etc/passwd").exists());
    }

    #[test]
    fn rejects_deeply_nested_traversal() {
        let dir = tempdir().unwrap();
        let bundle = build_bundle(&[("a/b/../../../escape.txt", b"x")]);
        let written = extract_bundle(&bundle, dir.path()).unwrap();
        assert!(written.is_empty());
    }
}
