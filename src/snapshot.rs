//! Single-file persistence for a [`VectorStore`].
//!
//! Layout: one header line `docqa-snapshot v1 crc32=<8 hex digits>` followed
//! by a JSON body. The checksum covers the body bytes. Saves go through a
//! sibling `.tmp` file that is fsynced and renamed over the target.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkStore;
use crate::error::{DocQaError, Result};
use crate::index::FlatIndex;
use crate::store::VectorStore;

const MAGIC: &str = "docqa-snapshot";
const VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    embedding_model: Option<&'a str>,
    index: IndexRef<'a>,
    chunks: &'a ChunkStore,
}

#[derive(Serialize)]
struct IndexRef<'a> {
    dim: Option<usize>,
    count: usize,
    vectors: &'a [f32],
}

#[derive(Deserialize)]
struct SnapshotBody {
    #[serde(default)]
    embedding_model: Option<String>,
    index: IndexBody,
    chunks: ChunkStore,
}

#[derive(Deserialize)]
struct IndexBody {
    dim: Option<usize>,
    count: usize,
    vectors: Vec<f32>,
}

/// Writes `store` to `path` atomically, creating parent directories.
pub fn save(store: &VectorStore, path: &Path) -> Result<()> {
    if store.index().len() != store.chunks().len() {
        return Err(DocQaError::corrupt(
            path,
            format!(
                "refusing to save {} vectors with {} chunks",
                store.index().len(),
                store.chunks().len()
            ),
        ));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let body = serde_json::to_vec(&SnapshotRef {
        embedding_model: store.embedding_model(),
        index: IndexRef {
            dim: store.index().dim(),
            count: store.index().len(),
            vectors: store.index().raw_vectors(),
        },
        chunks: store.chunks(),
    })
    .map_err(|err| DocQaError::corrupt(path, format!("failed to serialize: {err}")))?;
    let checksum = crc32fast::hash(&body);

    let tmp_path = tmp_path_for(path);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        writeln!(file, "{MAGIC} v{VERSION} crc32={checksum:08x}")?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        // Persist the rename itself; not every platform allows opening directories.
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    tracing::info!(
        path = %path.display(),
        chunks = store.len(),
        bytes = body.len(),
        "saved vector store snapshot"
    );
    Ok(())
}

/// Reads a snapshot written by [`save`], validating checksum and lockstep sizes.
pub fn load(path: &Path) -> Result<VectorStore> {
    if !path.exists() {
        return Err(DocQaError::not_found(path));
    }
    let bytes = fs::read(path)?;
    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| DocQaError::corrupt(path, "missing header line"))?;
    let header = std::str::from_utf8(&bytes[..newline])
        .map_err(|_| DocQaError::corrupt(path, "header is not UTF-8"))?;
    let expected = parse_header(header).map_err(|reason| DocQaError::corrupt(path, reason))?;
    let body = &bytes[newline + 1..];
    let actual = crc32fast::hash(body);
    if actual != expected {
        return Err(DocQaError::corrupt(
            path,
            format!("checksum mismatch (header {expected:08x}, body {actual:08x})"),
        ));
    }

    let parsed: SnapshotBody = serde_json::from_slice(body)
        .map_err(|err| DocQaError::corrupt(path, format!("invalid body: {err}")))?;
    let index = FlatIndex::from_parts(parsed.index.dim, parsed.index.vectors)
        .map_err(|err| DocQaError::corrupt(path, err.to_string()))?;
    if index.len() != parsed.index.count {
        return Err(DocQaError::corrupt(
            path,
            format!(
                "index declares {} vectors but holds {}",
                parsed.index.count,
                index.len()
            ),
        ));
    }
    if index.len() != parsed.chunks.len() {
        return Err(DocQaError::corrupt(
            path,
            format!(
                "{} vectors but {} chunks",
                index.len(),
                parsed.chunks.len()
            ),
        ));
    }
    if let Some(position) = parsed
        .chunks
        .iter()
        .position(|chunk| chunk.content.trim().is_empty())
    {
        return Err(DocQaError::corrupt(
            path,
            format!("chunk {position} has empty content"),
        ));
    }

    let store = VectorStore::from_parts(parsed.embedding_model, index, parsed.chunks);
    tracing::info!(path = %path.display(), chunks = store.len(), "loaded vector store snapshot");
    Ok(store)
}

fn parse_header(header: &str) -> std::result::Result<u32, String> {
    let mut parts = header.split_whitespace();
    if parts.next() != Some(MAGIC) {
        return Err("not a docqa snapshot".into());
    }
    match parts.next() {
        Some(v) if v == format!("v{VERSION}") => {}
        Some(v) => return Err(format!("unsupported snapshot version {v}")),
        None => return Err("missing snapshot version".into()),
    }
    let checksum = parts
        .next()
        .and_then(|field| field.strip_prefix("crc32="))
        .ok_or_else(|| "missing checksum".to_string())?;
    u32::from_str_radix(checksum, 16).map_err(|_| format!("invalid checksum '{checksum}'"))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkMetadata};

    fn sample_store() -> VectorStore {
        VectorStore::build(
            "test-model",
            vec![
                Chunk::new("alpha", ChunkMetadata::for_page("a.pdf", "/d/a.pdf", 0)),
                Chunk::new("beta", ChunkMetadata::default()),
                Chunk::new("gamma", ChunkMetadata::for_page("b.pdf", "/d/b.pdf", 4)),
            ],
            &[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.9, 0.1]],
        )
        .expect("build")
    }

    #[test]
    fn round_trip_preserves_store_and_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("store.snapshot");
        let store = sample_store();
        save(&store, &path).expect("save");
        assert!(!tmp_path_for(&path).exists());

        let loaded = load(&path).expect("load");
        assert_eq!(loaded, store);
        let before: Vec<_> = store
            .search(&[0.0, 1.0], 3)
            .expect("search")
            .into_iter()
            .map(|(hit, chunk)| (hit.index, chunk.content.clone()))
            .collect();
        let after: Vec<_> = loaded
            .search(&[0.0, 1.0], 3)
            .expect("search")
            .into_iter()
            .map(|(hit, chunk)| (hit.index, chunk.content.clone()))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load(&dir.path().join("absent.snapshot")).unwrap_err();
        assert!(matches!(err, DocQaError::NotFound { .. }));
    }

    #[test]
    fn tampered_body_fails_checksum() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.snapshot");
        save(&sample_store(), &path).expect("save");
        let text = fs::read_to_string(&path).expect("read");
        fs::write(&path, text.replace("alpha", "omega")).expect("write");
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"), "{err}");
    }

    #[test]
    fn size_disagreement_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.snapshot");
        let body = br#"{"embedding_model":"m","index":{"dim":2,"count":2,"vectors":[1.0,0.0,0.0,1.0]},"chunks":[{"content":"only one"}]}"#;
        let mut file = File::create(&path).expect("create");
        writeln!(file, "{MAGIC} v{VERSION} crc32={:08x}", crc32fast::hash(body)).expect("header");
        file.write_all(body).expect("body");
        drop(file);

        let err = load(&path).unwrap_err();
        match err {
            DocQaError::CorruptSnapshot { reason, .. } => {
                assert!(reason.contains("2 vectors but 1 chunks"), "{reason}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.snapshot");
        fs::write(&path, b"\x80\x02}q\x00(pickle").expect("write");
        assert!(matches!(
            load(&path),
            Err(DocQaError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn empty_store_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.snapshot");
        save(&VectorStore::new("m"), &path).expect("save");
        let loaded = load(&path).expect("load");
        assert!(loaded.is_empty());
        assert_eq!(loaded.embedding_model(), Some("m"));
    }
}
