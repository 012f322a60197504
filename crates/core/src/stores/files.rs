use crate::error::IndexError;
use crate::models::ChunkMetadata;
use crate::stores::flat::FlatL2Index;
use crate::traits::VectorIndex;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const VECTORS_FILE: &str = "faiss.index";
pub const CHUNKS_FILE: &str = "chunks.pkl";
pub const METADATA_FILE: &str = "metadata.pkl";

const STAGING_SUFFIX: &str = ".tmp";

const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<I> {
    format_version: u32,
    build_id: Uuid,
    built_at: DateTime<Utc>,
    items: I,
}

/// Everything written for one build: the three parallel collections plus
/// the id tying the files together.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedIndex {
    pub build_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub vectors: FlatL2Index,
    pub chunks: Vec<String>,
    pub metadata: Vec<ChunkMetadata>,
}

/// The three-file layout under an index directory.
#[derive(Debug, Clone)]
pub struct IndexFiles {
    dir: PathBuf,
}

impl IndexFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn chunks_path(&self) -> PathBuf {
        self.dir.join(CHUNKS_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    fn paths(&self) -> [PathBuf; 3] {
        [self.vectors_path(), self.chunks_path(), self.metadata_path()]
    }

    pub fn all_present(&self) -> bool {
        self.paths().iter().all(|path| path.is_file())
    }

    pub fn size_on_disk(&self) -> u64 {
        self.paths()
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum()
    }

    /// Each file is staged next to its target and renamed into place,
    /// vector file last.
    pub fn write(&self, index: &PersistedIndex) -> Result<(), IndexError> {
        fs::create_dir_all(&self.dir).map_err(|source| IndexError::Persistence {
            path: self.dir.clone(),
            source,
        })?;

        write_json(&self.chunks_path(), index, &index.chunks)?;
        write_json(&self.metadata_path(), index, &index.metadata)?;
        write_file(
            &self.vectors_path(),
            &index.vectors.to_bytes(index.build_id.as_bytes()),
        )?;
        Ok(())
    }

    /// `Ok(None)` when any of the three files is absent.
    pub fn read(&self) -> Result<Option<PersistedIndex>, IndexError> {
        if !self.all_present() {
            return Ok(None);
        }

        let vectors_path = self.vectors_path();
        let raw = read_file(&vectors_path)?;
        let (vectors, vector_build) =
            FlatL2Index::from_bytes(&raw).map_err(|details| IndexError::Corrupt {
                path: vectors_path.clone(),
                details,
            })?;
        let vector_build = Uuid::from_bytes(vector_build);

        let chunks: Envelope<Vec<String>> = read_json(&self.chunks_path())?;
        let metadata: Envelope<Vec<ChunkMetadata>> = read_json(&self.metadata_path())?;

        if chunks.build_id != vector_build || metadata.build_id != vector_build {
            return Err(IndexError::Corrupt {
                path: self.dir.clone(),
                details: "index files come from different builds".to_string(),
            });
        }

        if chunks.items.len() != metadata.items.len() || chunks.items.len() != vectors.len() {
            return Err(IndexError::Corrupt {
                path: self.dir.clone(),
                details: format!(
                    "vectors={} chunks={} metadata={} are not aligned",
                    vectors.len(),
                    chunks.items.len(),
                    metadata.items.len()
                ),
            });
        }

        Ok(Some(PersistedIndex {
            build_id: vector_build,
            built_at: chunks.built_at,
            vectors,
            chunks: chunks.items,
            metadata: metadata.items,
        }))
    }

    /// Deletes the three files and any staging leftovers.
    pub fn remove(&self) -> Result<(), IndexError> {
        let paths = self.paths();
        let staged = paths.iter().map(|path| staging_path(path)).collect::<Vec<_>>();
        for path in paths.into_iter().chain(staged) {
            if path.exists() {
                fs::remove_file(&path).map_err(|source| IndexError::Persistence {
                    path: path.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(STAGING_SUFFIX);
    path.with_file_name(name)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let staging = staging_path(path);
    fs::write(&staging, bytes).map_err(|source| IndexError::Persistence {
        path: staging.clone(),
        source,
    })?;
    fs::rename(&staging, path).map_err(|source| IndexError::Persistence {
        path: path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, IndexError> {
    fs::read(path).map_err(|source| IndexError::Persistence {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(
    path: &Path,
    index: &PersistedIndex,
    items: &[T],
) -> Result<(), IndexError> {
    let envelope = Envelope {
        format_version: ENVELOPE_VERSION,
        build_id: index.build_id,
        built_at: index.built_at,
        items,
    };
    let bytes = serde_json::to_vec(&envelope).map_err(|error| IndexError::Corrupt {
        path: path.to_path_buf(),
        details: error.to_string(),
    })?;
    write_file(path, &bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Envelope<Vec<T>>, IndexError> {
    let bytes = read_file(path)?;
    let envelope: Envelope<Vec<T>> =
        serde_json::from_slice(&bytes).map_err(|error| IndexError::Corrupt {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
    if envelope.format_version != ENVELOPE_VERSION {
        return Err(IndexError::Corrupt {
            path: path.to_path_buf(),
            details: format!("unsupported format version {}", envelope.format_version),
        });
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> PersistedIndex {
        let mut vectors = FlatL2Index::new(2);
        vectors.add(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        PersistedIndex {
            build_id: Uuid::new_v4(),
            built_at: Utc::now(),
            vectors,
            chunks: vec!["first".to_string(), "second".to_string()],
            metadata: vec![
                ChunkMetadata {
                    source_name: "a.png".to_string(),
                    page_number: 1,
                    chunk_id: 0,
                },
                ChunkMetadata {
                    source_name: "b.png".to_string(),
                    page_number: 2,
                    chunk_id: 0,
                },
            ],
        }
    }

    #[test]
    fn written_index_reads_back() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let files = IndexFiles::new(dir.path().join("index"));
        let index = sample();

        files.write(&index)?;
        let loaded = files.read()?.expect("all files were written");

        assert_eq!(loaded, index);
        assert!(files.size_on_disk() > 0);
        Ok(())
    }

    #[test]
    fn partial_layout_reads_as_absent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let files = IndexFiles::new(dir.path());
        files.write(&sample())?;
        fs::remove_file(files.metadata_path())?;

        assert!(files.read()?.is_none());
        Ok(())
    }

    #[test]
    fn files_from_different_builds_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let files = IndexFiles::new(dir.path());
        files.write(&sample())?;
        let other = tempdir()?;
        let other_files = IndexFiles::new(other.path());
        other_files.write(&sample())?;
        fs::copy(other_files.chunks_path(), files.chunks_path())?;

        assert!(matches!(files.read(), Err(IndexError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn rewrite_leaves_no_staging_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let files = IndexFiles::new(dir.path());
        files.write(&sample())?;
        let second = sample();
        files.write(&second)?;

        let mut names = fs::read_dir(dir.path())?
            .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>, _>>()?;
        names.sort();
        assert_eq!(names, vec![CHUNKS_FILE, VECTORS_FILE, METADATA_FILE]);
        assert_eq!(files.read()?.map(|index| index.build_id), Some(second.build_id));
        Ok(())
    }

    #[test]
    fn leftover_staging_file_does_not_affect_reads() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let files = IndexFiles::new(dir.path());
        let index = sample();
        files.write(&index)?;
        fs::write(staging_path(&files.vectors_path()), b"half written")?;

        assert_eq!(files.read()?, Some(index));
        Ok(())
    }

    #[test]
    fn remove_deletes_every_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let files = IndexFiles::new(dir.path());
        files.write(&sample())?;
        fs::write(staging_path(&files.chunks_path()), b"stale")?;

        files.remove()?;

        assert!(!staging_path(&files.chunks_path()).exists());
        assert!(!files.vectors_path().exists());
        assert!(!files.chunks_path().exists());
        assert!(!files.metadata_path().exists());
        Ok(())
    }
}
