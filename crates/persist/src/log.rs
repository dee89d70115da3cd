//! File-backed observation log.
//!
//! Layout of a log file:
//! ```text
//! "FSOL" <version:u8>          - header, written once when the file is created
//! <len:u32 LE> <record bytes>  - repeated, one per observation
//! ```
//! Record bytes are CBOR. When the path ends in `.zst` every record is
//! compressed as its own zstd frame, so a truncated tail only loses the last
//! record.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use fleetsim_common::Observation;
use serde::Serialize;
use serde::de::DeserializeOwned;

const MAGIC: &[u8; 4] = b"FSOL";
const FORMAT_VERSION: u8 = 1;
const ZSTD_LEVEL: i32 = 3;

/// Errors from the observation log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CBOR serialization error: {0}")]
    Encode(String),
    #[error("corrupt log {path}: {message}")]
    Decode { path: PathBuf, message: String },
}

/// Append-only sink writing one record per observation.
///
/// Nothing touches the filesystem until the first [`append`](Self::append);
/// a sensor that never samples never creates its log file.
#[derive(Debug)]
pub struct ObservationLog {
    path: PathBuf,
    compressed: bool,
    writer: Option<BufWriter<File>>,
    records: u64,
}

impl ObservationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let compressed = is_compressed(&path);
        Self {
            path,
            compressed,
            writer: None,
            records: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Records appended through this handle.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Append one observation, opening the file on first use.
    ///
    /// Each record is flushed before returning so readers on another thread
    /// (or process) see whole records.
    pub fn append(&mut self, obs: &Observation) -> Result<(), LogError> {
        let bytes = encode_record(obs, self.compressed)?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| LogError::Encode(format!("record of {} bytes", bytes.len())))?;

        let writer = match &mut self.writer {
            Some(w) => w,
            slot @ None => {
                let file = open_for_append(&self.path)?;
                tracing::debug!(path = %self.path.display(), "observation log opened");
                slot.insert(BufWriter::new(file))
            }
        };
        writer
            .write_all(&len.to_le_bytes())
            .and_then(|()| writer.write_all(&bytes))
            .and_then(|()| writer.flush())
            .map_err(|source| LogError::Io {
                path: self.path.clone(),
                source,
            })?;

        self.records += 1;
        tracing::trace!(path = %self.path.display(), seq = obs.sequence, "observation logged");
        Ok(())
    }
}

/// Read every record of a log written by [`ObservationLog`].
pub fn read_log(path: impl AsRef<Path>) -> Result<Vec<Observation>, LogError> {
    let path = path.as_ref();
    let io_err = |source| LogError::Io {
        path: path.to_path_buf(),
        source,
    };
    let decode_err = |message: String| LogError::Decode {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut header = [0u8; 5];
    reader.read_exact(&mut header).map_err(io_err)?;
    if &header[..4] != MAGIC {
        return Err(decode_err("missing FSOL header".into()));
    }
    if header[4] != FORMAT_VERSION {
        return Err(decode_err(format!(
            "format version {} (expected {FORMAT_VERSION})",
            header[4]
        )));
    }

    let compressed = is_compressed(path);
    let mut out = Vec::new();
    loop {
        let mut len = [0u8; 4];
        match read_full(&mut reader, &mut len).map_err(io_err)? {
            0 => break,
            4 => {}
            n => return Err(decode_err(format!("truncated length prefix ({n} bytes)"))),
        }
        let mut bytes = vec![0u8; u32::from_le_bytes(len) as usize];
        if read_full(&mut reader, &mut bytes).map_err(io_err)? != bytes.len() {
            return Err(decode_err(format!("truncated record #{}", out.len())));
        }
        out.push(decode_record(&bytes, compressed).map_err(decode_err)?);
    }
    Ok(out)
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zst")
}

fn open_for_append(path: &Path) -> Result<File, LogError> {
    let io_err = |source| LogError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    if file.metadata().map_err(io_err)?.len() == 0 {
        file.write_all(MAGIC).map_err(io_err)?;
        file.write_all(&[FORMAT_VERSION]).map_err(io_err)?;
    }
    Ok(file)
}

/// Like `read_exact`, but reports how many bytes were read before EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn encode_record<T: Serialize>(value: &T, compressed: bool) -> Result<Vec<u8>, LogError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| LogError::Encode(e.to_string()))?;
    if compressed {
        buf = zstd::encode_all(buf.as_slice(), ZSTD_LEVEL)
            .map_err(|e| LogError::Encode(e.to_string()))?;
    }
    Ok(buf)
}

fn decode_record<T: DeserializeOwned>(bytes: &[u8], compressed: bool) -> Result<T, String> {
    if compressed {
        let raw = zstd::decode_all(bytes).map_err(|e| e.to_string())?;
        ciborium::from_reader(raw.as_slice()).map_err(|e| e.to_string())
    } else {
        ciborium::from_reader(bytes).map_err(|e| e.to_string())
    }
}
