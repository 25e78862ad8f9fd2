//! Input discovery and transparent decompression.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

pub type InputReader = Box<dyn BufRead + Send>;

/// Wraps an opened file in a decoder.
pub type DecoderFn = fn(File) -> io::Result<InputReader>;

const READ_BUFFER: usize = 256 * 1024;

/// Decoders keyed by lowercase file extension.
#[derive(Clone)]
pub struct Decoders {
    by_extension: HashMap<String, DecoderFn>,
}

impl Default for Decoders {
    fn default() -> Self {
        Self::empty()
            .with("gz", gzip)
            .with("bz2", bzip2)
            .with("zst", zstd)
    }
}

impl Decoders {
    /// No decoders; every file is read as-is.
    pub fn empty() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    pub fn with(mut self, extension: &str, decoder: DecoderFn) -> Self {
        self.by_extension
            .insert(extension.trim_start_matches('.').to_ascii_lowercase(), decoder);
        self
    }

    pub fn for_path(&self, path: &Path) -> Option<DecoderFn> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.by_extension.get(&ext).copied()
    }
}

fn gzip(file: File) -> io::Result<InputReader> {
    let decoder = flate2::read::MultiGzDecoder::new(file);
    Ok(Box::new(BufReader::with_capacity(READ_BUFFER, decoder)))
}

fn bzip2(file: File) -> io::Result<InputReader> {
    let decoder = bzip2::read::MultiBzDecoder::new(file);
    Ok(Box::new(BufReader::with_capacity(READ_BUFFER, decoder)))
}

fn zstd(file: File) -> io::Result<InputReader> {
    let decoder = zstd::stream::read::Decoder::new(file)?;
    Ok(Box::new(BufReader::with_capacity(READ_BUFFER, decoder)))
}

/// Open `path`, decoding it when its extension has a registered decoder.
pub fn open_input(path: &Path, decoders: &Decoders) -> io::Result<InputReader> {
    let file = File::open(path)?;
    match decoders.for_path(path) {
        Some(decode) => decode(file),
        None => Ok(Box::new(BufReader::with_capacity(READ_BUFFER, file))),
    }
}

/// A file yields itself. A directory yields its immediate regular files in
/// name order, skipping dot-files.
pub fn input_files(path: &Path) -> io::Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let hidden = entry.file_name().to_str().is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        // Symlinks count when they point at a regular file.
        let path = entry.into_path();
        if path.is_file() {
            files.push(path);
        } else {
            debug!(path = %path.display(), "Skipping non-file entry");
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn read_all(mut reader: InputReader) -> String {
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn compressed_inputs_are_decoded_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let text = "jane doe b:::b:::https://example.com\n";

        let gz = dir.path().join("part.gz");
        let mut enc = flate2::write::GzEncoder::new(File::create(&gz).unwrap(), flate2::Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap();

        let bz = dir.path().join("part.BZ2");
        let mut enc = bzip2::write::BzEncoder::new(File::create(&bz).unwrap(), bzip2::Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap();

        let zst = dir.path().join("part.zst");
        std::fs::write(&zst, zstd::encode_all(text.as_bytes(), 3).unwrap()).unwrap();

        let plain = dir.path().join("part.txt");
        std::fs::write(&plain, text).unwrap();

        let decoders = Decoders::default();
        for path in [&gz, &bz, &zst, &plain] {
            assert_eq!(read_all(open_input(path, &decoders).unwrap()), text, "{}", path.display());
        }
    }

    #[test]
    fn unregistered_extension_is_read_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.gz");
        std::fs::write(&path, "not gzip").unwrap();

        let reader = open_input(&path, &Decoders::empty()).unwrap();
        assert_eq!(read_all(reader), "not gzip");
    }

    #[test]
    fn directories_list_visible_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.gz", ".hidden", "c.bz2"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("d.txt"), "").unwrap();

        let names: Vec<_> = input_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.gz", "b.txt", "c.bz2"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let real = elsewhere.path().join("real.txt");
        std::fs::write(&real, "").unwrap();

        std::os::unix::fs::symlink(&real, dir.path().join("part-1.txt")).unwrap();
        std::fs::write(dir.path().join("part-2.txt"), "").unwrap();
        std::os::unix::fs::symlink(elsewhere.path().join("gone.txt"), dir.path().join("part-3.txt"))
            .unwrap();

        let names: Vec<_> = input_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["part-1.txt", "part-2.txt"]);
    }

    #[test]
    fn a_file_yields_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("only.txt");
        std::fs::write(&path, "").unwrap();
        assert_eq!(input_files(&path).unwrap(), vec![path]);
        assert!(input_files(&dir.path().join("missing")).is_err());
    }
}
