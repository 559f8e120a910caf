//! Standalone piece-hash verifier (§1: "a standalone piece-hash verifier",
//! an external collaborator to the control plane). Given a `.torrent`
//! metainfo file and the data it describes, recomputes every piece's SHA-1
//! and reports which pieces don't match — the same check a real download
//! engine would run against resume data, just offline and read-only.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha1::{Digest, Sha1};
use structopt::StructOpt;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(StructOpt, Debug)]
#[structopt(name = "liasis-verify", about = "Verify downloaded data against a torrent's piece hashes")]
struct Args {
    /// Path to the `.torrent` metainfo file.
    #[structopt(short, long)]
    metainfo: PathBuf,

    /// Directory containing the downloaded data, laid out the way the
    /// metainfo's file list expects (single file if the metainfo has no
    /// `files` list).
    #[structopt(short, long)]
    data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Metainfo {
    info: Info,
}

#[derive(Debug, Deserialize)]
struct Info {
    name: String,
    #[serde(rename = "piece length")]
    piece_length: i64,
    pieces: serde_bytes::ByteBuf,
    #[serde(default)]
    length: Option<i64>,
    #[serde(default)]
    files: Option<Vec<FileEntry>>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    length: i64,
    path: Vec<String>,
}

/// One file in piece-traversal order, with its path relative to `data_dir`
/// and byte length. A single-file torrent is treated as one `FileEntry` of
/// `info.name`.
struct ResolvedFile {
    path: PathBuf,
    length: u64,
}

impl Info {
    fn resolved_files(&self, data_dir: &Path) -> Vec<ResolvedFile> {
        match &self.files {
            Some(files) => files
                .iter()
                .map(|f| {
                    let mut path = data_dir.join(&self.name);
                    for segment in &f.path {
                        path.push(segment);
                    }
                    ResolvedFile { path, length: f.length as u64 }
                })
                .collect(),
            None => vec![ResolvedFile {
                path: data_dir.join(&self.name),
                length: self.length.unwrap_or(0) as u64,
            }],
        }
    }

    fn piece_hashes(&self) -> impl Iterator<Item = &[u8]> {
        self.pieces.chunks_exact(20)
    }
}

/// Reads exactly `piece_length` bytes spanning one or more files in order,
/// advancing `files`/`offset_in_file` as files are exhausted. The final
/// piece may come up short if the torrent's total length isn't a multiple
/// of `piece_length`; the caller hashes whatever was actually read.
struct PieceReader<'a> {
    files: &'a [ResolvedFile],
    file_idx: usize,
    current: Option<File>,
}

impl<'a> PieceReader<'a> {
    fn new(files: &'a [ResolvedFile]) -> Self {
        PieceReader { files, file_idx: 0, current: None }
    }

    fn read_piece(&mut self, piece_length: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; piece_length];
        let mut filled = 0;
        while filled < piece_length {
            if self.current.is_none() {
                let Some(entry) = self.files.get(self.file_idx) else { break };
                self.current = Some(File::open(&entry.path)?);
            }
            let file = self.current.as_mut().expect("just populated");
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                // This file is exhausted; move to the next one.
                self.current = None;
                self.file_idx += 1;
                if self.file_idx >= self.files.len() {
                    break;
                }
                continue;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

fn verify(metainfo: &Metainfo, data_dir: &Path) -> Result<Vec<usize>> {
    let files = metainfo.info.resolved_files(data_dir);
    let piece_length = usize::try_from(metainfo.info.piece_length)?;
    let mut reader = PieceReader::new(&files);
    let mut mismatches = Vec::new();

    for (idx, expected) in metainfo.info.piece_hashes().enumerate() {
        let piece = reader.read_piece(piece_length)?;
        let got = Sha1::digest(&piece);
        if got.as_slice() != expected {
            mismatches.push(idx);
        }
    }

    Ok(mismatches)
}

fn main() -> Result<()> {
    flexi_logger::Logger::try_with_env_or_str("info")?.start()?;

    let args = Args::from_args();
    let raw = std::fs::read(&args.metainfo)?;
    let metainfo: Metainfo = serde_bencode::from_bytes(&raw)?;

    log::info!(
        "verifying {:?} against {:?} ({} pieces, {} bytes/piece)",
        args.metainfo,
        args.data_dir,
        metainfo.info.pieces.len() / 20,
        metainfo.info.piece_length
    );

    let mismatches = verify(&metainfo, &args.data_dir)?;
    if mismatches.is_empty() {
        println!("all pieces verified OK");
        Ok(())
    } else {
        println!("{} piece(s) failed verification: {:?}", mismatches.len(), mismatches);
        std::process::exit(1);
    }
}
