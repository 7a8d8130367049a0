//! Read a pair of forward/reverse FASTQ files as an Iterator over ReadPairs.

use crate::error::FastqError;
use crate::read::{Read, ReadPair, WhichRead};
use anyhow::{Context, Result};
use fastq::{Record, RecordRefIter};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read as _, Seek, Write};
use std::path::{Path, PathBuf};

const GZ_BUF_SIZE: usize = 1 << 16;

trait FileIoError<T> {
    fn open_err(self, path: &Path) -> Result<T, FastqError>;
    fn fastq_err(self, path: &Path, line: usize) -> Result<T, FastqError>;
}

impl<T> FileIoError<T> for std::io::Result<T> {
    #[cold]
    fn open_err(self, path: &Path) -> Result<T, FastqError> {
        self.map_err(|source| FastqError::Open {
            path: path.to_path_buf(),
            source,
        })
    }

    #[cold]
    fn fastq_err(self, path: &Path, line: usize) -> Result<T, FastqError> {
        self.map_err(|source| match source.kind() {
            ErrorKind::InvalidData | ErrorKind::UnexpectedEof => FastqError::Format {
                path: path.to_path_buf(),
                line,
                message: source.to_string(),
            },
            _ => FastqError::Io {
                path: path.to_path_buf(),
                line,
                source,
            },
        })
    }
}

fn format_err(path: &Path, line: usize, message: impl Into<String>) -> FastqError {
    FastqError::Format {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

/// Open a FASTQ file that is uncompressed, gzip compressed, or lz4 compressed.
/// The extension of the file is ignored & the filetype is determined by looking
/// for magic bytes at the start of the file.
pub fn open_fastq(p: &Path) -> Result<Box<dyn BufRead + Send>, FastqError> {
    let mut file = File::open(p).open_err(p)?;
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf[..]).map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            format_err(p, 0, "file is empty or truncated")
        } else {
            FastqError::Io {
                path: p.to_path_buf(),
                line: 0,
                source: err,
            }
        }
    })?;
    file.rewind().fastq_err(p, 0)?;

    if buf[0..2] == [0x1F, 0x8B] {
        let gz = flate2::read::MultiGzDecoder::new(file);
        Ok(Box::new(BufReader::with_capacity(GZ_BUF_SIZE, gz)))
    } else if buf[0..4] == [0x04, 0x22, 0x4D, 0x18] {
        let lz = lz4::Decoder::new(file).fastq_err(p, 0)?;
        Ok(Box::new(BufReader::with_capacity(GZ_BUF_SIZE, lz)))
    } else if buf[0] == b'@' {
        Ok(Box::new(BufReader::with_capacity(32 * 1024, file)))
    } else {
        Err(format_err(
            p,
            0,
            "input FASTQ file must be gzip or lz4 compressed, or must begin with the '@' symbol",
        ))
    }
}

/// The read name up to the first space or '/', which drops both the Illumina
/// comment and the legacy `/1` `/2` mate suffix.
fn mate_name(head: &[u8]) -> &[u8] {
    head.split(|&x| matches!(x, b' ' | b'/'))
        .next()
        .unwrap_or(head)
}

fn parse_record<R: Record>(rec: &R, path: &Path, line: usize) -> Result<Read, FastqError> {
    if !rec.validate_dnan() {
        return Err(format_err(
            path,
            line,
            "FASTQ contains sequence base with character other than [ACGTN]",
        ));
    }
    Read::from_fastq(rec.seq(), rec.qual())
        .ok_or_else(|| format_err(path, line, "quality string is not valid Phred+33"))
}

/// Read paired-end data from a forward and a reverse FASTQ file in lockstep.
/// Record counts and read names of the two files must agree.
pub struct ReadPairIter {
    iters: [RecordRefIter<Box<dyn BufRead + Send>>; 2],
    paths: [PathBuf; 2],
    records_read: usize,
    done: bool,
}

impl ReadPairIter {
    pub fn new(forward: &Path, reverse: &Path) -> Result<ReadPairIter, FastqError> {
        let open = |p: &Path| -> Result<_, FastqError> {
            Ok(fastq::Parser::new(open_fastq(p)?).ref_iter())
        };
        Ok(ReadPairIter {
            iters: [open(forward)?, open(reverse)?],
            paths: [forward.to_path_buf(), reverse.to_path_buf()],
            records_read: 0,
            done: false,
        })
    }

    /// Number of complete pairs read so far.
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    pub fn path(&self, which: WhichRead) -> &Path {
        &self.paths[which.index()]
    }

    fn get_next(&mut self) -> Result<Option<ReadPair>, FastqError> {
        let line = self.records_read * 4;
        for (iter, path) in self.iters.iter_mut().zip(&self.paths) {
            iter.advance().fastq_err(path, line)?;
        }

        let [fwd_path, rev_path] = &self.paths;
        let [fwd_iter, rev_iter] = &self.iters;
        let pair = match (fwd_iter.get(), rev_iter.get()) {
            (None, None) => return Ok(None),
            (Some(_), None) => {
                return Err(FastqError::MateCount {
                    ended: rev_path.clone(),
                    other: fwd_path.clone(),
                    records: self.records_read,
                })
            }
            (None, Some(_)) => {
                return Err(FastqError::MateCount {
                    ended: fwd_path.clone(),
                    other: rev_path.clone(),
                    records: self.records_read,
                })
            }
            (Some(fwd), Some(rev)) => {
                let fwd_name = mate_name(fwd.head());
                let rev_name = mate_name(rev.head());
                if fwd_name != rev_name {
                    return Err(FastqError::MateName {
                        record: self.records_read,
                        forward: fwd_path.clone(),
                        reverse: rev_path.clone(),
                        forward_name: String::from_utf8_lossy(fwd_name).into_owned(),
                        reverse_name: String::from_utf8_lossy(rev_name).into_owned(),
                    });
                }
                ReadPair::new(
                    fwd_name.to_vec(),
                    parse_record(&fwd, fwd_path, line)?,
                    parse_record(&rev, rev_path, line)?,
                )
            }
        };
        self.records_read += 1;
        Ok(Some(pair))
    }
}

impl Iterator for ReadPairIter {
    type Item = Result<ReadPair, FastqError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.get_next() {
            Ok(Some(pair)) => Some(Ok(pair)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Read all pairs from a forward and a reverse FASTQ file.
pub fn read_pairs(forward: &Path, reverse: &Path) -> Result<Vec<ReadPair>, FastqError> {
    ReadPairIter::new(forward, reverse)?.collect()
}

fn create_writer(path: &Path) -> Result<Box<dyn Write + Send>> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufWriter::new(GzEncoder::new(
            file,
            Compression::default(),
        ))))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Write read pairs to a forward and a reverse FASTQ file, gzip compressed when
/// the file name ends in `.gz`.
pub struct PairWriter {
    writers: [Box<dyn Write + Send>; 2],
    paths: [PathBuf; 2],
}

impl PairWriter {
    pub fn create(forward: &Path, reverse: &Path) -> Result<PairWriter> {
        Ok(PairWriter {
            writers: [create_writer(forward)?, create_writer(reverse)?],
            paths: [forward.to_path_buf(), reverse.to_path_buf()],
        })
    }

    pub fn write(&mut self, pair: &ReadPair) -> Result<()> {
        for which in WhichRead::both() {
            let read = pair.read(which);
            let suffix: &[u8] = match which {
                WhichRead::Forward => b" 1",
                WhichRead::Reverse => b" 2",
            };
            let w = &mut self.writers[which.index()];
            let mut write = || -> std::io::Result<()> {
                w.write_all(b"@")?;
                w.write_all(pair.name())?;
                w.write_all(suffix)?;
                w.write_all(b"\n")?;
                w.write_all(read.seq())?;
                w.write_all(b"\n+\n")?;
                w.write_all(&read.qual_string())?;
                w.write_all(b"\n")
            };
            write().with_context(|| self.paths[which.index()].display().to_string())?;
        }
        Ok(())
    }

    /// Flush both files. Compressed streams are finalized when dropped.
    pub fn finish(mut self) -> Result<()> {
        for (w, path) in self.writers.iter_mut().zip(&self.paths) {
            w.flush().with_context(|| path.display().to_string())?;
        }
        Ok(())
    }
}
