use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use seq_io::fasta::{Reader as FastaReader, OwnedRecord as FastaOwnedRecord};
use seq_io::fastq::{Reader as FastqReader, OwnedRecord as FastqOwnedRecord};

use crate::cli::FileFormat;
use crate::utils::file::{chunk_file_name, file_name_string, is_gzipped, open_maybe_gzipped, FileReader};

/// Defines FASTA and FASTQ as part of a unified FASTX structure.
#[derive(Clone, Debug)]
pub enum SequenceRecord {
    Fasta {
        id: String,
        desc: Option<String>,
        seq: Vec<u8>,
    },
    Fastq {
        id: String,
        desc: Option<String>,
        seq: Vec<u8>,
        qual: Vec<u8>,
    },
}

impl SequenceRecord {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            SequenceRecord::Fastq { id, desc, seq, qual } => {
                write_fastq_record(writer, id, desc.as_deref(), seq, qual)
            }
            SequenceRecord::Fasta { id, desc, seq } => {
                write_fasta_record(writer, id, desc.as_deref(), seq)
            }
        }
    }
}

impl From<FastaOwnedRecord> for SequenceRecord {
    fn from(record: FastaOwnedRecord) -> Self {
        let (id, desc) = parse_header(&record.head, '>');
        SequenceRecord::Fasta {
            id,
            desc,
            seq: record.seq,
        }
    }
}

impl From<FastqOwnedRecord> for SequenceRecord {
    fn from(record: FastqOwnedRecord) -> Self {
        let (id, desc) = parse_header(&record.head, '@');
        SequenceRecord::Fastq {
            id,
            desc,
            seq: record.seq,
            qual: record.qual,
        }
    }
}

/// Enum to hold either FASTA or FASTQ reader
pub enum SequenceReader {
    Fasta(FastaReader<FileReader>),
    Fastq(FastqReader<FileReader>),
}

impl SequenceReader {
    pub fn open(path: &Path, format: FileFormat) -> io::Result<Self> {
        let reader = open_maybe_gzipped(path)?;
        Ok(match format {
            FileFormat::Fasta => SequenceReader::Fasta(FastaReader::new(reader)),
            FileFormat::Fastq => SequenceReader::Fastq(FastqReader::new(reader)),
        })
    }

    /// Visits every record in file order.
    pub fn for_each_record<F>(self, mut f: F) -> Result<()>
    where
        F: FnMut(SequenceRecord) -> Result<()>,
    {
        match self {
            SequenceReader::Fasta(reader) => {
                for record in reader.into_records() {
                    f(record?.into())?;
                }
            }
            SequenceReader::Fastq(reader) => {
                for record in reader.into_records() {
                    f(record?.into())?;
                }
            }
        }
        Ok(())
    }
}

pub fn write_fasta_record<W: Write>(
    writer: &mut W,
    id: &str,
    desc: Option<&str>,
    seq: &[u8],
) -> io::Result<()> {
    writer.write_all(b">")?;
    writer.write_all(id.as_bytes())?;
    if let Some(desc) = desc {
        writer.write_all(b" ")?;
        writer.write_all(desc.as_bytes())?;
    }
    writer.write_all(b"\n")?;

    // 80 chars per line
    for chunk in seq.chunks(80) {
        writer.write_all(chunk)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

pub fn write_fastq_record<W: Write>(
    writer: &mut W,
    id: &str,
    desc: Option<&str>,
    seq: &[u8],
    qual: &[u8],
) -> io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(id.as_bytes())?;
    if let Some(desc) = desc {
        writer.write_all(b" ")?;
        writer.write_all(desc.as_bytes())?;
    }
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Parses a FASTX header into (id, desc), split on the first whitespace.
fn parse_header(head: &[u8], prefix: char) -> (String, Option<String>) {
    let head_str = String::from_utf8_lossy(head).into_owned();
    let parts: Vec<&str> = head_str.splitn(2, |c: char| c.is_whitespace()).collect();
    let id = parts[0].trim_start_matches(prefix).to_string();
    let desc = parts.get(1).map(|s| s.to_string()).filter(|s| !s.is_empty());
    (id, desc)
}

/// Enum to hold either an uncompressed or gzipped file writer
pub enum FileWriter {
    Uncompressed(BufWriter<File>),
    Gzipped(GzEncoder<BufWriter<File>>),
}

impl FileWriter {
    pub fn create(path: &Path, gzip: bool) -> io::Result<Self> {
        let inner = BufWriter::new(File::create(path)?);
        Ok(if gzip {
            FileWriter::Gzipped(GzEncoder::new(inner, Compression::default()))
        } else {
            FileWriter::Uncompressed(inner)
        })
    }

    pub fn finish(self) -> io::Result<()> {
        match self {
            FileWriter::Uncompressed(mut w) => w.flush(),
            FileWriter::Gzipped(w) => w.finish()?.flush(),
        }
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileWriter::Uncompressed(w) => w.write(buf),
            FileWriter::Gzipped(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileWriter::Uncompressed(w) => w.flush(),
            FileWriter::Gzipped(w) => w.flush(),
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct SplitSummary {
    pub sequences: usize,
    pub chunks: Vec<PathBuf>,
}

/// Writes `input` into chunks of at most `max_seqs` records under `out_dir`,
/// named `<stem>.<n><ext>` with n counting from 1. Gzipped input gives gzipped chunks.
pub fn split_sequence_file(
    input: &Path,
    format: FileFormat,
    out_dir: &Path,
    max_seqs: usize,
) -> Result<SplitSummary> {
    if max_seqs < 1 {
        return Err(anyhow!("--max-seqs-per-file cannot be less than one"));
    }
    if !input.is_file() {
        return Err(anyhow!("Input \"{}\" is not a file", input.display()));
    }
    fs::create_dir_all(out_dir)?;

    let input_name = file_name_string(input)?;
    let gzip = is_gzipped(input)?;
    let reader = SequenceReader::open(input, format)?;

    let mut summary = SplitSummary::default();
    let mut in_chunk = 0usize;
    let mut writer: Option<FileWriter> = None;

    reader.for_each_record(|record| {
        if in_chunk == max_seqs {
            in_chunk = 0;
            if let Some(w) = writer.take() {
                w.finish()?;
            }
        }
        if writer.is_none() {
            let path = out_dir.join(chunk_file_name(&input_name, summary.chunks.len() + 1));
            debug!("Opening chunk {}", path.display());
            writer = Some(FileWriter::create(&path, gzip)?);
            summary.chunks.push(path);
        }
        if let Some(w) = writer.as_mut() {
            record.write_to(w)?;
        }
        in_chunk += 1;
        summary.sequences += 1;
        Ok(())
    })?;

    if let Some(w) = writer.take() {
        w.finish()?;
    }
    Ok(summary)
}
