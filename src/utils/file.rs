use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use flate2::read::GzDecoder;

use crate::config::defs::{SUM_EXT, TSV_EXT};

/// Reader over a plain or gzipped file.
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(GzDecoder<File>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn open_maybe_gzipped(path: &Path) -> io::Result<FileReader> {
    let gz = is_gzipped(path)?;
    let file = File::open(path)?;
    Ok(if gz {
        FileReader::Gzipped(GzDecoder::new(file))
    } else {
        FileReader::Uncompressed(BufReader::new(file))
    })
}

/// Splits a file name at its last dot, keeping the dot on the extension.
/// `sample.fastq.gz` -> (`sample.fastq`, `.gz`); `reads` -> (`reads`, ``).
/// A leading dot does not start an extension.
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(0) | None => (file_name, ""),
        Some(idx) => file_name.split_at(idx),
    }
}

pub fn file_name_string(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("Path has no file name: {}", path.display()))
}

/// Directory holding the chunks of one input: `<split_dir>/<input file name>`.
pub fn split_chunk_dir(split_dir: &Path, input: &Path) -> Result<PathBuf> {
    Ok(split_dir.join(file_name_string(input)?))
}

/// Chunk file name for a 1-based ordinal: `sample.fasta`, 2 -> `sample.2.fasta`.
pub fn chunk_file_name(input_name: &str, ordinal: usize) -> String {
    let (stem, ext) = split_extension(input_name);
    format!("{}.{}{}", stem, ordinal, ext)
}

/// Report artifacts centrifuge writes for one classified unit: (summary, report).
pub fn report_paths(reports_dir: &Path, unit: &Path) -> Result<(PathBuf, PathBuf)> {
    let name = file_name_string(unit)?;
    Ok((
        reports_dir.join(format!("{}.{}", name, SUM_EXT)),
        reports_dir.join(format!("{}.{}", name, TSV_EXT)),
    ))
}

/// Collapsed output for an original input and report type: `<collapse_dir>/<stem>.<type>`.
pub fn collapsed_path(collapse_dir: &Path, input_name: &str, file_type: &str) -> PathBuf {
    let (stem, _) = split_extension(input_name);
    collapse_dir.join(format!("{}.{}", stem, file_type))
}

/// Expands a list of files and directories into files.
/// Directories contribute the regular files directly inside them.
pub fn find_input_files(query: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for qry in query {
        let path = PathBuf::from(qry);
        if path.is_dir() {
            files.extend(list_files(&path)?);
        } else if path.is_file() {
            files.push(path);
        } else {
            return Err(anyhow!("--query \"{}\" neither file nor directory", qry));
        }
    }
    Ok(files)
}

/// Regular files directly inside `dir`, sorted by path.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

pub fn count_lines(path: &Path) -> io::Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut n = 0;
    for line in reader.lines() {
        line?;
        n += 1;
    }
    Ok(n)
}

/// Quotes a path or argument for a POSIX shell when it carries anything beyond a safe set.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./+=,:@%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

pub fn shell_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("sample.fasta"), ("sample", ".fasta"));
        assert_eq!(split_extension("sample.fastq.gz"), ("sample.fastq", ".gz"));
        assert_eq!(split_extension("reads"), ("reads", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
    }

    #[test]
    fn test_chunk_and_report_naming() -> Result<()> {
        assert_eq!(chunk_file_name("sample.fasta", 1), "sample.1.fasta");
        assert_eq!(chunk_file_name("run.R1.fq", 12), "run.R1.12.fq");
        assert_eq!(chunk_file_name("noext", 3), "noext.3");

        let split = split_chunk_dir(Path::new("/out/split"), Path::new("/data/sample.fasta"))?;
        assert_eq!(split, PathBuf::from("/out/split/sample.fasta"));

        let (sum, tsv) = report_paths(Path::new("/out/reports"), Path::new("/out/split/sample.fasta/sample.1.fasta"))?;
        assert_eq!(sum, PathBuf::from("/out/reports/sample.1.fasta.sum"));
        assert_eq!(tsv, PathBuf::from("/out/reports/sample.1.fasta.tsv"));

        assert_eq!(
            collapsed_path(Path::new("/out/collapsed"), "sample.fasta", "tsv"),
            PathBuf::from("/out/collapsed/sample.tsv")
        );
        Ok(())
    }

    #[test]
    fn test_find_input_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sub = dir.path().join("in");
        fs::create_dir(&sub)?;
        fs::write(sub.join("b.fa"), ">b\nA\n")?;
        fs::write(sub.join("a.fa"), ">a\nA\n")?;
        fs::create_dir(sub.join("nested"))?;
        let single = dir.path().join("c.fa");
        fs::write(&single, ">c\nA\n")?;

        let query = vec![
            sub.to_string_lossy().into_owned(),
            single.to_string_lossy().into_owned(),
        ];
        let files = find_input_files(&query)?;
        assert_eq!(files, vec![sub.join("a.fa"), sub.join("b.fa"), single]);

        let missing = vec![dir.path().join("nope").to_string_lossy().into_owned()];
        assert!(find_input_files(&missing).is_err());
        Ok(())
    }

    #[test]
    fn test_gzip_detection() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let plain = dir.path().join("plain.fa");
        fs::write(&plain, ">a\nACGT\n")?;
        let gz = dir.path().join("zipped.fa.gz");
        let mut enc = GzEncoder::new(File::create(&gz)?, Compression::default());
        enc.write_all(b">a\nACGT\n")?;
        enc.finish()?;
        let empty = dir.path().join("empty.fa");
        fs::write(&empty, "")?;

        assert!(!is_gzipped(&plain)?);
        assert!(is_gzipped(&gz)?);
        assert!(!is_gzipped(&empty)?);

        let mut text = String::new();
        open_maybe_gzipped(&gz)?.read_to_string(&mut text)?;
        assert_eq!(text, ">a\nACGT\n");
        Ok(())
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/data/sample.1.fasta"), "/data/sample.1.fasta");
        assert_eq!(shell_quote("p_compressed+h+v"), "p_compressed+h+v");
        assert_eq!(shell_quote("my reads.fa"), "'my reads.fa'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
