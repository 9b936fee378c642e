// Centrifuge report (TSV) model, parsing and abundance filtering
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::config::defs::{PipelineError, REPORT_COLUMNS};

/// One row of a centrifuge `--report-file` table.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonRow {
    pub name: String,
    pub tax_id: u64,
    pub tax_rank: String,
    pub genome_size: String,
    pub num_reads: u64,
    pub num_unique_reads: u64,
    pub abundance: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationReport {
    pub rows: Vec<TaxonRow>,
}

struct ColumnIndex {
    name: usize,
    tax_id: usize,
    tax_rank: usize,
    genome_size: usize,
    num_reads: usize,
    num_unique_reads: usize,
    abundance: usize,
}

impl ColumnIndex {
    fn from_header(header: &str) -> Result<Self, String> {
        let positions: HashMap<&str, usize> = header
            .split('\t')
            .enumerate()
            .map(|(i, col)| (col.trim(), i))
            .collect();
        let find = |col: &str| {
            positions
                .get(col)
                .copied()
                .ok_or_else(|| format!("missing column '{}'", col))
        };
        Ok(Self {
            name: find("name")?,
            tax_id: find("taxID")?,
            tax_rank: find("taxRank")?,
            genome_size: find("genomeSize")?,
            num_reads: find("numReads")?,
            num_unique_reads: find("numUniqueReads")?,
            abundance: find("abundance")?,
        })
    }

    fn parse_row(&self, line: &str) -> Result<TaxonRow, String> {
        let fields: Vec<&str> = line.split('\t').collect();
        let get = |idx: usize, col: &str| {
            fields
                .get(idx)
                .copied()
                .ok_or_else(|| format!("missing field '{}'", col))
        };
        let int = |idx: usize, col: &str| -> Result<u64, String> {
            let raw = get(idx, col)?;
            raw.trim()
                .parse::<u64>()
                .map_err(|e| format!("{} '{}' is not an integer: {}", col, raw, e))
        };
        let abundance_raw = get(self.abundance, "abundance")?;
        Ok(TaxonRow {
            name: get(self.name, "name")?.to_string(),
            tax_id: int(self.tax_id, "taxID")?,
            tax_rank: get(self.tax_rank, "taxRank")?.to_string(),
            genome_size: get(self.genome_size, "genomeSize")?.to_string(),
            num_reads: int(self.num_reads, "numReads")?,
            num_unique_reads: int(self.num_unique_reads, "numUniqueReads")?,
            abundance: abundance_raw
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("abundance '{}' is not a number: {}", abundance_raw, e))?,
        })
    }
}

impl ClassificationReport {
    /// Parses a report with a header row; columns are located by name.
    pub fn from_reader<R: BufRead>(reader: R, path: &Path) -> Result<Self, PipelineError> {
        let invalid = |line: usize, reason: String| PipelineError::InvalidReport {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let mut lines = reader.lines();
        let header = match lines.next() {
            Some(line) => line.map_err(|e| PipelineError::IOError(e.to_string()))?,
            None => return Err(invalid(1, "empty report, header row required".to_string())),
        };
        let columns = ColumnIndex::from_header(header.trim_end_matches('\r')).map_err(|e| invalid(1, e))?;

        let mut rows = Vec::new();
        for (i, line) in lines.enumerate() {
            let line = line.map_err(|e| PipelineError::IOError(e.to_string()))?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            rows.push(columns.parse_row(line).map_err(|e| invalid(i + 2, e))?);
        }
        Ok(Self { rows })
    }

    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path)
            .map_err(|e| PipelineError::IOError(format!("{}: {}", path.display(), e)))?;
        Self::from_reader(BufReader::new(file), path)
    }
}

/// Rounds to two decimals from the exact binary value, ties to even.
/// 0.125 -> 0.12, 0.375 -> 0.38.
pub fn round2(x: f64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    format!("{:.2}", x).parse().unwrap_or(x)
}

/// Renders a float the way the report has always carried it: integral values keep a `.0`.
pub fn format_abundance(x: f64) -> String {
    let s = x.to_string();
    if s.contains('.') || s.contains('e') || !x.is_finite() {
        s
    } else {
        format!("{}.0", s)
    }
}

pub fn write_header<W: Write>(writer: &mut W) -> std::io::Result<()> {
    writeln!(writer, "{}", REPORT_COLUMNS.join("\t"))
}

pub fn write_row<W: Write>(writer: &mut W, row: &TaxonRow) -> std::io::Result<()> {
    writeln!(
        writer,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        row.name,
        row.tax_id,
        row.tax_rank,
        row.genome_size,
        row.num_reads,
        row.num_unique_reads,
        format_abundance(row.abundance)
    )
}

/// Taxa whose abundance is strictly above `min_abundance`, in report order.
pub fn select_taxa(report: &ClassificationReport, min_abundance: f64) -> Vec<u64> {
    report
        .rows
        .iter()
        .filter(|row| row.abundance > min_abundance)
        .map(|row| row.tax_id)
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const REPORT: &str = "name\ttaxID\ttaxRank\tgenomeSize\tnumReads\tnumUniqueReads\tabundance\n\
        Escherichia coli\t562\tspecies\t5231428\t120\t100\t0.6\n\
        Homo sapiens\t9606\tspecies\t3000000000\t2\t2\t0.01\n\
        Bacteroides\t816\tgenus\t0\t78\t40\t0.39\n";

    fn parse(text: &str) -> Result<ClassificationReport, PipelineError> {
        ClassificationReport::from_reader(Cursor::new(text), Path::new("test.tsv"))
    }

    #[test]
    fn test_parse_report() -> anyhow::Result<()> {
        let report = parse(REPORT)?;
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.rows[0].name, "Escherichia coli");
        assert_eq!(report.rows[0].tax_id, 562);
        assert_eq!(report.rows[0].genome_size, "5231428");
        assert_eq!(report.rows[2].num_unique_reads, 40);
        assert_eq!(report.rows[2].abundance, 0.39);
        Ok(())
    }

    #[test]
    fn test_parse_reordered_columns() -> anyhow::Result<()> {
        let text = "taxID\tname\tabundance\ttaxRank\tgenomeSize\tnumUniqueReads\tnumReads\n7\tfoo\t0.5\tgenus\t10\t3\t4\n";
        let report = parse(text)?;
        assert_eq!(report.rows[0].tax_id, 7);
        assert_eq!(report.rows[0].num_reads, 4);
        assert_eq!(report.rows[0].num_unique_reads, 3);
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse(""), Err(PipelineError::InvalidReport { line: 1, .. })));
        assert!(matches!(
            parse("name\ttaxID\n"),
            Err(PipelineError::InvalidReport { line: 1, .. })
        ));
        let bad = "name\ttaxID\ttaxRank\tgenomeSize\tnumReads\tnumUniqueReads\tabundance\nx\t1\tspecies\t0\tmany\t1\t0.1\n";
        assert!(matches!(parse(bad), Err(PipelineError::InvalidReport { line: 2, .. })));
    }

    #[test]
    fn test_select_taxa_is_strict() -> anyhow::Result<()> {
        let report = parse(REPORT)?;
        assert_eq!(select_taxa(&report, 0.01), vec![562, 816]);
        assert_eq!(select_taxa(&report, 0.39), vec![562]);
        assert_eq!(select_taxa(&report, 0.0), vec![562, 9606, 816]);
        assert!(select_taxa(&report, 0.6).is_empty());
        Ok(())
    }

    #[test]
    fn test_round_and_format() {
        assert_eq!(round2(15.0 / 20.0), 0.75);
        assert_eq!(round2(1.0 / 3.0), 0.33);
        assert_eq!(round2(2.0 / 3.0), 0.67);
        assert_eq!(round2(1.0 / 8.0), 0.12);
        assert_eq!(round2(3.0 / 8.0), 0.38);
        assert_eq!(round2(5.0 / 8.0), 0.62);
        assert_eq!(round2(7.0 / 8.0), 0.88);
        // 0.675 is stored just above the tie
        assert_eq!(round2(0.675), 0.68);
        assert_eq!(format_abundance(0.75), "0.75");
        assert_eq!(format_abundance(1.0), "1.0");
        assert_eq!(format_abundance(0.0), "0.0");
        assert_eq!(format_abundance(0.1), "0.1");
    }

    #[test]
    fn test_write_row() -> anyhow::Result<()> {
        let report = parse(REPORT)?;
        let mut out = Vec::new();
        write_header(&mut out)?;
        write_row(&mut out, &report.rows[0])?;
        assert_eq!(
            String::from_utf8(out)?,
            "name\ttaxID\ttaxRank\tgenomeSize\tnumReads\tnumUniqueReads\tabundance\n\
             Escherichia coli\t562\tspecies\t5231428\t120\t100\t0.6\n"
        );
        Ok(())
    }
}
