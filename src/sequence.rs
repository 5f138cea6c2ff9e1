use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{PipelineError, Result};
use crate::types::{Gene, DEFAULT_GENE_ID};

const GI: &str = ">gi";

/// Read every gene record from a sequence file (plain or `.gz`).
///
/// Records are separated by a blank line and their headers are `|`-delimited.
/// Every gene gets `input_tax_id` as its organism taxid.
pub fn read_genes<P: AsRef<Path>>(path: P, input_tax_id: u32) -> Result<Vec<Gene>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(PipelineError::InputNotFound(path.to_path_buf()));
    }
    let f = File::open(path)?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };

    let genes = parse_genes(reader, input_tax_id)?;
    log::info!("Read {} gene(s) from {}", genes.len(), path.display());
    Ok(genes)
}

pub fn parse_genes<R: BufRead>(reader: R, input_tax_id: u32) -> io::Result<Vec<Gene>> {
    let mut genes = Vec::new();
    let mut record: Vec<String> = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            flush_record(&mut record, input_tax_id, &mut genes);
        } else {
            record.push(line);
        }
    }
    flush_record(&mut record, input_tax_id, &mut genes);

    Ok(genes)
}

fn flush_record(record: &mut Vec<String>, input_tax_id: u32, genes: &mut Vec<Gene>) {
    if record.is_empty() {
        return;
    }
    match parse_record(record, input_tax_id) {
        Some(gene) => genes.push(gene),
        None => log::debug!("Skipping malformed record starting with {:?}", record[0]),
    }
    record.clear();
}

/// `>gi|<id>|<db>|<accession>|<description>` or `><db>|<accession>|<description>`,
/// followed by sequence lines. The description runs to the end of the header
/// line, so it may itself contain `|`.
fn parse_record(lines: &[String], input_tax_id: u32) -> Option<Gene> {
    let text = lines.join("\n");
    let header = lines.first()?;
    if !header.contains('|') {
        return None;
    }

    let (id, description) = if header.split('|').next() == Some(GI) {
        let mut fields = header.splitn(5, '|');
        let id = fields.nth(1)?.trim().parse().ok()?;
        (id, fields.nth(2)?)
    } else {
        (DEFAULT_GENE_ID, header.splitn(3, '|').nth(2)?)
    };

    let sequence: String = lines[1..].iter().map(|l| l.trim()).collect();

    Some(Gene {
        id,
        description: description.trim().to_string(),
        sequence,
        record: text,
        tax_id: input_tax_id,
    })
}

/// Write genes back out exactly as they were read, one blank line between
/// records.
pub fn write_genes<W: Write>(mut writer: W, genes: &[Gene]) -> io::Result<()> {
    for (i, gene) in genes.iter().enumerate() {
        if i > 0 {
            writeln!(writer)?;
        }
        writeln!(writer, "{}", gene.record)?;
    }
    writer.flush()
}
