use ahash::{AHashMap, AHashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::types::HitRecord;

/// Parse the leading `queryID<TAB>subjectTaxIDs` columns of one result line.
///
/// The query may be a bare number or a `gi|<n>|...` identifier. BLAST reports
/// several taxids as `9606;9598`, so one line can yield several records.
pub fn parse_hit_line(line: &str) -> Vec<HitRecord> {
    let mut cols = line.split('\t');
    let (Some(query), Some(taxids)) = (cols.next(), cols.next()) else {
        return Vec::new();
    };
    let Some(query_id) = parse_query_id(query) else {
        return Vec::new();
    };

    taxids
        .split(';')
        .filter_map(|t| t.trim().parse().ok())
        .map(|subject_tax_id| HitRecord {
            query_id,
            subject_tax_id,
        })
        .collect()
}

fn parse_query_id(field: &str) -> Option<u32> {
    let field = field.trim();
    match field.strip_prefix("gi|") {
        Some(rest) => rest.split('|').next()?.parse().ok(),
        None => field.parse().ok(),
    }
}

/// Subject taxids per query gene, distinct and in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct HitIndex {
    by_gene: AHashMap<u32, Vec<u32>>,
    seen: AHashSet<(u32, u32)>,
}

impl HitIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hit: HitRecord) {
        if self.seen.insert((hit.query_id, hit.subject_tax_id)) {
            self.by_gene
                .entry(hit.query_id)
                .or_default()
                .push(hit.subject_tax_id);
        }
    }

    /// Taxids hit by `gene_id`, or `None` if the gene had no hits.
    pub fn tax_ids(&self, gene_id: u32) -> Option<&[u32]> {
        self.by_gene.get(&gene_id).map(Vec::as_slice)
    }

    pub fn gene_count(&self) -> usize {
        self.by_gene.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_gene.is_empty()
    }
}

impl FromIterator<HitRecord> for HitIndex {
    fn from_iter<I: IntoIterator<Item = HitRecord>>(iter: I) -> Self {
        let mut index = HitIndex::new();
        for hit in iter {
            index.add(hit);
        }
        index
    }
}

/// Group every hit in a combined result file by query gene.
pub fn group_by_gene<P: AsRef<Path>>(path: P) -> io::Result<HitIndex> {
    let file = File::open(path)?;
    read_hits(BufReader::new(file))
}

pub fn read_hits<R: BufRead>(reader: R) -> io::Result<HitIndex> {
    let mut index = HitIndex::new();
    let mut skipped = 0usize;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let hits = parse_hit_line(&line);
        if hits.is_empty() {
            skipped += 1;
        }
        for hit in hits {
            index.add(hit);
        }
    }

    if skipped > 0 {
        log::debug!("Skipped {skipped} unparsable hit line(s)");
    }
    log::info!("Indexed hits for {} gene(s)", index.gene_count());
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_distinct_taxids_in_first_seen_order() {
        let input = "\
101\t9606\t250.1\t1e-50
101\t10090\t240.0\t1e-48
102\t562\t80.2\t1e-10
101\t9606\t230.5\t1e-45
101\t9598\t220.0\t1e-40
";
        let index = read_hits(input.as_bytes()).unwrap();
        assert_eq!(index.gene_count(), 2);
        assert_eq!(index.tax_ids(101), Some(&[9606, 10090, 9598][..]));
        assert_eq!(index.tax_ids(102), Some(&[562][..]));
        assert_eq!(index.tax_ids(103), None);
    }

    #[test]
    fn gi_queries_and_multi_taxid_columns() {
        let hits = parse_hit_line("gi|4501|ref|NP_1|\t9606;9598\t99.0");
        assert_eq!(
            hits,
            vec![
                HitRecord { query_id: 4501, subject_tax_id: 9606 },
                HitRecord { query_id: 4501, subject_tax_id: 9598 },
            ]
        );
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let input = "garbage\nabc\t9606\n7\tN/A\n\n7\t562\n";
        let index = read_hits(input.as_bytes()).unwrap();
        assert_eq!(index.gene_count(), 1);
        assert_eq!(index.tax_ids(7), Some(&[562][..]));
    }

    #[test]
    fn empty_file_gives_empty_index() {
        assert!(read_hits("".as_bytes()).unwrap().is_empty());
    }
}
