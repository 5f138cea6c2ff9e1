//src/taxdb.rs

use ahash::AHashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// The ranks a lineage is summarized at, outermost first.
///
/// The derived ordering follows declaration order, so a [`Lineage`] iterates
/// from superkingdom down to species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Superkingdom,
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Rank {
    pub const ALL: [Rank; 8] = [
        Rank::Superkingdom,
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    /// The next inner rank, or `None` after species.
    pub fn next(self) -> Option<Rank> {
        Rank::ALL.get(self as usize + 1).copied()
    }

    /// This rank and every inner rank after it.
    pub fn from_here(self) -> impl Iterator<Item = Rank> {
        Rank::ALL.into_iter().skip(self as usize)
    }

    /// Parse a taxDB rank column. Unsupported ranks ("no rank", "clade",
    /// "subspecies", ...) return `None`.
    pub fn from_name(name: &str) -> Option<Rank> {
        match name.trim().to_ascii_lowercase().as_str() {
            "superkingdom" | "domain" => Some(Rank::Superkingdom),
            "kingdom" => Some(Rank::Kingdom),
            "phylum" => Some(Rank::Phylum),
            "class" => Some(Rank::Class),
            "order" => Some(Rank::Order),
            "family" => Some(Rank::Family),
            "genus" => Some(Rank::Genus),
            "species" => Some(Rank::Species),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rank::Superkingdom => "superkingdom",
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rank -> taxid for one node's ancestry. Ranks the taxonomy skips for that
/// lineage are simply absent.
pub type Lineage = BTreeMap<Rank, u32>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxNode {
    pub id: u32,
    pub name: String,
    /// `None` for ranks outside [`Rank::ALL`].
    pub rank: Option<Rank>,
    /// `None` at the root.
    pub parent: Option<u32>,
}

/// The reference taxonomy, keyed by taxid.
#[derive(Debug, Clone, Default)]
pub struct TaxTree {
    nodes: AHashMap<u32, TaxNode>,
}

impl TaxTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a node. A parent equal to the node's own id marks
    /// the root and is stored as `None`.
    pub fn insert(&mut self, mut node: TaxNode) {
        if node.parent == Some(node.id) {
            node.parent = None;
        }
        self.nodes.insert(node.id, node);
    }

    pub fn lookup(&self, id: u32) -> Option<&TaxNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walk from `id` to the root and record the first taxid seen at each
    /// rank. Returns `None` only when `id` itself is unknown; a chain that
    /// breaks early yields whatever ranks were collected so far.
    pub fn hierarchy_from(&self, id: u32) -> Option<Lineage> {
        let mut node = self.nodes.get(&id)?;
        let mut lineage = Lineage::new();

        // A malformed taxDB may contain a cycle; never walk more than len() steps.
        for _ in 0..self.nodes.len() {
            if let Some(rank) = node.rank {
                lineage.entry(rank).or_insert(node.id);
            }
            match node.parent.and_then(|p| self.nodes.get(&p)) {
                Some(parent) => node = parent,
                None => break,
            }
        }
        Some(lineage)
    }

    /// An independent copy; changes to it never reach `self`.
    pub fn duplicate(&self) -> TaxTree {
        self.clone()
    }
}

impl FromIterator<TaxNode> for TaxTree {
    fn from_iter<I: IntoIterator<Item = TaxNode>>(iter: I) -> Self {
        let mut tree = TaxTree::new();
        for node in iter {
            tree.insert(node);
        }
        tree
    }
}

/// Parses a taxDB file in the format:
/// ```text
/// <taxid>\t<parentid>\t<taxname>\t<rank>
/// ```
pub fn parse_taxdb<P: AsRef<Path>>(filepath: P) -> io::Result<TaxTree> {
    let file = File::open(filepath)?;
    read_taxdb(BufReader::new(file))
}

pub fn read_taxdb<R: BufRead>(reader: R) -> io::Result<TaxTree> {
    let mut tree = TaxTree::new();
    let mut skipped = 0usize;

    for line_result in reader.lines() {
        let line = line_result?;
        // e.g. "2759\t131567\tEukaryota\tsuperkingdom"
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 4 {
            skipped += 1;
            continue;
        }

        let taxid: u32 = parts[0].trim().parse().unwrap_or(0);
        let parentid: u32 = parts[1].trim().parse().unwrap_or(0);
        if taxid == 0 {
            skipped += 1;
            continue;
        }

        tree.insert(TaxNode {
            id: taxid,
            name: parts[2].trim().to_string(),
            rank: Rank::from_name(parts[3]),
            parent: (parentid != 0).then_some(parentid),
        });
    }

    if skipped > 0 {
        log::debug!("Skipped {skipped} malformed taxDB line(s)");
    }
    log::info!("Loaded {} taxonomy nodes", tree.len());
    Ok(tree)
}
