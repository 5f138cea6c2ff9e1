//src/types.rs

use serde::Serialize;

/// Gene ID used when a record header carries no `gi` number.
pub const DEFAULT_GENE_ID: u32 = 0;

/// One gene record from the input sequence file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gene {
    pub id: u32,
    /// Raw record text (header and sequence lines), written verbatim to
    /// batch files.
    pub record: String,
    pub description: String,
    pub sequence: String,
    /// Organism-level taxonomy ID supplied for the whole input.
    pub tax_id: u32,
}

/// One line of search-tool output. Only the first two columns are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitRecord {
    pub query_id: u32,
    pub subject_tax_id: u32,
}

/// A node of the serialized lineage tree: `{"name": .., "children": [..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes without children.
    pub fn leaf_count(&self) -> usize {
        if self.children.is_empty() {
            1
        } else {
            self.children.iter().map(TreeNode::leaf_count).sum()
        }
    }
}

/// Output entry for one gene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneTree {
    pub description: String,
    pub tree: TreeNode,
}
