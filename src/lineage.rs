//src/lineage.rs

use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;

use crate::hits::HitIndex;
use crate::taxdb::{Lineage, Rank, TaxTree};
use crate::types::{Gene, GeneTree, TreeNode};

/// A per-gene tree of ranked nodes, stored as child edges over the reference
/// taxonomy. Node data is borrowed from the reference, which is never
/// modified, so every gene can build its own tree independently.
pub struct PrunedTree<'a> {
    reference: &'a TaxTree,
    children: AHashMap<u32, Vec<u32>>,
    parents: AHashMap<u32, u32>,
}

impl<'a> PrunedTree<'a> {
    pub fn new(reference: &'a TaxTree) -> Self {
        Self {
            reference,
            children: AHashMap::new(),
            parents: AHashMap::new(),
        }
    }

    /// Attach `child` under `parent`. A node already attached somewhere is
    /// left where it is, so shared ancestors appear once. Returns whether a
    /// new edge was added.
    pub fn attach(&mut self, parent: u32, child: u32) -> bool {
        if parent == child || self.parents.contains_key(&child) {
            return false;
        }
        self.parents.insert(child, parent);
        self.children.entry(parent).or_default().push(child);
        true
    }

    /// Children of `id` in attachment order.
    pub fn children(&self, id: u32) -> &[u32] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent(&self, id: u32) -> Option<u32> {
        self.parents.get(&id).copied()
    }

    /// Link the ranks of `lineage` into a chain, starting from the first rank
    /// at or after `start` that the lineage has. Ranks the lineage lacks are
    /// skipped, so e.g. an order hangs directly under its phylum when the
    /// class is missing.
    pub fn merge(&mut self, lineage: &Lineage, start: Rank) {
        let reference = self.reference;
        let first_present = |from: Rank| {
            from.from_here().find_map(|rank| {
                lineage
                    .get(&rank)
                    .copied()
                    .filter(|&id| reference.contains(id))
                    .map(|id| (rank, id))
            })
        };

        let Some((mut rank, mut node)) = first_present(start) else {
            return;
        };
        while let Some((next_rank, next_node)) = rank.next().and_then(&first_present) {
            self.attach(node, next_node);
            rank = next_rank;
            node = next_node;
        }
    }

    /// Nested `{name, children}` view of the subtree under `id`.
    pub fn to_tree(&self, id: u32) -> Option<TreeNode> {
        let node = self.reference.lookup(id)?;
        let children = self
            .children(id)
            .iter()
            .filter_map(|&child| self.to_tree(child))
            .collect();
        Some(TreeNode {
            name: node.name.clone(),
            children,
        })
    }
}

/// Build the pruned lineage tree for one gene from the taxids it hit.
///
/// Returns `None` when no taxid is known to `reference`, when the hits span
/// more than one superkingdom, or when no lineage reaches a superkingdom.
pub fn build_tree(gene: &Gene, tax_ids: &[u32], reference: &TaxTree) -> Option<GeneTree> {
    let lineages: Vec<Lineage> = tax_ids
        .iter()
        .filter_map(|&id| reference.hierarchy_from(id))
        .collect();
    if lineages.is_empty() {
        log::debug!("Gene {}: none of {} taxid(s) are in the taxonomy", gene.id, tax_ids.len());
        return None;
    }

    let mut pruned = PrunedTree::new(reference);
    for lineage in &lineages {
        pruned.merge(lineage, Rank::Superkingdom);
    }

    let superkingdoms: AHashSet<u32> = lineages
        .iter()
        .filter_map(|l| l.get(&Rank::Superkingdom).copied())
        .collect();
    if superkingdoms.len() > 1 {
        // No single root to hang these under; leave the gene out rather than
        // pick one superkingdom arbitrarily.
        log::debug!(
            "Gene {}: hits span {} superkingdoms, skipping",
            gene.id,
            superkingdoms.len()
        );
        return None;
    }

    let root = lineages
        .iter()
        .filter_map(|l| l.get(&Rank::Superkingdom).copied())
        .find(|&id| reference.contains(id));
    let Some(root) = root else {
        log::debug!("Gene {}: no hit resolves to a superkingdom", gene.id);
        return None;
    };

    let tree = pruned.to_tree(root)?;
    Some(GeneTree {
        description: gene.description.clone(),
        tree,
    })
}

/// Lineage trees for every gene with hits, in input order.
pub fn process_all(genes: &[Gene], hits: &HitIndex, reference: &TaxTree) -> Vec<GeneTree> {
    let trees: Vec<GeneTree> = genes
        .par_iter()
        .filter_map(|gene| {
            let tax_ids = hits.tax_ids(gene.id)?;
            build_tree(gene, tax_ids, reference)
        })
        .collect();

    log::info!("Built lineage trees for {} of {} gene(s)", trees.len(), genes.len());
    trees
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxdb::fixtures::sample_tree;
    use crate::taxdb::TaxNode;
    use crate::types::HitRecord;

    fn gene(id: u32, description: &str) -> Gene {
        Gene {
            id,
            record: format!(">gi|{id}|ref|X| {description}\nMKV"),
            description: description.to_string(),
            sequence: "MKV".to_string(),
            tax_id: 9606,
        }
    }

    fn leaf(name: &str) -> TreeNode {
        TreeNode {
            name: name.to_string(),
            children: Vec::new(),
        }
    }

    fn chain(names: &[&str]) -> TreeNode {
        let (last, rest) = names.split_last().unwrap();
        rest.iter().rev().fold(leaf(last), |child, name| TreeNode {
            name: name.to_string(),
            children: vec![child],
        })
    }

    fn count_named(node: &TreeNode, name: &str) -> usize {
        usize::from(node.name == name)
            + node.children.iter().map(|c| count_named(c, name)).sum::<usize>()
    }

    #[test]
    fn human_and_mouse_share_one_root_and_split_below_mammalia() {
        let tree = sample_tree();
        let out = build_tree(&gene(1, "geneA"), &[9606, 10090], &tree).unwrap();

        let expected = TreeNode {
            name: "Eukaryota".into(),
            children: vec![TreeNode {
                name: "Metazoa".into(),
                children: vec![TreeNode {
                    name: "Chordata".into(),
                    children: vec![TreeNode {
                        name: "Mammalia".into(),
                        children: vec![
                            chain(&["Primates", "Hominidae", "Homo", "Homo sapiens"]),
                            chain(&["Rodentia", "Muridae", "Mus", "Mus musculus"]),
                        ],
                    }],
                }],
            }],
        };
        assert_eq!(out.description, "geneA");
        assert_eq!(out.tree, expected);
        assert_eq!(out.tree.leaf_count(), 2);
    }

    #[test]
    fn shared_phylum_is_not_duplicated() {
        let tree = sample_tree();
        let out = build_tree(&gene(1, "g"), &[9606, 10090, 9606], &tree).unwrap();
        assert_eq!(count_named(&out.tree, "Chordata"), 1);

        let mut pruned = PrunedTree::new(&tree);
        for id in [9606, 10090] {
            pruned.merge(&tree.hierarchy_from(id).unwrap(), Rank::Superkingdom);
        }
        assert_eq!(pruned.children(33208), &[7711]);
        assert_eq!(pruned.children(40674), &[9443, 9989]);
    }

    #[test]
    fn missing_ranks_are_bridged_without_placeholders() {
        let tree: TaxTree = [
            TaxNode { id: 2, name: "Bacteria".into(), rank: Some(Rank::Superkingdom), parent: None },
            TaxNode { id: 30, name: "Phylum 30".into(), rank: Some(Rank::Phylum), parent: Some(2) },
            TaxNode { id: 9999, name: "Species 9999".into(), rank: Some(Rank::Species), parent: Some(30) },
        ]
        .into_iter()
        .collect();
        let lineage: Lineage = [
            (Rank::Superkingdom, 2),
            (Rank::Phylum, 30),
            (Rank::Species, 9999),
        ]
        .into_iter()
        .collect();

        let mut pruned = PrunedTree::new(&tree);
        pruned.merge(&lineage, Rank::Superkingdom);
        assert_eq!(pruned.children(2), &[30]);
        assert_eq!(pruned.children(30), &[9999]);
        assert_eq!(pruned.parent(9999), Some(30));
        assert_eq!(
            pruned.to_tree(2).unwrap(),
            chain(&["Bacteria", "Phylum 30", "Species 9999"])
        );
    }

    #[test]
    fn order_hangs_under_phylum_when_class_is_missing() {
        let tree = sample_tree();
        let mut lineage = tree.hierarchy_from(562).unwrap();
        lineage.remove(&Rank::Class);

        let mut pruned = PrunedTree::new(&tree);
        pruned.merge(&lineage, Rank::Superkingdom);
        assert_eq!(pruned.children(1224), &[91347]);
        assert!(pruned.children(1236).is_empty());
    }

    #[test]
    fn merge_starts_at_first_rank_present() {
        let tree = sample_tree();
        let mut pruned = PrunedTree::new(&tree);
        pruned.merge(&tree.hierarchy_from(9606).unwrap(), Rank::Order);
        assert_eq!(pruned.parent(9443), None);
        assert_eq!(pruned.children(9443), &[9604]);
        assert!(pruned.children(40674).is_empty());
    }

    #[test]
    fn conflicting_superkingdoms_exclude_the_gene() {
        let tree = sample_tree();
        assert_eq!(build_tree(&gene(1, "g"), &[9606, 562], &tree), None);
    }

    #[test]
    fn unknown_taxids_are_ignored() {
        let tree = sample_tree();
        assert_eq!(build_tree(&gene(1, "g"), &[424242], &tree), None);

        let out = build_tree(&gene(1, "g"), &[424242, 562], &tree).unwrap();
        assert_eq!(out.tree.name, "Bacteria");
        assert_eq!(out.tree.leaf_count(), 1);
    }

    #[test]
    fn hits_above_superkingdom_produce_nothing() {
        let tree = sample_tree();
        assert_eq!(build_tree(&gene(1, "g"), &[1, 131567], &tree), None);
    }

    #[test]
    fn pruning_leaves_the_reference_untouched() {
        let tree = sample_tree();
        let before = tree.duplicate();
        build_tree(&gene(1, "g"), &[9606, 10090], &tree).unwrap();
        for id in [2759, 7711, 9606, 10090] {
            assert_eq!(tree.lookup(id), before.lookup(id));
        }
        let fresh = PrunedTree::new(&tree);
        assert!(fresh.children(2759).is_empty());
    }

    #[test]
    fn leaves_serialize_without_children() {
        let tree = sample_tree();
        let mut lineage = Lineage::new();
        lineage.insert(Rank::Superkingdom, 2);
        let mut pruned = PrunedTree::new(&tree);
        pruned.merge(&lineage, Rank::Superkingdom);
        let json = serde_json::to_string(&pruned.to_tree(2).unwrap()).unwrap();
        assert_eq!(json, r#"{"name":"Bacteria"}"#);
    }

    #[test]
    fn process_all_keeps_input_order_and_skips_genes_without_trees() {
        let tree = sample_tree();
        let genes = vec![
            gene(3, "third"),
            gene(1, "first"),
            gene(2, "no hits"),
            gene(4, "mixed kingdoms"),
            gene(5, "unknown only"),
        ];
        let hits: HitIndex = [(1, 562), (3, 9606), (3, 10090), (4, 9606), (4, 562), (5, 777777)]
            .into_iter()
            .map(|(query_id, subject_tax_id)| HitRecord { query_id, subject_tax_id })
            .collect();

        let out = process_all(&genes, &hits, &tree);
        let descriptions: Vec<&str> = out.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(descriptions, vec!["third", "first"]);
        assert_eq!(out[0].tree.leaf_count(), 2);
        assert_eq!(out[1].tree.name, "Bacteria");
    }
}
