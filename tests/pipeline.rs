use std::fs;
use std::path::Path;
use std::process::Command;

use orfangenes_rs::config::PipelineConfig;
use orfangenes_rs::search::{batch_output_path, SearchTool};
use orfangenes_rs::{run_pipeline_with, PipelineError, TREES_FILE};

const GENES: &str = "\
>gi|101|ref|NP_000101.1| geneA [Homo sapiens]
MKVLAAGT

>gi|102|ref|NP_000102.1| geneB [Homo sapiens]
MSTNPKPQ

>gi|103|ref|NP_000103.1| geneC [Homo sapiens]
MQQQRRSL

>gi|104|ref|NP_000104.1| geneD [Homo sapiens]
MAAAKKLL

>gi|105|ref|NP_000105.1| geneE [Homo sapiens]
MWWWHHTT
";

const TAXDB: &str = "\
1\t1\troot\tno rank
131567\t1\tcellular organisms\tno rank
2759\t131567\tEukaryota\tsuperkingdom
33208\t2759\tMetazoa\tkingdom
7711\t33208\tChordata\tphylum
40674\t7711\tMammalia\tclass
9443\t40674\tPrimates\torder
9604\t9443\tHominidae\tfamily
9605\t9604\tHomo\tgenus
9606\t9605\tHomo sapiens\tspecies
9989\t40674\tRodentia\torder
10066\t9989\tMuridae\tfamily
10088\t10066\tMus\tgenus
10090\t10088\tMus musculus\tspecies
2\t131567\tBacteria\tsuperkingdom
1224\t2\tProteobacteria\tphylum
562\t1224\tEscherichia coli\tspecies
";

/// Stands in for BLAST: emits canned hits for every gi number in the batch.
struct CannedHits;

impl SearchTool for CannedHits {
    fn name(&self) -> &str {
        "canned"
    }

    fn command(&self, query: &Path, output: &Path) -> Command {
        let script = r#"
for id in $(grep '^>gi' "$1" | cut -d'|' -f2); do
  case $id in
    101) printf '%s\t9606\t50.0\n%s\t10090\t40.0\n%s\t9606\t35.0\n' $id $id $id ;;
    102) printf '%s\t562\t80.0\n' $id ;;
    103) printf '%s\t9606\t30.0\n%s\t562\t20.0\n' $id $id ;;
    105) printf '%s\t777777\t10.0\n' $id ;;
  esac
done > "$2"
"#;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script).arg("sh").arg(query).arg(output);
        cmd
    }
}

fn config(batch_size: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.batch.size = batch_size;
    config.search.max_workers = 2;
    config
}

#[test]
fn genes_become_pruned_lineage_trees() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("genes.fasta");
    let taxdb = dir.path().join("taxDB");
    let out = dir.path().join("out");
    fs::write(&input, GENES).unwrap();
    fs::write(&taxdb, TAXDB).unwrap();

    let results =
        run_pipeline_with(Box::new(CannedHits), &input, &taxdb, &out, 9606, &config(2)).unwrap();

    assert_eq!(results.genes.len(), 5);
    assert_eq!(results.search.outcomes.len(), 3);
    assert!(results.search.all_succeeded());
    for index in 1..=3 {
        assert!(batch_output_path(&out, index).exists());
    }

    let combined = fs::read_to_string(&results.search.combined).unwrap();
    let queries: Vec<&str> = combined
        .lines()
        .map(|l| l.split('\t').next().unwrap())
        .collect();
    assert_eq!(queries, vec!["101", "101", "101", "102", "103", "103", "105"]);

    // 103 spans two superkingdoms, 104 has no hits, 105 only hits an unknown taxid.
    let descriptions: Vec<&str> = results.trees.iter().map(|t| t.description.as_str()).collect();
    assert_eq!(descriptions, vec!["geneA [Homo sapiens]", "geneB [Homo sapiens]"]);

    let trees_path = out.join(TREES_FILE);
    results.write_trees(&trees_path).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&trees_path).unwrap()).unwrap();

    let gene_a = &json[0]["tree"];
    assert_eq!(gene_a["name"], "Eukaryota");
    let mammalia = &gene_a["children"][0]["children"][0]["children"][0];
    assert_eq!(mammalia["name"], "Mammalia");
    let orders: Vec<&str> = mammalia["children"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(orders, vec!["Primates", "Rodentia"]);

    let gene_b = &json[1]["tree"];
    assert_eq!(gene_b["name"], "Bacteria");
    assert_eq!(gene_b["children"][0]["name"], "Proteobacteria");
    assert_eq!(gene_b["children"][0]["children"][0]["name"], "Escherichia coli");
    assert!(gene_b["children"][0]["children"][0].get("children").is_none());
}

#[test]
fn missing_input_aborts_before_searching() {
    let dir = tempfile::tempdir().unwrap();
    let taxdb = dir.path().join("taxDB");
    fs::write(&taxdb, TAXDB).unwrap();
    let out = dir.path().join("out");

    let err = run_pipeline_with(
        Box::new(CannedHits),
        &dir.path().join("nope.fasta"),
        &taxdb,
        &out,
        9606,
        &config(3),
    )
    .err()
    .unwrap();
    assert!(matches!(err, PipelineError::InputNotFound(_)));
    assert!(!out.join("blastResults.bl").exists());
}
