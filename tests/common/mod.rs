#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use fragment_annotator::blast::{SearchParams, SearchService};
use fragment_annotator::domain::LineageNode;
use fragment_annotator::error::AnnotateError;
use fragment_annotator::store::{RecordStore, SqliteConnector, SqliteStore};
use fragment_annotator::taxonomy::TaxonomySource;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> String {
    fs::read_to_string(fixture_path(name)).unwrap()
}

pub fn temp_connector() -> (TempDir, SqliteConnector) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("annotations.sqlite")).unwrap();
    (dir, SqliteConnector::new(path))
}

/// Every stored taxon with a parent must have that parent stored too.
pub fn assert_parents_present(store: &SqliteStore) {
    for tax_id in store.taxon_ids().unwrap() {
        let taxon = store.taxon(tax_id).unwrap().unwrap();
        if let Some(parent) = taxon.parent_tax_id {
            assert!(
                store.taxon(parent).unwrap().is_some(),
                "taxon {tax_id} has no stored parent {parent}"
            );
        }
    }
}

/// Canned BLAST documents keyed by query sequence. Unknown sequences fail.
#[derive(Default)]
pub struct MockSearch {
    documents: HashMap<String, String>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl MockSearch {
    pub fn with(mut self, sequence: &str, document: String) -> Self {
        self.documents.insert(sequence.to_string(), document);
        self
    }

    pub fn searched(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(sequence, _)| sequence.clone())
            .collect()
    }
}

impl SearchService for MockSearch {
    fn search(&self, sequence: &str, _params: &SearchParams) -> Result<String, AnnotateError> {
        self.calls
            .lock()
            .unwrap()
            .push((sequence.to_string(), Instant::now()));
        self.documents
            .get(sequence)
            .cloned()
            .ok_or_else(|| AnnotateError::SearchFailed(format!("no canned result for {sequence}")))
    }
}

#[derive(Default)]
pub struct MockTaxonomy {
    lineages: HashMap<String, Vec<LineageNode>>,
    calls: AtomicUsize,
}

impl MockTaxonomy {
    pub fn with(mut self, organism: &str, lineage: &[(i64, &str)]) -> Self {
        self.lineages.insert(
            organism.to_string(),
            lineage
                .iter()
                .map(|(tax_id, name)| LineageNode::new(*tax_id, name))
                .collect(),
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TaxonomySource for MockTaxonomy {
    fn lineage(&self, organism_name: &str) -> Result<Vec<LineageNode>, AnnotateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.lineages
            .get(organism_name)
            .cloned()
            .ok_or_else(|| AnnotateError::UnknownOrganism(organism_name.to_string()))
    }
}

pub const ECOLI_LINEAGE: &[(i64, &str)] = &[
    (131567, "cellular organisms"),
    (2, "Bacteria"),
    (1224, "Pseudomonadota"),
    (1236, "Gammaproteobacteria"),
    (91347, "Enterobacterales"),
    (543, "Enterobacteriaceae"),
    (561, "Escherichia"),
    (562, "Escherichia coli"),
];

/// Minimal BLAST XML with one HSP per `(accession, definition)` hit.
pub fn blast_document(hits: &[(&str, &str)]) -> String {
    let hits = hits
        .iter()
        .map(|(accession, definition)| {
            format!(
                "<Hit><Hit_def>{definition}</Hit_def><Hit_accession>{accession}</Hit_accession>\
                 <Hit_hsps><Hsp><Hsp_score>120</Hsp_score><Hsp_evalue>1e-10</Hsp_evalue>\
                 <Hsp_identity>40</Hsp_identity><Hsp_positive>45</Hsp_positive>\
                 </Hsp></Hit_hsps></Hit>"
            )
        })
        .collect::<String>();
    format!(
        "<?xml version=\"1.0\"?>\n<BlastOutput><BlastOutput_iterations><Iteration>\
         <Iteration_hits>{hits}</Iteration_hits></Iteration></BlastOutput_iterations></BlastOutput>"
    )
}
