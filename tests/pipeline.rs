mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use fragment_annotator::dispatcher::{DispatchOptions, FragmentDispatcher};
use fragment_annotator::domain::{Fragment, TaxId};
use fragment_annotator::error::AnnotateError;
use fragment_annotator::store::{RecordStore, SqliteConnector, StoreConnector};
use fragment_annotator::worker::AnnotationWorker;

use common::{ECOLI_LINEAGE, MockSearch, MockTaxonomy, assert_parents_present};

fn options(concurrency: usize) -> DispatchOptions {
    DispatchOptions {
        concurrency,
        launch_interval: Duration::ZERO,
        ..DispatchOptions::default()
    }
}

fn dispatcher(
    search: MockSearch,
    taxonomy: MockTaxonomy,
    connector: SqliteConnector,
    options: DispatchOptions,
) -> (
    Arc<MockSearch>,
    Arc<MockTaxonomy>,
    FragmentDispatcher<MockSearch, MockTaxonomy, SqliteConnector>,
) {
    let search = Arc::new(search);
    let taxonomy = Arc::new(taxonomy);
    let worker = AnnotationWorker::new(
        Arc::clone(&search),
        Arc::clone(&taxonomy),
        Arc::new(connector),
    );
    let dispatcher = FragmentDispatcher::new(worker, options).unwrap();
    (search, taxonomy, dispatcher)
}

#[test]
fn single_line_is_annotated_end_to_end() {
    let (_dir, connector) = common::temp_connector();
    let search = MockSearch::default()
        .with("ACGTTGCA", common::fixture("blastx_hits.xml"))
        .with("TTGACCAA", common::fixture("blastx_no_hits.xml"));
    let taxonomy = MockTaxonomy::default().with("Escherichia coli", ECOLI_LINEAGE);
    let (_, _, dispatcher) = dispatcher(search, taxonomy, connector.clone(), options(2));

    let input = "@read1/1;ACGTTGCA;IIIIHHHH;@read1/2;TTGACCAA;########\n";
    let summary = dispatcher.run(input.as_bytes()).unwrap();
    assert_eq!(summary.lines, 1);
    assert_eq!(summary.launched, 2);
    assert_eq!(summary.annotated, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.alignments, 2);
    assert_eq!(summary.unresolved_taxa, 1);

    let store = connector.connect().unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.fragments, 2);
    assert_eq!(stats.taxa, ECOLI_LINEAGE.len() as u64);
    assert_eq!(stats.proteins, 2);
    assert_eq!(stats.alignments, 2);
    assert_eq!(store.alignment_count_for("@read1/1").unwrap(), 2);
    assert_eq!(store.alignment_count_for("@read1/2").unwrap(), 0);

    let rpob = store.protein("WP_000123456").unwrap().unwrap();
    assert_eq!(rpob.tax_id, Some(TaxId::new(562)));
    assert_eq!(rpob.name, "DNA-directed RNA polymerase subunit beta");
    let hypothetical = store.protein("KAF1234567").unwrap().unwrap();
    assert_eq!(hypothetical.tax_id, None);
}

#[test]
fn failed_search_does_not_stop_the_run() {
    let (_dir, connector) = common::temp_connector();
    let search = MockSearch::default().with(
        "GGGCCC",
        common::blast_document(&[("WP_1", "ribosomal protein L2 [Escherichia coli]")]),
    );
    let taxonomy = MockTaxonomy::default().with("Escherichia coli", ECOLI_LINEAGE);
    let (search, _, dispatcher) = dispatcher(search, taxonomy, connector.clone(), options(1));

    let input = "@bad/1;AAAAAA;IIIIII;@good/2;GGGCCC;IIIIII\n";
    let summary = dispatcher.run(input.as_bytes()).unwrap();
    assert_eq!(summary.launched, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.annotated, 1);
    assert_eq!(search.searched().len(), 2);

    let store = connector.connect().unwrap();
    let headers = store.fragment_headers().unwrap();
    assert!(headers.contains("@good/2"));
    assert!(!headers.contains("@bad/1"));
    assert_eq!(store.alignment_count_for("@good/2").unwrap(), 1);
}

#[test]
fn stored_headers_are_not_searched_again() {
    let (_dir, connector) = common::temp_connector();
    connector
        .connect()
        .unwrap()
        .insert_fragment(&Fragment::new("@seen", "CCCC", "IIII").unwrap())
        .unwrap();
    let search = MockSearch::default()
        .with("CCCC", common::blast_document(&[]))
        .with("GGGG", common::blast_document(&[]));
    let (search, _, dispatcher) =
        dispatcher(search, MockTaxonomy::default(), connector, options(1));

    let input = "@seen;CCCC;IIII;@fresh;GGGG;IIII\n";
    let summary = dispatcher.run(input.as_bytes()).unwrap();
    assert_eq!(summary.fragments, 2);
    assert_eq!(summary.skipped_duplicates, 1);
    assert_eq!(summary.launched, 1);
    assert_eq!(search.searched(), vec!["GGGG".to_string()]);
}

#[test]
fn repeated_header_in_one_run_is_launched_once() {
    let (_dir, connector) = common::temp_connector();
    let search = MockSearch::default().with("GGGG", common::blast_document(&[]));
    let (search, _, dispatcher) =
        dispatcher(search, MockTaxonomy::default(), connector, options(2));

    let input = "@dup;GGGG;IIII;@dup;GGGG;IIII\n";
    let summary = dispatcher.run(input.as_bytes()).unwrap();
    assert_eq!(summary.launched, 1);
    assert_eq!(summary.skipped_duplicates, 1);
    assert_eq!(search.searched().len(), 1);
}

#[test]
fn allow_duplicates_searches_known_headers() {
    let (_dir, connector) = common::temp_connector();
    connector
        .connect()
        .unwrap()
        .insert_fragment(&Fragment::new("@seen", "CCCC", "IIII").unwrap())
        .unwrap();
    let search = MockSearch::default().with(
        "CCCC",
        common::blast_document(&[("WP_7", "chaperone [Escherichia coli]")]),
    );
    let taxonomy = MockTaxonomy::default().with("Escherichia coli", ECOLI_LINEAGE);
    let (_, _, dispatcher) = dispatcher(
        search,
        taxonomy,
        connector.clone(),
        DispatchOptions {
            allow_duplicates: true,
            ..options(1)
        },
    );

    let input = "@seen;CCCC;IIII;@seen;CCCC;IIII\n";
    let summary = dispatcher.run(input.as_bytes()).unwrap();
    assert_eq!(summary.launched, 2);
    assert_eq!(summary.annotated, 2);

    let store = connector.connect().unwrap();
    assert_eq!(store.stats().unwrap().fragments, 1);
    assert_eq!(store.alignment_count_for("@seen").unwrap(), 2);
    assert_eq!(store.stats().unwrap().proteins, 1);
}

#[test]
fn launches_are_spaced_by_the_interval() {
    let (_dir, connector) = common::temp_connector();
    let search = MockSearch::default().with("GGGG", common::blast_document(&[]));
    let interval = Duration::from_millis(40);
    let (search, _, dispatcher) = dispatcher(
        search,
        MockTaxonomy::default(),
        connector,
        DispatchOptions {
            launch_interval: interval,
            ..options(4)
        },
    );

    let input = (0..3)
        .map(|i| format!("@r{i}/1;GGGG;IIII;@r{i}/2;GGGG;IIII\n"))
        .collect::<String>();
    let start = Instant::now();
    let summary = dispatcher.run(input.as_bytes()).unwrap();
    assert_eq!(summary.launched, 6);
    assert_eq!(search.searched().len(), 6);
    assert!(start.elapsed() >= interval * 5);
}

#[test]
fn unknown_organism_leaves_protein_without_taxon() {
    let (_dir, connector) = common::temp_connector();
    let search = MockSearch::default().with(
        "ATATAT",
        common::blast_document(&[
            ("WP_2", "transporter [Unculturable organism]"),
            ("WP_3", "ribosomal protein S7 [Escherichia coli]"),
        ]),
    );
    let taxonomy = MockTaxonomy::default().with("Escherichia coli", ECOLI_LINEAGE);
    let (_, taxonomy, dispatcher) = dispatcher(search, taxonomy, connector.clone(), options(1));

    let input = "@u/1;ATATAT;IIIIII;@u/2;ATATAT;IIIIII\n";
    let summary = dispatcher.run(input.as_bytes()).unwrap();
    assert_eq!(summary.annotated, 2);
    assert_eq!(summary.alignments, 4);
    assert_eq!(summary.unresolved_taxa, 2);
    assert_eq!(taxonomy.calls(), 4);

    let store = connector.connect().unwrap();
    assert_eq!(store.protein("WP_2").unwrap().unwrap().tax_id, None);
    assert_eq!(
        store.protein("WP_3").unwrap().unwrap().tax_id,
        Some(TaxId::new(562))
    );
}

#[test]
fn malformed_lines_are_skipped() {
    let (_dir, connector) = common::temp_connector();
    let search = MockSearch::default().with("GGGG", common::blast_document(&[]));
    let (_, _, dispatcher) = dispatcher(search, MockTaxonomy::default(), connector, options(1));

    let input = "@a/1;GGGG;IIII;@a/2;GGGG;IIII\nnot;a;pair\n@b/1;GGGG;IIII;@b/2;GGGG;IIII\n";
    let summary = dispatcher.run(input.as_bytes()).unwrap();
    assert_eq!(summary.lines, 3);
    assert_eq!(summary.malformed_lines, 1);
    assert_eq!(summary.launched, 4);
}

#[test]
fn undecodable_line_is_skipped_and_run_continues() {
    let (_dir, connector) = common::temp_connector();
    let search = MockSearch::default()
        .with("GGGG", common::blast_document(&[]))
        .with("CCCC", common::blast_document(&[]));
    let (search, _, dispatcher) = dispatcher(search, MockTaxonomy::default(), connector, options(1));

    let mut input = b"@a/1;GGGG;IIII;@a/2;GGGG;IIII\n@b/1;GG".to_vec();
    input.push(0xff);
    input.extend_from_slice(b"GG;IIII;@b/2;GGGG;IIII\n@c/1;CCCC;IIII;@c/2;CCCC;IIII\n");
    let summary = dispatcher.run(input.as_slice()).unwrap();
    assert_eq!(summary.lines, 3);
    assert_eq!(summary.malformed_lines, 1);
    assert_eq!(summary.launched, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        search.searched().iter().filter(|sequence| *sequence == "CCCC").count(),
        2
    );
}

#[test]
fn empty_read_does_not_drop_its_sibling() {
    let (_dir, connector) = common::temp_connector();
    let search = MockSearch::default().with("GGGG", common::blast_document(&[]));
    let (search, _, dispatcher) =
        dispatcher(search, MockTaxonomy::default(), connector.clone(), options(1));

    let summary = dispatcher.run("@a/1;;IIII;@a/2;GGGG;IIII\n".as_bytes()).unwrap();
    assert_eq!(summary.malformed_lines, 0);
    assert_eq!(summary.invalid_fragments, 1);
    assert_eq!(summary.launched, 1);
    assert_eq!(search.searched(), vec!["GGGG".to_string()]);
    assert!(connector.connect().unwrap().fragment_headers().unwrap().contains("@a/2"));
}

#[test]
fn concurrent_workers_share_one_lineage() {
    let (_dir, connector) = common::temp_connector();
    let search = MockSearch::default().with(
        "ACGTACGT",
        common::blast_document(&[
            ("WP_10", "elongation factor Tu [Escherichia coli]"),
            ("WP_11", "outer membrane protein A [Escherichia coli]"),
        ]),
    );
    let taxonomy = MockTaxonomy::default().with("Escherichia coli", ECOLI_LINEAGE);
    let (_, _, dispatcher) = dispatcher(
        search,
        taxonomy,
        connector.clone(),
        DispatchOptions {
            allow_duplicates: true,
            ..options(8)
        },
    );

    let input = (0..4)
        .map(|i| format!("@c{i}/1;ACGTACGT;IIII;@c{i}/2;ACGTACGT;IIII\n"))
        .collect::<String>();
    let summary = dispatcher.run(input.as_bytes()).unwrap();
    assert_eq!(summary.launched, 8);
    assert_eq!(summary.annotated, 8);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.unresolved_taxa, 0);
    assert_eq!(summary.alignments, 16);

    let store = connector.connect().unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.taxa, ECOLI_LINEAGE.len() as u64);
    assert_eq!(stats.proteins, 2);
    assert_eq!(stats.alignments, 16);
    assert_parents_present(&store);
}

#[test]
fn zero_concurrency_is_rejected() {
    let (_dir, connector) = common::temp_connector();
    let worker = AnnotationWorker::new(
        Arc::new(MockSearch::default()),
        Arc::new(MockTaxonomy::default()),
        Arc::new(connector),
    );
    assert_matches!(
        FragmentDispatcher::new(worker, options(0)).err(),
        Some(AnnotateError::InvalidConfig(_))
    );
}

#[test]
fn worker_appends_alignments_on_repeat() {
    let (_dir, connector) = common::temp_connector();
    let search = MockSearch::default().with(
        "CCCC",
        common::blast_document(&[("WP_7", "chaperone [Escherichia coli]")]),
    );
    let taxonomy = MockTaxonomy::default().with("Escherichia coli", ECOLI_LINEAGE);
    let connector = Arc::new(connector);
    let worker = AnnotationWorker::new(Arc::new(search), Arc::new(taxonomy), Arc::clone(&connector));
    let fragment = Fragment::new("@w", "CCCC", "IIII").unwrap();

    let first = worker.annotate(&fragment).unwrap();
    assert!(first.fragment_inserted);
    assert_eq!(first.alignments, 1);
    let second = worker.annotate(&fragment).unwrap();
    assert!(!second.fragment_inserted);

    let store = connector.connect().unwrap();
    assert_eq!(store.alignment_count_for("@w").unwrap(), 2);
    assert_eq!(store.stats().unwrap().taxa, ECOLI_LINEAGE.len() as u64);
}

#[test]
fn search_failure_is_reported_by_worker() {
    let (_dir, connector) = common::temp_connector();
    let worker = AnnotationWorker::new(
        Arc::new(MockSearch::default()),
        Arc::new(MockTaxonomy::default()),
        Arc::new(connector),
    );
    let err = worker
        .annotate(&Fragment::new("@x", "AAAA", "IIII").unwrap())
        .unwrap_err();
    assert!(err.is_search_failure());
}
