use std::collections::HashMap;
use std::io::Write;

use mr::chunker::{chunk_bytes, is_alpha, ChunkKind};
use mr::config::CoordinatorConfig;
use mr::coordinator_node::{make_coordinator, RunSummary};
use mr::protocol::MAX_PAYLOAD;
use mr::worker_node::{map, reduce, Worker};
use mr::{Report, ReportFormat, ResultTable};
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;

const PASSAGE: &str = "It was the best of times, it was the worst of times, it was the age of \
    wisdom, it was the age of foolishness, it was the epoch of belief, it was the epoch of \
    incredulity, it was the season of Light, it was the season of Darkness. Ripe rips \
    ripen; RIP! ";

fn naive_counts(text: &[u8]) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for word in text.split(|&b| !is_alpha(b)).filter(|w| !w.is_empty()) {
        let word = String::from_utf8_lossy(word).to_ascii_lowercase();
        *counts.entry(word).or_insert(0) += 1;
    }
    counts
}

fn expected_report(text: &[u8]) -> Report {
    naive_counts(text)
        .into_iter()
        .collect::<ResultTable>()
        .into_report()
        .unwrap()
}

fn input_file(text: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text).unwrap();
    file
}

async fn spawn_workers(count: usize) -> (Vec<u16>, Vec<JoinHandle<mr::Result<()>>>) {
    let mut ports = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..count {
        let worker = Worker::bind("127.0.0.1", 0).await.unwrap();
        ports.push(worker.local_port());
        handles.push(tokio::spawn(worker.start()));
    }
    (ports, handles)
}

async fn run_with_workers(text: &[u8], workers: usize) -> (Report, RunSummary) {
    let input = input_file(text);
    let (ports, handles) = spawn_workers(workers).await;

    let config = CoordinatorConfig {
        input: input.path().to_path_buf(),
        ports,
        host: "127.0.0.1".to_string(),
        format: ReportFormat::Csv,
    };
    let outcome = make_coordinator(config).await.unwrap();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    outcome
}

fn csv(report: &Report) -> String {
    let mut out = Vec::new();
    report.write_csv(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn map_then_reduce_matches_a_single_pass_count() {
    let reduced = reduce(&map(b"the cat sat on the mat")).unwrap();
    let mut table = ResultTable::new();
    table.fold_reply(&reduced).unwrap();

    assert_eq!(table.len(), 5);
    assert_eq!(table.get("the"), Some(2));
    for word in ["cat", "sat", "on", "mat"] {
        assert_eq!(table.get(word), Some(1));
    }
}

#[test]
fn chunked_map_and_reduce_match_a_single_pass_count() {
    let text = PASSAGE.repeat(40);
    let text = text.as_bytes();

    let mut intermediate = Vec::new();
    for chunk in chunk_bytes(text, MAX_PAYLOAD, ChunkKind::Text).unwrap() {
        intermediate.extend(map(&chunk));
    }

    let mut table = ResultTable::new();
    for chunk in chunk_bytes(&intermediate, MAX_PAYLOAD, ChunkKind::Pairs).unwrap() {
        table.fold_reply(&reduce(&chunk).unwrap()).unwrap();
    }

    assert_eq!(table.into_report().unwrap(), expected_report(text));
}

#[tokio::test]
async fn distributed_count_matches_a_single_pass_count() {
    let text = PASSAGE.repeat(60);
    let (report, summary) = run_with_workers(text.as_bytes(), 3).await;

    assert_eq!(report, expected_report(text.as_bytes()));
    assert!(summary.map_tasks > 3);
    assert!(summary.max_in_flight <= 3);
    assert_eq!(report.rows()[0].word, "it");
}

#[tokio::test]
async fn report_does_not_depend_on_pool_size() {
    let text = PASSAGE.repeat(25);
    let mut reports = Vec::new();
    for workers in [1, 2, 5] {
        let (report, summary) = run_with_workers(text.as_bytes(), workers).await;
        assert!(summary.max_in_flight <= workers);
        reports.push(csv(&report));
    }

    assert_eq!(reports[0], reports[1]);
    assert_eq!(reports[1], reports[2]);
}

#[tokio::test]
async fn empty_input_reports_only_the_header() {
    let (report, summary) = run_with_workers(b"", 2).await;

    assert_eq!(summary.map_tasks, 1);
    assert_eq!(summary.reduce_tasks, 1);
    assert_eq!(csv(&report), "word,frequency\n");
}

#[tokio::test]
async fn words_shaped_like_the_shutdown_tag_are_counted() {
    let (report, _) = run_with_workers(b"rip rip ripe", 1).await;
    assert_eq!(csv(&report), "word,frequency\nrip,2\nripe,1\n");
}

#[tokio::test]
async fn words_next_to_long_numbers_are_counted() {
    let mut text = b"keepme ".to_vec();
    text.extend(std::iter::repeat(b'9').take(3 * MAX_PAYLOAD));
    text.extend_from_slice(b" tail keepme");

    let (report, _) = run_with_workers(&text, 2).await;
    assert_eq!(csv(&report), "word,frequency\nkeepme,2\ntail,1\n");
}

#[tokio::test]
async fn unreachable_worker_fails_the_run() {
    let input = input_file(b"some words");
    // Bind and drop to get a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = CoordinatorConfig {
        input: input.path().to_path_buf(),
        ports: vec![port],
        host: "127.0.0.1".to_string(),
        format: ReportFormat::Csv,
    };

    assert!(matches!(
        make_coordinator(config).await,
        Err(mr::MrError::Connect { .. })
    ));
}
