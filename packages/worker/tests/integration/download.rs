use std::path::PathBuf;

use common::JobState;
use common::job::ExportFormat;
use common::motion::JsonlGzDecoder;
use serde_json::Value;

use crate::support::{FIRST_TS, TestWorker, download_job, motion_bytes, zip_entries};

const NAME: &str = "202501151030.bin";

fn zip_path(result: &Value) -> PathBuf {
    PathBuf::from(result["zip_file_path"].as_str().expect("zip path"))
}

#[tokio::test]
async fn csv_archive_lists_failed_items_in_manifest() {
    let t = TestWorker::spawn().await;
    let record = t.upload(NAME, &motion_bytes(FIRST_TS, 2)).await;

    let job = t.run(download_job(vec![record.id, 999], ExportFormat::Csv)).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress, 100);
    let result = job.result.unwrap();
    assert_eq!(result["type"], "batch-download");
    assert_eq!(result["success_files"][0]["filename"], "202501151030.csv");
    assert_eq!(result["errors"][0]["id"], 999);

    let path = zip_path(&result);
    assert!(path.starts_with(t.results_dir()));
    assert_eq!(result["size"], std::fs::metadata(&path).unwrap().len());

    let entries = zip_entries(&path);
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["202501151030.csv", "errors.json"]);

    let csv = String::from_utf8(entries[0].1.clone()).unwrap();
    assert!(csv.starts_with("\u{feff}ulint_data,real_data_0,real_data_1,"));
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("20250115103000000,0.5,0.0,"));
    assert!(lines[2].starts_with("20250115103000001,1.5,0.0,"));

    let manifest: Value = serde_json::from_slice(&entries[1].1).unwrap();
    assert_eq!(manifest["successCount"], 1);
    assert_eq!(manifest["totalCount"], 2);
    assert_eq!(manifest["errors"][0]["kind"], "not_found");
}

#[tokio::test]
async fn jsonl_archive_copies_parsed_artifact() {
    let t = TestWorker::spawn().await;
    let record = t.upload(NAME, &motion_bytes(FIRST_TS, 3)).await;

    let job = t.run(download_job(vec![record.id], ExportFormat::Jsonl)).await;

    assert_eq!(job.state, JobState::Completed);
    let result = job.result.unwrap();
    assert!(result.get("errors").is_none());

    let entries = zip_entries(&zip_path(&result));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "202501151030.jsonl.gz");

    let mut decoder = JsonlGzDecoder::new();
    let mut rows = decoder.push(&entries[0].1).unwrap();
    rows.extend(decoder.finish().unwrap());
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["ulint_data"], "20250115103000000");
    assert_eq!(rows[2]["uint_data"], 7);
}

#[tokio::test]
async fn nothing_exportable_fails_job_without_archive() {
    let t = TestWorker::spawn().await;
    let pending = t.register(NAME, 1).await;

    let job = t.run(download_job(vec![pending.id, 999], ExportFormat::Csv)).await;

    assert_eq!(job.state, JobState::Failed);
    assert!(job.error_message.is_some());
    let result = job.result.unwrap();
    assert_eq!(result["type"], "failed");
    let kinds: Vec<&str> = result["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["not_ready", "not_found"]);

    let mut leftovers = tokio::fs::read_dir(t.results_dir()).await.unwrap();
    assert!(leftovers.next_entry().await.unwrap().is_none());
}
