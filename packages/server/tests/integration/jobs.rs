use serde_json::json;

use crate::support::{FIRST_TS, TestApp, motion_bytes, routes, zip_entries};

#[tokio::test]
async fn download_archives_ready_files_and_lists_failures() {
    let app = TestApp::spawn().await;
    let a = app.upload_and_wait("202501151030.bin", motion_bytes(FIRST_TS, 3)).await;
    let b = app
        .upload_and_wait("202501151031.bin", motion_bytes(FIRST_TS + 100_000, 2))
        .await;

    let res = app
        .post_json(routes::DOWNLOAD, &json!({ "file_ids": [a, b, 9999, a] }))
        .await;
    assert_eq!(res.status, 202, "{}", res.text);
    let job_id = res.body["job_id"].as_str().unwrap().to_string();

    let job = app.wait_for_job(&job_id).await;
    assert_eq!(job["state"], "completed");
    assert_eq!(job["job_type"], "batch-download");
    assert_eq!(job["download_url"], routes::job_download(&job_id));
    assert_eq!(job["result"]["success_files"].as_array().unwrap().len(), 2);
    assert_eq!(job["result"]["errors"][0]["id"], 9999);
    assert!(job["result"].get("zip_file_path").is_none());

    let archive = app.get_raw(&routes::job_download(&job_id)).await;
    assert_eq!(archive.status(), 200);
    assert_eq!(archive.headers()["content-type"], "application/zip");
    let bytes = archive.bytes().await.unwrap();

    let entries = zip_entries(&bytes);
    let names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["202501151030.csv", "202501151031.csv", "errors.json"]);

    let first_csv = String::from_utf8_lossy(&entries[0].1);
    assert_eq!(first_csv.trim_start_matches('\u{feff}').lines().count(), 4);

    let manifest: serde_json::Value = serde_json::from_slice(&entries[2].1).unwrap();
    assert_eq!(manifest["successCount"], 2);
    assert_eq!(manifest["totalCount"], 3);
}

#[tokio::test]
async fn download_of_only_missing_files_fails_without_archive() {
    let app = TestApp::spawn().await;

    let res = app
        .post_json(routes::DOWNLOAD, &json!({ "file_ids": [4040, 4041] }))
        .await;
    assert_eq!(res.status, 202);
    let job_id = res.body["job_id"].as_str().unwrap().to_string();

    let job = app.wait_for_job(&job_id).await;
    assert_eq!(job["state"], "failed");
    assert!(job["download_url"].is_null());
    assert_eq!(job["result"]["errors"].as_array().unwrap().len(), 2);

    let archive = app.get(&routes::job_download(&job_id)).await;
    assert_eq!(archive.status, 409);
    assert_eq!(archive.body["code"], "CONFLICT");
}

#[tokio::test]
async fn upload_job_has_no_archive() {
    let app = TestApp::spawn().await;
    let res = app
        .upload(Some(crate::support::DEVICE), &[("202501151030.bin", motion_bytes(FIRST_TS, 1))])
        .await;
    let job_id = res.body["job_id"].as_str().unwrap().to_string();
    app.wait_for_job(&job_id).await;

    let archive = app.get(&routes::job_download(&job_id)).await;
    assert_eq!(archive.status, 404);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let app = TestApp::spawn().await;

    let res = app.get(&routes::job("no-such-job")).await;
    assert_eq!(res.status, 404);
    assert_eq!(res.body["code"], "NOT_FOUND");

    let res = app.get(&routes::job_events("no-such-job")).await;
    assert_eq!(res.status, 404);
}

#[tokio::test]
async fn events_of_finished_job_end_after_current_state() {
    let app = TestApp::spawn().await;
    let res = app
        .upload(Some(crate::support::DEVICE), &[("202501151030.bin", motion_bytes(FIRST_TS, 2))])
        .await;
    let job_id = res.body["job_id"].as_str().unwrap().to_string();
    app.wait_for_job(&job_id).await;

    let stream = app.get_raw(&routes::job_events(&job_id)).await;
    assert_eq!(stream.status(), 200);
    assert!(
        stream.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let body = tokio::time::timeout(std::time::Duration::from_secs(5), stream.text())
        .await
        .expect("stream should close once the job is finished")
        .unwrap();
    assert!(body.contains("event: progress"));
    assert!(body.contains("\"state\":\"completed\""));
    assert!(body.contains("\"progress\":100"));
}

#[tokio::test]
async fn job_list_shows_callers_jobs_newest_first() {
    let app = TestApp::spawn().await;
    let first = app
        .upload(Some(crate::support::DEVICE), &[("202501151030.bin", motion_bytes(FIRST_TS, 1))])
        .await;
    let first_id = first.body["job_id"].as_str().unwrap().to_string();
    app.wait_for_job(&first_id).await;
    let second = app
        .upload(Some(crate::support::DEVICE), &[("202501151031.bin", motion_bytes(FIRST_TS + 100_000, 1))])
        .await;
    let second_id = second.body["job_id"].as_str().unwrap().to_string();
    app.wait_for_job(&second_id).await;

    let res = app.get_as(routes::JOBS, "7").await;
    assert_eq!(res.status, 200, "{}", res.text);
    let jobs = res.body.as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["id"], second_id.as_str());
    assert_eq!(jobs[1]["id"], first_id.as_str());
    assert!(jobs.iter().all(|j| j["state"] == "completed" && j["progress"] == 100));
    assert!(jobs.iter().all(|j| j["user_id"] == 7));

    let limited = app.get_as(&format!("{}?limit=1", routes::JOBS), "7").await;
    assert_eq!(limited.body.as_array().unwrap().len(), 1);

    let other = app.get_as(routes::JOBS, "8").await;
    assert_eq!(other.status, 200);
    assert!(other.body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn job_list_requires_user_id() {
    let app = TestApp::spawn().await;

    let missing = app.get(routes::JOBS).await;
    assert_eq!(missing.status, 400);
    assert_eq!(missing.body["code"], "VALIDATION_ERROR");

    let garbled = app.get_as(routes::JOBS, "seven").await;
    assert_eq!(garbled.status, 400);
}
