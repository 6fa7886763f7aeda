use common::MotionDataStatus;
use common::entity::motion_data_file;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;

use crate::support::{DEVICE, FIRST_TS, TestApp, first_ms, motion_bytes, routes};

const NAME: &str = "202501151030.bin";

mod upload {
    use super::*;

    #[tokio::test]
    async fn upload_is_transcoded_by_worker() {
        let app = TestApp::spawn().await;

        let res = app.upload(Some(DEVICE), &[(NAME, motion_bytes(FIRST_TS, 3))]).await;
        assert_eq!(res.status, 202, "{}", res.text);
        assert_eq!(res.body["device_id"], DEVICE);
        assert_eq!(res.body["files"][0]["filename"], NAME);
        assert_eq!(res.body["files"][0]["revision"], 1);
        assert_eq!(res.body["files"][0]["size_bytes"], 2772);

        let job_id = res.body["job_id"].as_str().unwrap();
        let job = app.wait_for_job(job_id).await;
        assert_eq!(job["state"], "completed");
        assert_eq!(job["job_type"], "batch-upload");
        assert_eq!(job["progress"], 100);
        assert_eq!(job["user_id"], 7);
        assert_eq!(job["result"]["files"][0]["total_frames"], 3);

        let id = res.body["files"][0]["id"].as_i64().unwrap();
        let file = app.get(&routes::file(id)).await;
        assert_eq!(file.status, 200);
        assert_eq!(file.body["status"], "completed");
        assert_eq!(file.body["total_frames"], 3);
        assert_eq!(file.body["ts_first"], 20250115103000000_i64);
        assert_eq!(file.body["ts_last"], 20250115103000002_i64);
        assert_eq!(file.body["file_time_token"], "202501151030");
        assert_eq!(file.body["uploader_id"], 7);
        assert_eq!(file.body["has_parsed"], true);
        assert_eq!(file.body["retryable"], false);
    }

    #[tokio::test]
    async fn re_upload_bumps_revision_on_same_record() {
        let app = TestApp::spawn().await;
        let first = app.upload_and_wait(NAME, motion_bytes(FIRST_TS, 2)).await;

        let res = app.upload(Some(DEVICE), &[(NAME, motion_bytes(FIRST_TS, 4))]).await;
        assert_eq!(res.status, 202);
        assert_eq!(res.body["files"][0]["id"].as_i64(), Some(first));
        assert_eq!(res.body["files"][0]["revision"], 2);
        app.wait_for_job(res.body["job_id"].as_str().unwrap()).await;

        let file = app.get(&routes::file(first)).await;
        assert_eq!(file.body["revision"], 2);
        assert_eq!(file.body["total_frames"], 4);
        assert_eq!(file.body["status"], "completed");
    }

    #[tokio::test]
    async fn invalid_file_is_marked_file_error() {
        let app = TestApp::spawn().await;

        let res = app.upload(Some(DEVICE), &[(NAME, vec![0u8; 1000])]).await;
        assert_eq!(res.status, 202);
        let job = app.wait_for_job(res.body["job_id"].as_str().unwrap()).await;
        assert_eq!(job["result"]["errors"][0]["kind"], "validation");

        let id = res.body["files"][0]["id"].as_i64().unwrap();
        let file = app.get(&routes::file(id)).await;
        assert_eq!(file.body["status"], "file_error");
        assert!(file.body["error_message"].as_str().is_some());

        let retry = app.post(&routes::retry(id)).await;
        assert_eq!(retry.status, 409);
        assert_eq!(retry.body["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn upload_requires_clean_device_id() {
        let app = TestApp::spawn().await;

        let missing = app.upload(None, &[(NAME, motion_bytes(FIRST_TS, 1))]).await;
        assert_eq!(missing.status, 400);
        assert_eq!(missing.body["code"], "VALIDATION_ERROR");

        let traversal = app.upload(Some("../etc"), &[(NAME, motion_bytes(FIRST_TS, 1))]).await;
        assert_eq!(traversal.status, 400);

        let staging = app.dir.path().join("staging");
        let leftovers = std::fs::read_dir(&staging).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn upload_rejects_too_many_files() {
        let app = TestApp::spawn().await;
        let files: Vec<(&str, Vec<u8>)> = [
            "202501151030.bin",
            "202501151031.bin",
            "202501151032.bin",
            "202501151033.bin",
            "202501151034.bin",
            "202501151035.bin",
        ]
        .into_iter()
        .map(|name| (name, motion_bytes(FIRST_TS, 1)))
        .collect();

        let res = app.upload(Some(DEVICE), &files).await;
        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }
}

mod retry {
    use super::*;

    #[tokio::test]
    async fn failed_record_is_rebuilt_from_stored_raw() {
        let app = TestApp::spawn().await;
        let id = app.upload_and_wait(NAME, motion_bytes(FIRST_TS, 3)).await;

        let record = motion_data_file::Entity::find_by_id(id as i32)
            .one(&app.db)
            .await
            .unwrap()
            .unwrap();
        let mut failed: motion_data_file::ActiveModel = record.into();
        failed.status = Set(MotionDataStatus::ProcessingFailed);
        failed.parsed_object_key = Set(None);
        failed.error_message = Set(Some("storage timeout".into()));
        failed.update(&app.db).await.unwrap();

        let file = app.get(&routes::file(id)).await;
        assert_eq!(file.body["retryable"], true);

        let res = app.post(&routes::retry(id)).await;
        assert_eq!(res.status, 202, "{}", res.text);
        let job = app.wait_for_job(res.body["job_id"].as_str().unwrap()).await;
        assert_eq!(job["state"], "completed");
        assert_eq!(job["result"]["files"][0]["revision"], 2);

        let file = app.get(&routes::file(id)).await;
        assert_eq!(file.body["status"], "completed");
        assert_eq!(file.body["revision"], 2);
        assert_eq!(file.body["has_parsed"], true);
        assert!(file.body["error_message"].is_null());
    }

    #[tokio::test]
    async fn completed_record_cannot_be_retried() {
        let app = TestApp::spawn().await;
        let id = app.upload_and_wait(NAME, motion_bytes(FIRST_TS, 1)).await;

        let res = app.post(&routes::retry(id)).await;
        assert_eq!(res.status, 409);
    }
}

mod query {
    use super::*;

    #[tokio::test]
    async fn range_is_downsampled_keeping_endpoints() {
        let app = TestApp::spawn().await;
        let id = app.upload_and_wait(NAME, motion_bytes(FIRST_TS, 300)).await;
        let start = first_ms();

        let res = app.get(&routes::query(id, start, start + 299, Some(100))).await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["matched"], 300);
        assert_eq!(res.body["max_points"], 100);
        let points = res.body["points"].as_array().unwrap();
        assert_eq!(points.len(), 100);
        assert_eq!(points[0]["time_ms"], start);
        assert_eq!(points[0]["ulint_data"], "20250115103000000");
        assert_eq!(points[99]["time_ms"], start + 299);
    }

    #[tokio::test]
    async fn narrow_range_is_returned_whole() {
        let app = TestApp::spawn().await;
        let id = app.upload_and_wait(NAME, motion_bytes(FIRST_TS, 50)).await;
        let start = first_ms();

        let res = app.get(&routes::query(id, start + 10, start + 19, None)).await;
        assert_eq!(res.body["matched"], 10);
        assert_eq!(res.body["max_points"], 2000);
        let points = res.body["points"].as_array().unwrap();
        assert_eq!(points.len(), 10);
        assert_eq!(points[0]["time_ms"], start + 10);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let app = TestApp::spawn().await;
        let id = app.upload_and_wait(NAME, motion_bytes(FIRST_TS, 2)).await;

        let res = app.get(&routes::query(id, 10, 5, None)).await;
        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn unknown_record_is_not_found() {
        let app = TestApp::spawn().await;

        let res = app.get(&routes::file(9999)).await;
        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");

        let res = app.get(&routes::query(9999, 0, 1, None)).await;
        assert_eq!(res.status, 404);
    }
}

mod preview {
    use super::*;

    #[tokio::test]
    async fn window_is_clamped_to_file_end() {
        let app = TestApp::spawn().await;
        let id = app.upload_and_wait(NAME, motion_bytes(FIRST_TS, 10)).await;

        let res = app.get(&routes::preview(id, 8, 5)).await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["total_frames"], 10);
        let frames = res.body["frames"].as_array().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["ulint_data"], "20250115103000008");
        assert_eq!(frames[0]["time_ms"], first_ms() + 8);

        let past_end = app.get(&routes::preview(id, 20, 5)).await;
        assert_eq!(past_end.status, 200);
        assert_eq!(past_end.body["frames"].as_array().unwrap().len(), 0);

        let zero = app.get(&routes::preview(id, 0, 0)).await;
        assert_eq!(zero.status, 200);
        assert_eq!(zero.body["limit"], 0);
        assert_eq!(zero.body["frames"].as_array().unwrap().len(), 0);
    }
}

mod export {
    use super::*;

    #[tokio::test]
    async fn csv_has_bom_header_and_one_row_per_frame() {
        let app = TestApp::spawn().await;
        let id = app.upload_and_wait(NAME, motion_bytes(FIRST_TS, 3)).await;

        let res = app.get_raw(&routes::export_csv(id)).await;
        assert_eq!(res.status(), 200);
        let disposition = res.headers()["content-disposition"].to_str().unwrap().to_string();
        assert!(disposition.contains("202501151030.csv"));
        assert!(res.headers()["content-type"].to_str().unwrap().starts_with("text/csv"));

        let bytes = res.bytes().await.unwrap();
        assert_eq!(&bytes[..3], b"\xEF\xBB\xBF");
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("ulint_data,"));
        assert!(lines[1].starts_with("20250115103000000,0.5,"));
    }

    #[tokio::test]
    async fn download_request_must_name_files() {
        let app = TestApp::spawn().await;

        let res = app.post_json(routes::DOWNLOAD, &json!({ "file_ids": [] })).await;
        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");

        let res = app
            .post_json(routes::DOWNLOAD, &json!({ "file_ids": [1], "format": "xml" }))
            .await;
        assert_eq!(res.status, 400);
    }
}
