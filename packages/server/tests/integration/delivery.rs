use common::storage::ContentHash;
use reqwest::Method;
use sea_orm::{ActiveModelTrait, Set, TransactionTrait};
use serde_json::json;
use server::entity::{delivery, delivery_file};

use crate::common::{FilePart, TestApp, delivery_payload, routes};

const PDF: &[u8] = b"%PDF-1.4\n%test document\n";
const CSV: &[u8] = b"time,speed\n08:30,62\n08:31,64\n";

mod create {
    use super::*;

    #[tokio::test]
    async fn json_payload_creates_a_delivery() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;

        let res = app
            .post_with_token(routes::DELIVERIES, &delivery_payload(&refs), &admin)
            .await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["vehicle_number"], "A123BC77");
        assert_eq!(res.body["distance_km"], "152.50");
        assert_eq!(res.body["travel_time"], "03:15:00");
        assert_eq!(res.body["status"], refs.status);
        assert!(res.body["file"].is_null());
        assert!(res.body["created_at"].is_string());
    }

    #[tokio::test]
    async fn creator_is_the_authenticated_user_even_if_the_payload_names_another() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let operator_id = app.create_user("ivan", "operator", "Ivan", "Petrov").await;
        let operator = app.login("ivan").await;

        let mut payload = delivery_payload(&refs);
        payload["created_by"] = json!(operator_id + 100);
        payload["created_at"] = json!("2001-01-01T00:00:00Z");

        let res = app.post_with_token(routes::DELIVERIES, &payload, &operator).await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["created_by"], operator_id);
        assert_eq!(res.body["created_by_name"], "Ivan Petrov");
        assert!(!res.body["created_at"].as_str().unwrap().starts_with("2001"));
    }

    #[tokio::test]
    async fn missing_fields_are_all_reported() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;

        let res = app
            .post_with_token(routes::DELIVERIES, &json!({"comment": "hi"}), &admin)
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
        for field in [
            "transport_model",
            "vehicle_number",
            "packaging",
            "service",
            "tech_state",
            "distance_km",
            "send_time",
            "delivery_time",
        ] {
            assert!(res.body["fields"][field].is_array(), "missing error for {field}");
        }
    }

    #[tokio::test]
    async fn nonexistent_reference_is_reported_on_its_field() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;

        let mut payload = delivery_payload(&refs);
        payload["status"] = json!(9999);

        let res = app.post_with_token(routes::DELIVERIES, &payload, &admin).await;

        assert_eq!(res.status, 400);
        assert_eq!(
            res.body["fields"]["status"][0],
            "Invalid pk \"9999\" - object does not exist."
        );
    }

    #[tokio::test]
    async fn multipart_payload_stores_attachments() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;

        let res = app
            .send_multipart(
                Method::POST,
                routes::DELIVERIES,
                &delivery_payload(&refs),
                vec![
                    FilePart::new("media_file", "photo.pdf", "application/pdf", PDF),
                    FilePart::new("log_file", "track.csv", "text/csv", CSV),
                ],
                &admin,
            )
            .await;

        assert_eq!(res.status, 201, "{}", res.text);
        let id = res.id();
        assert_eq!(res.body["media_file"]["filename"], "photo.pdf");
        assert_eq!(res.body["media_file"]["size"], PDF.len());
        assert_eq!(
            res.body["log_file"]["url"],
            routes::delivery_file(id, "log_file")
        );
        assert!(res.body["file"].is_null());
        assert_eq!(app.blob_count(), 2);
    }

    #[tokio::test]
    async fn media_file_must_be_a_pdf() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;

        let res = app
            .send_multipart(
                Method::POST,
                routes::DELIVERIES,
                &delivery_payload(&refs),
                vec![FilePart::new("media_file", "photo.jpg", "image/jpeg", b"jpeg")],
                &admin,
            )
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(
            res.body["fields"]["media_file"][0],
            "Only PDF files are allowed."
        );
        assert_eq!(app.blob_count(), 0);
    }

    #[tokio::test]
    async fn log_file_must_be_a_csv() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;

        let res = app
            .send_multipart(
                Method::POST,
                routes::DELIVERIES,
                &delivery_payload(&refs),
                vec![FilePart::new("log_file", "track.txt", "text/plain", CSV)],
                &admin,
            )
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["fields"]["log_file"][0], "Only CSV files are allowed.");
    }

    #[tokio::test]
    async fn general_file_slot_accepts_any_extension() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;

        let res = app
            .send_multipart(
                Method::POST,
                routes::DELIVERIES,
                &delivery_payload(&refs),
                vec![FilePart::new("file", "waybill.docx", "application/octet-stream", b"doc")],
                &admin,
            )
            .await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["file"]["filename"], "waybill.docx");
    }
}

mod read {
    use super::*;

    #[tokio::test]
    async fn list_is_ordered_newest_first() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let first = app.create_delivery(&refs, &admin).await;
        let second = app.create_delivery(&refs, &admin).await;
        let third = app.create_delivery(&refs, &admin).await;

        let res = app.get_with_token(routes::DELIVERIES, &admin).await;

        assert_eq!(res.status, 200);
        let rows = res.body.as_array().unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![third as i64, second as i64, first as i64]);

        let stamps: Vec<&str> = rows
            .iter()
            .map(|r| r["created_at"].as_str().unwrap())
            .collect();
        let parsed: Vec<chrono::DateTime<chrono::Utc>> =
            stamps.iter().map(|s| s.parse().unwrap()).collect();
        assert!(parsed.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn every_delivery_endpoint_requires_authentication() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let id = app.create_delivery(&refs, &admin).await;
        let payload = delivery_payload(&refs);

        let requests = [
            (Method::GET, routes::DELIVERIES.to_string()),
            (Method::POST, routes::DELIVERIES.to_string()),
            (Method::GET, routes::delivery(id)),
            (Method::PUT, routes::delivery(id)),
            (Method::PATCH, routes::delivery(id)),
            (Method::DELETE, routes::delivery(id)),
            (Method::GET, routes::delivery_file(id, "file")),
        ];
        for (method, path) in requests {
            let res = app
                .client
                .request(method.clone(), format!("http://{}{}", app.addr, path))
                .json(&payload)
                .send()
                .await
                .unwrap();
            assert_eq!(res.status().as_u16(), 401, "{method} {path}");
        }

        let still_there = app.get_with_token(&routes::delivery(id), &admin).await;
        assert_eq!(still_there.status, 200);
    }

    #[tokio::test]
    async fn missing_delivery_returns_not_found() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;

        let res = app.get_with_token(&routes::delivery(424242), &admin).await;

        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn attachment_download_honours_etag() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let created = app
            .send_multipart(
                Method::POST,
                routes::DELIVERIES,
                &delivery_payload(&refs),
                vec![FilePart::new("media_file", "photo.pdf", "application/pdf", PDF)],
                &admin,
            )
            .await;
        assert_eq!(created.status, 201, "{}", created.text);
        let path = routes::delivery_file(created.id(), "media_file");

        let res = app.get_bytes_with_token(&path, &admin).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.bytes, PDF);
        assert_eq!(res.header("content-type"), "application/pdf");
        assert!(res.header("content-disposition").contains("photo.pdf"));
        let etag = res.header("etag").to_string();
        assert!(!etag.is_empty());

        let cached = app
            .client
            .get(format!("http://{}{}", app.addr, path))
            .bearer_auth(&admin)
            .header("If-None-Match", &etag)
            .send()
            .await
            .unwrap();
        assert_eq!(cached.status().as_u16(), 304);
    }

    #[tokio::test]
    async fn empty_slot_download_returns_not_found() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let id = app.create_delivery(&refs, &admin).await;

        let empty = app
            .get_bytes_with_token(&routes::delivery_file(id, "log_file"), &admin)
            .await;
        assert_eq!(empty.status, 404);

        let unknown = app
            .get_bytes_with_token(&routes::delivery_file(id, "photo"), &admin)
            .await;
        assert_eq!(unknown.status, 404);
    }
}

mod update {
    use super::*;

    #[tokio::test]
    async fn patch_changes_only_the_given_fields_and_keeps_the_creator() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let creator_id = app.create_user("ivan", "operator", "", "").await;
        let creator = app.login("ivan").await;
        let id = app.create_delivery(&refs, &creator).await;
        let editor = app.create_user_with_role("olga", "operator").await;

        let res = app
            .patch_with_token(
                &routes::delivery(id),
                &json!({"comment": "Left at the gate", "created_by": 1}),
                &editor,
            )
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["comment"], "Left at the gate");
        assert_eq!(res.body["vehicle_number"], "A123BC77");
        assert_eq!(res.body["created_by"], creator_id);
        assert_eq!(res.body["created_by_name"], "ivan");
    }

    #[tokio::test]
    async fn patch_assigns_a_creator_to_a_record_without_one() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let id = app.create_delivery(&refs, &admin).await;
        delivery::ActiveModel {
            id: Set(id),
            created_by_id: Set(None),
            ..Default::default()
        }
        .update(&app.db)
        .await
        .unwrap();
        let editor_id = app.create_user("olga", "operator", "Olga", "Sidorova").await;
        let editor = app.login("olga").await;

        let res = app
            .patch_with_token(&routes::delivery(id), &json!({"comment": "checked"}), &editor)
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["created_by"], editor_id);
        assert_eq!(res.body["created_by_name"], "Olga Sidorova");
    }

    #[tokio::test]
    async fn put_keeps_optional_fields_it_does_not_mention() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let id = app.create_delivery(&refs, &admin).await;

        let mut payload = delivery_payload(&refs);
        let fields = payload.as_object_mut().unwrap();
        fields.remove("travel_time");
        fields.remove("comment");
        fields.insert("vehicle_number".into(), json!("B777OP99"));

        let res = app.put_with_token(&routes::delivery(id), &payload, &admin).await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["vehicle_number"], "B777OP99");
        assert_eq!(res.body["travel_time"], "03:15:00");
        assert_eq!(res.body["comment"], "Fragile");
    }

    #[tokio::test]
    async fn put_requires_every_mandatory_field() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let id = app.create_delivery(&refs, &admin).await;

        let res = app
            .put_with_token(&routes::delivery(id), &json!({"comment": "x"}), &admin)
            .await;

        assert_eq!(res.status, 400);
        assert!(res.body["fields"]["vehicle_number"].is_array());
    }

    #[tokio::test]
    async fn put_replaces_the_record() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let id = app.create_delivery(&refs, &admin).await;

        let mut payload = delivery_payload(&refs);
        payload["vehicle_number"] = json!("B777OP99");
        payload["distance_km"] = json!(10);
        payload["travel_time"] = json!(null);

        let res = app.put_with_token(&routes::delivery(id), &payload, &admin).await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["vehicle_number"], "B777OP99");
        assert_eq!(res.body["distance_km"], "10.00");
        assert!(res.body["travel_time"].is_null());
    }

    #[tokio::test]
    async fn update_of_a_missing_delivery_returns_not_found() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;

        let res = app
            .patch_with_token(&routes::delivery(31337), &json!({"comment": "x"}), &admin)
            .await;

        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn replacing_an_attachment_discards_the_old_blob() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let created = app
            .send_multipart(
                Method::POST,
                routes::DELIVERIES,
                &delivery_payload(&refs),
                vec![FilePart::new("log_file", "day1.csv", "text/csv", CSV)],
                &admin,
            )
            .await;
        assert_eq!(created.status, 201, "{}", created.text);
        let id = created.id();

        let res = app
            .send_multipart(
                Method::PATCH,
                &routes::delivery(id),
                &json!({}),
                vec![FilePart::new("log_file", "day2.csv", "text/csv", b"time\n09:00\n")],
                &admin,
            )
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["log_file"]["filename"], "day2.csv");
        assert_eq!(app.blob_count(), 1);
    }

    #[tokio::test]
    async fn null_clears_an_attachment() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let created = app
            .send_multipart(
                Method::POST,
                routes::DELIVERIES,
                &delivery_payload(&refs),
                vec![FilePart::new("media_file", "photo.pdf", "application/pdf", PDF)],
                &admin,
            )
            .await;
        let id = created.id();

        let res = app
            .patch_with_token(&routes::delivery(id), &json!({"media_file": null}), &admin)
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert!(res.body["media_file"].is_null());
        assert_eq!(app.blob_count(), 0);
    }
}

mod delete {
    use super::*;

    #[tokio::test]
    async fn delete_removes_the_record_and_its_files() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let created = app
            .send_multipart(
                Method::POST,
                routes::DELIVERIES,
                &delivery_payload(&refs),
                vec![FilePart::new("file", "waybill.txt", "text/plain", b"waybill")],
                &admin,
            )
            .await;
        let id = created.id();

        let res = app.delete_with_token(&routes::delivery(id), &admin).await;
        assert_eq!(res.status, 204);

        let gone = app.get_with_token(&routes::delivery(id), &admin).await;
        assert_eq!(gone.status, 404);
        assert_eq!(app.blob_count(), 0);
    }

    #[tokio::test]
    async fn blob_survives_cleanup_while_an_open_transaction_references_it() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let created = app
            .send_multipart(
                Method::POST,
                routes::DELIVERIES,
                &delivery_payload(&refs),
                vec![FilePart::new("log_file", "track.csv", "text/csv", CSV)],
                &admin,
            )
            .await;
        assert_eq!(created.status, 201, "{}", created.text);
        let old_id = created.id();
        let new_id = app.create_delivery(&refs, &admin).await;
        let hash = ContentHash::compute(CSV);

        // An upload of the same bytes is in flight for another delivery.
        let txn = app.db.begin().await.unwrap();
        server::attachments::pin_blob(&txn, &hash).await.unwrap();
        delivery_file::ActiveModel {
            id: Set(uuid::Uuid::now_v7()),
            delivery_id: Set(new_id),
            slot: Set("log_file".into()),
            content_hash: Set(hash.to_hex()),
            filename: Set("track.csv".into()),
            content_type: Set("text/csv".into()),
            size: Set(CSV.len() as i64),
            created_at: Set(chrono::Utc::now()),
        }
        .insert(&txn)
        .await
        .unwrap();

        let client = app.client.clone();
        let url = format!("http://{}{}", app.addr, routes::delivery(old_id));
        let token = admin.clone();
        let delete = tokio::spawn(async move {
            client.delete(url).bearer_auth(token).send().await.unwrap().status().as_u16()
        });
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(!delete.is_finished(), "cleanup must wait for the open transaction");

        txn.commit().await.unwrap();
        assert_eq!(delete.await.unwrap(), 204);

        assert_eq!(app.blob_count(), 1);
        let res = app
            .get_bytes_with_token(&routes::delivery_file(new_id, "log_file"), &admin)
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(res.bytes, CSV);
    }

    #[tokio::test]
    async fn shared_content_survives_until_the_last_reference_is_gone() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token().await;
        let refs = app.seed_references(&admin).await;
        let mut ids = Vec::new();
        for _ in 0..2 {
            let res = app
                .send_multipart(
                    Method::POST,
                    routes::DELIVERIES,
                    &delivery_payload(&refs),
                    vec![FilePart::new("log_file", "track.csv", "text/csv", CSV)],
                    &admin,
                )
                .await;
            assert_eq!(res.status, 201, "{}", res.text);
            ids.push(res.id());
        }
        assert_eq!(app.blob_count(), 1);

        app.delete_with_token(&routes::delivery(ids[0]), &admin).await;
        assert_eq!(app.blob_count(), 1);

        let res = app
            .get_bytes_with_token(&routes::delivery_file(ids[1], "log_file"), &admin)
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(res.bytes, CSV);

        app.delete_with_token(&routes::delivery(ids[1]), &admin).await;
        assert_eq!(app.blob_count(), 0);
    }
}
