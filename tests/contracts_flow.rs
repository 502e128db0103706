mod common;

use anyhow::Result;
use axum::http::{header, StatusCode};
use common::{
    acquire_db_lock, body_to_vec, jeonse_payload, json_body, sale_payload, signature_data_url,
    TestApp,
};
use diesel::prelude::*;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::json;

#[tokio::test]
async fn jeonse_contract_is_scheduled_and_gets_placeholders() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;

    let contract = app.create_contract(&token, &jeonse_payload()).await?;
    assert_eq!(contract["type"], "JEONSE");
    assert_eq!(contract["status"], "DRAFT");
    assert_eq!(contract["form_version"], "test-form-v1");
    assert_eq!(contract["deposit"], 300_000_000);
    assert!(contract["sale_price"].is_null());
    assert_eq!(contract["contract_date"], "2026-03-02");
    assert_eq!(contract["handover_date"], "2026-05-01");
    assert_eq!(contract["schedule"]["balance_date"], "2026-05-01");
    assert_eq!(contract["computed_status"], "ACTIVE");
    assert!(contract["doc_no"]
        .as_str()
        .is_some_and(|doc_no| doc_no.starts_with("CONTRACT_20260302_")));
    assert_eq!(contract["doc_hash"].as_str().map(str::len), Some(64));
    assert!(contract["qr_payload"]
        .as_str()
        .is_some_and(|qr| qr.starts_with("CONTRACT_ID:")));

    let roles: Vec<&str> = contract["signatures"]
        .as_array()
        .map(|slots| slots.iter().filter_map(|slot| slot["role"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(roles, vec!["LESSOR", "LESSEE", "BROKER"]);

    let id = contract["id"].as_i64().unwrap_or_default();
    let response = app.get(&format!("/api/contracts/{id}/events"), Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let events = json_body(response).await?;
    assert_eq!(events[0]["event_type"], "CREATED");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn sale_contract_accepts_party_list_and_hashes_identifiers() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;

    let contract = app.create_contract(&token, &sale_payload()).await?;
    assert_eq!(contract["seller_name"], "Kim Minsu");
    assert_eq!(contract["buyer_name"], "Lee Seoyeon");
    assert_eq!(contract["property_address"], "7 Sejong-daero, Jung-gu, Seoul");
    assert_eq!(contract["sale_price"], 1_000_000_000_i64);
    assert_eq!(contract["schedule"]["contract_amount"], 100_000_000);
    assert_eq!(contract["schedule"]["middle_amount"], 400_000_000);
    assert_eq!(contract["schedule"]["balance_amount"], 500_000_000);
    assert_eq!(contract["schedule"]["middle_date"], "2026-04-01");
    assert!(!contract.to_string().contains("800101-1234567"));

    let id = contract["id"].as_i64().unwrap_or_default() as i32;
    let stored_pid: Option<String> = app
        .with_conn(move |conn| {
            use hatch_backend::schema::contracts;
            Ok(contracts::table
                .find(id)
                .select(contracts::seller_pid_hash)
                .first(conn)?)
        })
        .await?;
    assert_eq!(
        stored_pid.as_deref(),
        Some(hatch_backend::contracts::integrity::hash_identifier("800101-1234567").as_str())
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn invalid_money_fields_are_reported_per_field() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;

    let payload = json!({
        "type": "WOLSE",
        "seller_name": "Park Jiwoo",
        "seller_phone": "010-1234-5678",
        "buyer_name": "Choi Yuna",
        "buyer_phone": "not a phone",
        "property_address": "12 Teheran-ro",
        "deposit": 10_000_000,
        "sale_price": 5,
    });
    let response = app.post_json("/api/contracts", &payload, Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    assert_eq!(body["code"], "validation_error");
    assert_eq!(body["details"]["monthly_rent"], "monthly_rent is required");
    assert_eq!(
        body["details"]["sale_price"],
        "sale_price is not allowed for WOLSE contracts"
    );
    assert!(body["details"]["buyer_phone"].is_string());

    let response = app.get("/api/contracts", Some(&token)).await?;
    let listing = json_body(response).await?;
    assert_eq!(listing["total"], 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn listing_filters_by_query_and_type() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;

    app.create_contract(&token, &jeonse_payload()).await?;
    app.create_contract(&token, &sale_payload()).await?;

    let listing = json_body(app.get("/api/contracts", Some(&token)).await?).await?;
    assert_eq!(listing["total"], 2);

    let listing = json_body(app.get("/api/contracts?type=sale", Some(&token)).await?).await?;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["type"], "SALE");

    let listing = json_body(app.get("/api/contracts?q=teheran", Some(&token)).await?).await?;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["type"], "JEONSE");

    let listing =
        json_body(app.get("/api/contracts?page=2&per_page=1", Some(&token)).await?).await?;
    assert_eq!(listing["items"].as_array().map(Vec::len), Some(1));
    assert_eq!(listing["page"], 2);

    let response = app.get("/api/contracts?type=LEASE", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn signature_slot_is_filled_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;
    let contract = app.create_contract(&token, &jeonse_payload()).await?;
    let id = contract["id"].as_i64().unwrap_or_default();
    let image = signature_data_url()?;

    let response = app
        .put_json(
            &format!("/api/contracts/{id}/signatures/lessor"),
            &json!({ "image": "not base64 at all!", "auth_method": "MOBILE" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .put_json(
            &format!("/api/contracts/{id}/signatures/lessor"),
            &json!({ "image": image, "auth_method": "MOBILE", "auth_ref": "tx-001" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let signed = json_body(response).await?;
    assert_eq!(signed["signature"]["signed"], true);
    assert_eq!(signed["signature"]["auth_method"], "MOBILE");
    assert_eq!(signed["contract_completed"], false);
    let signature_id = signed["signature"]["id"].as_i64().unwrap_or_default();

    let response = app
        .put_json(
            &format!("/api/contracts/{id}/signatures/LESSOR"),
            &json!({ "image": image }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await?["code"], "already_signed");

    let response = app
        .put_json(
            &format!("/api/contracts/{id}/signatures/seller"),
            &json!({ "image": image }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get(
            &format!("/api/contracts/{id}/signatures/{signature_id}/image"),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(&b"image/png"[..])
    );
    let bytes = body_to_vec(response.into_body()).await?;
    assert!(bytes.starts_with(b"\x89PNG"));
    assert_eq!(app.storage().keys().await.len(), 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn signing_every_slot_finalizes_the_contract() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;
    let contract = app.create_contract(&token, &jeonse_payload()).await?;
    let id = contract["id"].as_i64().unwrap_or_default();
    let image = signature_data_url()?;

    let mut completed = false;
    for role in ["lessor", "lessee", "broker"] {
        let response = app
            .put_json(
                &format!("/api/contracts/{id}/signatures/{role}"),
                &json!({ "image": image }),
                Some(&token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        completed = json_body(response).await?["contract_completed"] == true;
    }
    assert!(completed);

    let detail = json_body(app.get(&format!("/api/contracts/{id}"), Some(&token)).await?).await?;
    assert_eq!(detail["status"], "SIGNED");
    assert_eq!(detail["pdf_sha256"].as_str().map(str::len), Some(64));

    let sent = app.notifier().sent().await;
    assert!(sent.iter().any(|message| message.to == common::ADMIN_EMAIL));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_last_signers_complete_the_contract_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;
    let image = signature_data_url()?;

    for _ in 0..5 {
        let contract = app.create_contract(&token, &jeonse_payload()).await?;
        let id = contract["id"].as_i64().unwrap_or_default();
        let response = app
            .put_json(
                &format!("/api/contracts/{id}/signatures/lessor"),
                &json!({ "image": image }),
                Some(&token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let signers: Vec<_> = ["lessee", "broker"]
            .into_iter()
            .map(|role| {
                let app = app.clone();
                let token = token.clone();
                let image = image.clone();
                tokio::spawn(async move {
                    let response = app
                        .put_json(
                            &format!("/api/contracts/{id}/signatures/{role}"),
                            &json!({ "image": image }),
                            Some(&token),
                        )
                        .await?;
                    let status = response.status();
                    Ok::<_, anyhow::Error>((status, json_body(response).await?))
                })
            })
            .collect();
        let mut completions = 0;
        for signer in signers {
            let (status, body) = signer.await??;
            assert_eq!(status, StatusCode::OK, "body: {body}");
            if body["contract_completed"] == true {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);

        let detail = json_body(app.get(&format!("/api/contracts/{id}"), Some(&token)).await?).await?;
        assert_eq!(detail["status"], "SIGNED");
        assert_eq!(detail["pdf_sha256"].as_str().map(str::len), Some(64));

        let events = json_body(
            app.get(&format!("/api/contracts/{id}/events"), Some(&token))
                .await?,
        )
        .await?;
        let completed_events = events
            .as_array()
            .map(|events| events.iter().filter(|e| e["event_type"] == "COMPLETED").count())
            .unwrap_or_default();
        assert_eq!(completed_events, 1);
    }

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn pdf_hash_is_recorded_and_verifies() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;
    let contract = app.create_contract(&token, &sale_payload()).await?;
    let id = contract["id"].as_i64().unwrap_or_default();

    let response = app
        .get(&format!("/api/contracts/{id}/pdf?mode=download"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let digest = response
        .headers()
        .get("x-pdf-sha256")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default();
    assert!(disposition.starts_with("attachment;"));
    let pdf = body_to_vec(response.into_body()).await?;
    assert!(pdf.starts_with(b"%PDF-"));
    assert_eq!(
        digest.as_deref(),
        Some(hatch_backend::contracts::integrity::compute_pdf_hash(&pdf).as_str())
    );

    let info = json_body(app.get(&format!("/api/contracts/{id}/pdf/info"), Some(&token)).await?)
        .await?;
    assert_eq!(info["pdf_sha256"].as_str(), digest.as_deref());
    assert_eq!(info["short_hash"].as_str().map(str::len), Some(16));

    let response = app
        .post_json(&format!("/api/contracts/{id}/pdf/verify"), &json!({}), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await?;
    assert_eq!(report["is_valid"], true);
    assert_eq!(report["pdf"]["is_valid"], true);
    assert_eq!(report["doc"]["is_valid"], true);
    assert_eq!(report["events"]["is_valid"], true);

    let events = json_body(app.get(&format!("/api/contracts/{id}/events"), Some(&token)).await?)
        .await?;
    assert_eq!(events[0]["event_type"], "PDF_GENERATED");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn tampering_is_reported_not_raised() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;
    let contract = app.create_contract(&token, &jeonse_payload()).await?;
    let id = contract["id"].as_i64().unwrap_or_default();
    let response = app.get(&format!("/api/contracts/{id}/pdf"), Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let contract_id = id as i32;
    app.with_conn(move |conn| {
        use hatch_backend::schema::contracts;
        diesel::update(contracts::table.find(contract_id))
            .set(contracts::seller_name.eq("Someone Else"))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    let report = json_body(
        app.post_json(&format!("/api/contracts/{id}/pdf/verify"), &json!({}), Some(&token))
            .await?,
    )
    .await?;
    assert_eq!(report["is_valid"], false);
    assert_eq!(report["doc"]["is_valid"], false);
    assert_eq!(report["pdf"]["is_valid"], false);
    assert_eq!(report["events"]["is_valid"], true);

    let rejected = app
        .with_conn(move |conn| {
            use hatch_backend::schema::contract_events;
            Ok(diesel::update(
                contract_events::table.filter(contract_events::contract_id.eq(contract_id)),
            )
            .set(contract_events::event_type.eq("FORGED"))
            .execute(conn)
            .is_err())
        })
        .await?;
    assert!(rejected, "audit events must be append-only");

    app.with_conn(move |conn| {
        use hatch_backend::schema::contract_events;
        let first: i32 = contract_events::table
            .filter(contract_events::contract_id.eq(contract_id))
            .order(contract_events::id.asc())
            .select(contract_events::id)
            .first(conn)?;
        diesel::delete(contract_events::table.find(first)).execute(conn)?;
        Ok(())
    })
    .await?;
    let report = json_body(
        app.post_json(&format!("/api/contracts/{id}/pdf/verify"), &json!({}), Some(&token))
            .await?,
    )
    .await?;
    assert_eq!(report["events"]["is_valid"], false);
    assert_eq!(report["events"]["tampered_event_ids"].as_array().map(Vec::len), Some(1));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn qr_payload_verifies_publicly() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;
    let contract = app.create_contract(&token, &jeonse_payload()).await?;
    let qr = contract["qr_payload"].as_str().unwrap_or_default().to_string();

    let path = format!("/api/verify?code={}", utf8_percent_encode(&qr, NON_ALPHANUMERIC));
    let response = app.get(&path, None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let verdict = json_body(response).await?;
    assert_eq!(verdict["is_valid"], true);
    assert_eq!(verdict["doc_no"], contract["doc_no"]);

    let forged = format!("CONTRACT_ID:{}|HASH:{}", contract["id"], "0".repeat(16));
    let path = format!("/api/verify?code={}", utf8_percent_encode(&forged, NON_ALPHANUMERIC));
    let verdict = json_body(app.get(&path, None).await?).await?;
    assert_eq!(verdict["is_valid"], false);

    let response = app.get("/api/verify?code=hello", None).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let path = format!(
        "/api/verify?code={}",
        utf8_percent_encode(&format!("CONTRACT_ID:999|HASH:{}", "a".repeat(16)), NON_ALPHANUMERIC)
    );
    let response = app.get(&path, None).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deleting_a_contract_removes_rows_and_images() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;
    let contract = app.create_contract(&token, &jeonse_payload()).await?;
    let id = contract["id"].as_i64().unwrap_or_default();

    let response = app
        .put_json(
            &format!("/api/contracts/{id}/signatures/lessee"),
            &json!({ "image": signature_data_url()? }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.storage().keys().await.len(), 1);

    let response = app.delete(&format!("/api/contracts/{id}"), Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.storage().keys().await.is_empty());

    let response = app.get(&format!("/api/contracts/{id}"), Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let contract_id = id as i32;
    let leftover_events: i64 = app
        .with_conn(move |conn| {
            use hatch_backend::schema::contract_events;
            Ok(contract_events::table
                .filter(contract_events::contract_id.eq(contract_id))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(leftover_events, 0);

    let response = app.delete(&format!("/api/contracts/{id}"), Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
