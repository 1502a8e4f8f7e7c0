mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{body_json, waste_form_fields, TestApp};
use custody::permissions::Role;
use futures_util::future::join_all;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn health_is_public() -> Result<()> {
    let app = TestApp::new().await?;
    let response = app.get("/api/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["role_cache_ttl_seconds"], 600);
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() -> Result<()> {
    let app = TestApp::new().await?;
    let response = app
        .get(&format!("/api/documents/{}", Uuid::new_v4()), None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .get(&format!("/api/documents/{}", Uuid::new_v4()), Some("not-a-token"))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn member_may_revise_for_their_organization() -> Result<()> {
    let app = TestApp::new().await?;
    let emitter = app.user("EMITTER", Role::Member).await?;
    let transporter = app.user("TRANSPORTER", Role::Member).await?;
    let doc = app
        .signed_waste_form(&emitter, waste_form_fields("EMITTER", "TRANSPORTER", "DEST"))
        .await?;

    let response = app
        .post_json(
            &format!("/api/documents/{doc}/revisions"),
            &json!({ "content": { "quantity": 2 }, "requester_org_id": "TRANSPORTER" }),
            Some(&transporter.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response.into_body()).await?;
    assert_eq!(body["revision"]["requester_org_id"], "TRANSPORTER");

    let response = app
        .post_json(
            &format!("/api/documents/{doc}/revisions"),
            &json!({ "content": { "quantity": 2 }, "requester_org_id": "EMITTER" }),
            Some(&transporter.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn concurrent_first_requests_share_one_role_fetch() -> Result<()> {
    let app = TestApp::new().await?;
    let emitter = app.user("EMITTER", Role::Member).await?;
    let reader = app.user("DEST", Role::Reader).await?;
    let doc = app
        .waste_form(&emitter, waste_form_fields("EMITTER", "TRANSPORTER", "DEST"))
        .await?;
    assert_eq!(app.role_fetches(reader.id), 0);

    let path = format!("/api/documents/{doc}");
    let responses = join_all((0..8).map(|_| app.get(&path, Some(&reader.token)))).await;
    for response in responses {
        assert_eq!(response?.status(), StatusCode::OK);
    }
    assert_eq!(app.role_fetches(reader.id), 1);

    let response = app.get(&path, Some(&reader.token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.role_fetches(reader.id), 1);
    Ok(())
}

#[tokio::test]
async fn demotion_takes_effect_on_the_next_request() -> Result<()> {
    let app = TestApp::new().await?;
    let admin = app.user("DEST", Role::Admin).await?;
    let member = app.user("DEST", Role::Member).await?;
    let doc = app
        .waste_form(&admin, waste_form_fields("EMITTER", "TRANSPORTER", "DEST"))
        .await?;
    let path = format!("/api/documents/{doc}");

    let response = app
        .patch_json(
            &path,
            &json!({ "fields": { "wasteDescription": "used lead batteries" } }),
            Some(&member.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.role_fetches(member.id), 1);

    let response = app
        .put_json(
            &format!("/api/organizations/DEST/members/{}", member.id),
            &json!({ "role": "READER" }),
            Some(&admin.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .patch_json(
            &path,
            &json!({ "fields": { "wasteDescription": "lead batteries" } }),
            Some(&member.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response.into_body()).await?;
    assert_eq!(body["details"]["permission"], "BsdCanUpdate");
    assert_eq!(app.role_fetches(member.id), 2);

    let response = app.get(&path, Some(&member.token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn removed_members_lose_access_immediately() -> Result<()> {
    let app = TestApp::new().await?;
    let admin = app.user("DEST", Role::Admin).await?;
    let member = app.user("DEST", Role::Member).await?;
    let doc = app
        .waste_form(&admin, waste_form_fields("EMITTER", "TRANSPORTER", "DEST"))
        .await?;
    let path = format!("/api/documents/{doc}");

    let response = app.get(&path, Some(&member.token)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let member_path = format!("/api/organizations/DEST/members/{}", member.id);
    let response = app.delete(&member_path, Some(&admin.token)).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.get(&path, Some(&member.token)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.delete(&member_path, Some(&admin.token)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn organizations_keep_their_last_admin() -> Result<()> {
    let app = TestApp::new().await?;
    let admin = app.user("DEST", Role::Admin).await?;
    let admin_path = format!("/api/organizations/DEST/members/{}", admin.id);

    let response = app
        .put_json(&admin_path, &json!({ "role": "MEMBER" }), Some(&admin.token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.delete(&admin_path, Some(&admin.token)).await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let second = app.user("DEST", Role::Member).await?;
    let response = app
        .put_json(
            &format!("/api/organizations/DEST/members/{}", second.id),
            &json!({ "role": "ADMIN" }),
            Some(&admin.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .put_json(&admin_path, &json!({ "role": "MEMBER" }), Some(&second.token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn only_admins_manage_members() -> Result<()> {
    let app = TestApp::new().await?;
    app.user("DEST", Role::Admin).await?;
    let member = app.user("DEST", Role::Member).await?;
    let newcomer = Uuid::new_v4();

    let response = app
        .put_json(
            &format!("/api/organizations/DEST/members/{newcomer}"),
            &json!({ "role": "MEMBER" }),
            Some(&member.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response.into_body()).await?;
    assert_eq!(body["details"]["permission"], "CompanyCanManageMembers");

    let response = app
        .put_json(
            "/api/organizations/DEST/members/not-a-uuid",
            &json!({ "role": "MEMBER" }),
            Some(&member.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn me_reports_identity_and_memberships() -> Result<()> {
    let app = TestApp::new().await?;
    let admin = app.user("DEST", Role::Admin).await?;

    let response = app.get("/api/me", Some(&admin.token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await?;
    assert_eq!(body["user_id"], admin.id.to_string());
    assert_eq!(body["name"], "user-DEST");
    assert_eq!(body["roles"], json!({ "DEST": "ADMIN" }));

    let response = app.get("/api/me", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
