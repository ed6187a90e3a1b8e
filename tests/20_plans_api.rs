mod common;

use anyhow::Result;
use reqwest::StatusCode;

#[tokio::test]
async fn root_reports_endpoints() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client.get(&server.base_url).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let body = res.json::<serde_json::Value>().await?;
    assert!(body["success"].as_bool().unwrap_or(false), "success flag false: {}", body);
    assert_eq!(body["data"]["name"], "Run Plan API");
    assert!(body["data"]["endpoints"]["plans"].is_string());

    Ok(())
}

#[tokio::test]
async fn plans_require_auth() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    for path in [
        "/api/plans",
        "/api/plans/presets",
        "/api/plans/wizard/new/1",
        "/api/plans/delete-context/abc",
    ] {
        let res = client
            .get(format!("{}{}", server.base_url, path))
            .send()
            .await?;
        assert_eq!(
            res.status(),
            StatusCode::UNAUTHORIZED,
            "expected 401 for {}, got {}",
            path,
            res.status()
        );
        let body = res.json::<serde_json::Value>().await?;
        assert_eq!(body["code"], "UNAUTHORIZED", "unexpected body: {}", body);
    }

    Ok(())
}

#[tokio::test]
async fn save_requires_auth() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/api/plans/save/0", server.base_url))
        .json(&serde_json::json!({ "plan_displayed_name": "x" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn malformed_bearer_token_is_rejected() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/api/plans", server.base_url))
        .header("Authorization", "Bearer not-a-jwt")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let body = res.json::<serde_json::Value>().await?;
    assert!(
        body["message"]
            .as_str()
            .unwrap_or_default()
            .contains("Invalid JWT token"),
        "unexpected body: {}",
        body
    );

    Ok(())
}

#[tokio::test]
async fn non_bearer_authorization_is_rejected() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/api/plans", server.base_url))
        .header("Authorization", "Basic dXNlcjpwYXNz")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}
