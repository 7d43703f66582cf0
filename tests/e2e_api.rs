/// E2E tests for the JSON API.
/// These tests run against a real server instance:
///   MIDYA_TEST_SEED=1 midya --port 6969 --data-dir /tmp/midya-e2e
/// Run with: cargo test --test e2e_api -- --ignored
use reqwest::Client;
use serde_json::json;

const BASE_URL: &str = "http://localhost:6969";

async fn register_user(
    client: &Client,
    username: &str,
) -> Result<(String, String), Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/accounts/register", BASE_URL))
        .json(&json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": "password1",
            "password2": "password1",
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);

    let body: serde_json::Value = response.json().await?;
    let token = body["token"].as_str().expect("token present").to_string();
    let user_id = body["user"]["id"]
        .as_str()
        .expect("user id present")
        .to_string();
    Ok((token, user_id))
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid_suffix())
}

fn uuid_suffix() -> String {
    // Enough entropy to keep usernames unique across runs against a
    // persistent test database
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("{}{:x}", std::process::id(), nanos)
}

#[tokio::test]
#[ignore]
async fn test_register_then_login() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let username = unique("reg");
    let (token, _) = register_user(&client, &username).await?;
    assert_eq!(token.len(), 64);

    let response = client
        .post(format!("{}/accounts/login", BASE_URL))
        .json(&json!({"username": username, "password": "password1"}))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await?;
    // The login token is the same stable per-user token
    assert_eq!(body["token"].as_str(), Some(token.as_str()));

    let bad = client
        .post(format!("{}/accounts/login", BASE_URL))
        .json(&json!({"username": username, "password": "wrong"}))
        .send()
        .await?;
    assert_eq!(bad.status(), 401);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_register_validation_errors() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let response = client
        .post(format!("{}/accounts/register", BASE_URL))
        .json(&json!({
            "username": unique("val"),
            "email": format!("{}@example.com", unique("val")),
            "password": "password1",
            "password2": "different1",
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await?;
    assert!(body["password"].is_string());

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_post_like_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let (token, _) = register_user(&client, &unique("liker")).await?;

    let response = client
        .post(format!("{}/social/posts", BASE_URL))
        .bearer_auth(&token)
        .json(&json!({"content": "hello world"}))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let post: serde_json::Value = response.json().await?;
    let post_id = post["id"].as_str().expect("post id");

    let first = client
        .post(format!("{}/social/posts/{}/like", BASE_URL, post_id))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(first.status(), 201);

    let second = client
        .post(format!("{}/social/posts/{}/like", BASE_URL, post_id))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(second.status(), 200);
    let body: serde_json::Value = second.json().await?;
    assert_eq!(body["message"].as_str(), Some("Already liked"));

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_self_follow_and_self_block_are_rejected(
) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let (token, user_id) = register_user(&client, &unique("selfie")).await?;

    let follow = client
        .post(format!("{}/social/follows", BASE_URL))
        .bearer_auth(&token)
        .json(&json!({"following_id": user_id}))
        .send()
        .await?;
    assert_eq!(follow.status(), 400);

    let block = client
        .post(format!("{}/social/blocks", BASE_URL))
        .bearer_auth(&token)
        .json(&json!({"blocked_id": user_id}))
        .send()
        .await?;
    assert_eq!(block.status(), 400);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_block_hides_posts_and_unfollows() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let (viewer_token, _) = register_user(&client, &unique("viewer")).await?;
    let (author_token, author_id) = register_user(&client, &unique("author")).await?;

    let response = client
        .post(format!("{}/social/posts", BASE_URL))
        .bearer_auth(&author_token)
        .json(&json!({"content": "soon to be hidden"}))
        .send()
        .await?;
    let post: serde_json::Value = response.json().await?;
    let post_id = post["id"].as_str().expect("post id").to_string();

    // Follow the author, then block them
    let follow = client
        .post(format!("{}/social/follows", BASE_URL))
        .bearer_auth(&viewer_token)
        .json(&json!({"following_id": author_id}))
        .send()
        .await?;
    assert_eq!(follow.status(), 201);

    let block = client
        .post(format!("{}/social/blocks", BASE_URL))
        .bearer_auth(&viewer_token)
        .json(&json!({"blocked_id": author_id}))
        .send()
        .await?;
    assert_eq!(block.status(), 201);

    // Author's post is no longer visible to the viewer
    let posts: serde_json::Value = client
        .get(format!("{}/social/posts", BASE_URL))
        .bearer_auth(&viewer_token)
        .send()
        .await?
        .json()
        .await?;
    let visible_ids: Vec<&str> = posts
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["id"].as_str())
        .collect();
    assert!(!visible_ids.contains(&post_id.as_str()));

    // The follow was removed by the block cascade
    let follows: serde_json::Value = client
        .get(format!("{}/social/follows", BASE_URL))
        .bearer_auth(&viewer_token)
        .send()
        .await?
        .json()
        .await?;
    assert!(follows.as_array().unwrap().is_empty());

    // Re-blocking is a no-op
    let again = client
        .post(format!("{}/social/blocks", BASE_URL))
        .bearer_auth(&viewer_token)
        .json(&json!({"blocked_id": author_id}))
        .send()
        .await?;
    assert_eq!(again.status(), 200);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_activities_show_network_only() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let (viewer_token, _) = register_user(&client, &unique("watcher")).await?;
    let followed_name = unique("followed");
    let (followed_token, followed_id) = register_user(&client, &followed_name).await?;
    let stranger_name = unique("stranger");
    let (stranger_token, _) = register_user(&client, &stranger_name).await?;

    client
        .post(format!("{}/social/follows", BASE_URL))
        .bearer_auth(&viewer_token)
        .json(&json!({"following_id": followed_id}))
        .send()
        .await?;

    client
        .post(format!("{}/social/posts", BASE_URL))
        .bearer_auth(&followed_token)
        .json(&json!({"content": "in network"}))
        .send()
        .await?;
    client
        .post(format!("{}/social/posts", BASE_URL))
        .bearer_auth(&stranger_token)
        .json(&json!({"content": "out of network"}))
        .send()
        .await?;

    let activities: serde_json::Value = client
        .get(format!("{}/social/activities", BASE_URL))
        .bearer_auth(&viewer_token)
        .send()
        .await?
        .json()
        .await?;

    let descriptions: Vec<&str> = activities
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|a| a["description"].as_str())
        .collect();
    assert!(descriptions
        .iter()
        .any(|d| *d == format!("{} made a post", followed_name)));
    assert!(!descriptions
        .iter()
        .any(|d| *d == format!("{} made a post", stranger_name)));

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_unauthenticated_requests_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    for path in ["/accounts/profile", "/social/posts", "/social/activities"] {
        let response = client.get(format!("{}{}", BASE_URL, path)).send().await?;
        assert_eq!(response.status(), 401, "expected 401 for {}", path);
    }
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_html_feed_requires_session_cookie() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::builder().cookie_store(true).build()?;

    // Seed endpoint sets the session cookie
    let response = client.get(format!("{}/test/seed", BASE_URL)).send().await?;
    assert_eq!(response.status(), 200);

    let feed = client.get(format!("{}/feed", BASE_URL)).send().await?;
    assert_eq!(feed.status(), 200);
    let body = feed.text().await?;
    assert!(body.contains("Latest posts"));

    Ok(())
}
