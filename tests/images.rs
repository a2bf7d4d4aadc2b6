#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use postfeed::auth::{create_jwt, Role};
use postfeed::config::AppConfig;
use postfeed::forms::{FILE_AND_CLEAR, INVALID_IMAGE};
use postfeed::repo::inmem::InMemRepo;
use postfeed::routes::{config, AppState};
use postfeed::storage::FsImageStore;
use serde_json::Value;
use serial_test::serial;
use std::sync::Arc;

fn bearer(username: &str) -> (&'static str, String) {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    let token = create_jwt(username, vec![Role::User]).unwrap();
    ("Authorization", format!("Bearer {}", token))
}

// Multipart body with text fields plus one file part named `image`.
fn build_multipart(fields: &[(&str, &str)], file_name: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary = "postfeed-image-boundary";
    let mut body: Vec<u8> = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    let disp = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    );
    body.extend_from_slice(disp.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

// Minimal 1x1 PNG (transparent)
fn sample_png() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, // signature
        0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, b'I',
        b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A,
        0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ]
}

#[actix_web::test]
#[serial]
async fn image_post_shows_up_everywhere() {
    let media = tempfile::tempdir().unwrap();
    let state = AppState::new(
        Arc::new(InMemRepo::new()),
        Arc::new(FsImageStore::new(media.path())),
        AppConfig::default(),
    );
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/admin/groups")
        .insert_header(("Authorization", format!("Bearer {}", create_jwt("root", vec![Role::Admin]).unwrap())))
        .set_json(serde_json::json!({"title": "Pics", "slug": "pics"}))
        .to_request();
    let group: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let group_id = group["id"].as_i64().unwrap().to_string();

    let png = sample_png();
    let (ct, body) = build_multipart(&[("text", "with picture"), ("group", group_id.as_str())], "cat.png", &png);
    let req = test::TestRequest::post()
        .uri("/new")
        .insert_header(bearer("leo"))
        .insert_header(("content-type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let post: Value = test::read_body_json(resp).await;
    let id = post["id"].as_i64().unwrap();
    let image = post["image"].as_str().unwrap().to_string();
    assert!(image.starts_with("posts/") && image.ends_with(".png"));
    assert!(media.path().join(&image).exists());

    for uri in ["/", "/leo/"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let body = test::read_body(test::call_service(&app, req).await).await;
        assert!(String::from_utf8_lossy(&body).contains(&image), "image missing from {uri}");
    }
    let req = test::TestRequest::get().uri("/group/pics/").to_request();
    let feed: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(feed["page"]["items"][0]["image"], image.as_str());
    let req = test::TestRequest::get().uri(&format!("/leo/{id}/")).to_request();
    let detail: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(detail["post"]["image"], image.as_str());

    // served back with a sniffed content type
    let req = test::TestRequest::get().uri(&format!("/media/{image}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(test::read_body(resp).await.as_ref(), png.as_slice());
}

#[actix_web::test]
#[serial]
async fn non_image_upload_is_rejected() {
    let media = tempfile::tempdir().unwrap();
    let state = AppState::new(
        Arc::new(InMemRepo::new()),
        Arc::new(FsImageStore::new(media.path())),
        AppConfig::default(),
    );
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    // a text file dressed up with an image extension
    let (ct, body) = build_multipart(&[("text", "not really")], "fake.png", b"hello world");
    let req = test::TestRequest::post()
        .uri("/new")
        .insert_header(bearer("leo"))
        .insert_header(("content-type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["fields"]["image"][0], INVALID_IMAGE);

    let req = test::TestRequest::get().uri("/").to_request();
    let feed: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(feed["count"], 0);
}

#[actix_web::test]
#[serial]
async fn edit_keeps_or_clears_image() {
    let media = tempfile::tempdir().unwrap();
    let state = AppState::new(
        Arc::new(InMemRepo::new()),
        Arc::new(FsImageStore::new(media.path())),
        AppConfig::default(),
    );
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let (ct, body) = build_multipart(&[("text", "pic")], "a.png", &sample_png());
    let req = test::TestRequest::post()
        .uri("/new")
        .insert_header(bearer("leo"))
        .insert_header(("content-type", ct))
        .set_payload(body)
        .to_request();
    let post: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = post["id"].as_i64().unwrap();

    // no file part: image stays
    let (ct, body) = build_multipart(&[("text", "pic v2")], "", b"");
    let req = test::TestRequest::post()
        .uri(&format!("/leo/{id}/edit/"))
        .insert_header(bearer("leo"))
        .insert_header(("content-type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let edited: Value = test::read_body_json(resp).await;
    assert_eq!(edited["image"], post["image"]);

    // explicit clear
    let (ct, body) = build_multipart(&[("text", "pic v3"), ("image-clear", "on")], "", b"");
    let req = test::TestRequest::post()
        .uri(&format!("/leo/{id}/edit/"))
        .insert_header(bearer("leo"))
        .insert_header(("content-type", ct))
        .set_payload(body)
        .to_request();
    let edited: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert!(edited["image"].is_null());
    assert_eq!(edited["text"], "pic v3");
}

#[actix_web::test]
#[serial]
async fn file_with_clear_is_rejected() {
    let media = tempfile::tempdir().unwrap();
    let state = AppState::new(
        Arc::new(InMemRepo::new()),
        Arc::new(FsImageStore::new(media.path())),
        AppConfig::default(),
    );
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let (ct, body) = build_multipart(&[("text", "pic")], "a.png", &sample_png());
    let req = test::TestRequest::post()
        .uri("/new")
        .insert_header(bearer("leo"))
        .insert_header(("content-type", ct))
        .set_payload(body)
        .to_request();
    let post: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = post["id"].as_i64().unwrap();

    let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
    let (ct, body) = build_multipart(&[("text", "both"), ("image-clear", "on")], "b.gif", gif);
    let req = test::TestRequest::post()
        .uri(&format!("/leo/{id}/edit/"))
        .insert_header(bearer("leo"))
        .insert_header(("content-type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["fields"]["image"][0], FILE_AND_CLEAR);

    let req = test::TestRequest::get().uri(&format!("/leo/{id}/")).to_request();
    let detail: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(detail["post"]["image"], post["image"]);
    assert_eq!(detail["post"]["text"], "pic");
}

#[actix_web::test]
#[serial]
async fn replaced_images_are_deleted_once_unused() {
    let media = tempfile::tempdir().unwrap();
    let state = AppState::new(
        Arc::new(InMemRepo::new()),
        Arc::new(FsImageStore::new(media.path())),
        AppConfig::default(),
    );
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    // two posts with the same bytes share one stored file
    let mut ids = Vec::new();
    for text in ["first", "second"] {
        let (ct, body) = build_multipart(&[("text", text)], "a.png", &sample_png());
        let req = test::TestRequest::post()
            .uri("/new")
            .insert_header(bearer("leo"))
            .insert_header(("content-type", ct))
            .set_payload(body)
            .to_request();
        let post: Value = test::read_body_json(test::call_service(&app, req).await).await;
        ids.push((post["id"].as_i64().unwrap(), post["image"].as_str().unwrap().to_string()));
    }
    let (first, png_key) = ids[0].clone();
    let (second, shared) = ids[1].clone();
    assert_eq!(png_key, shared);

    // first post swaps to a gif; the png is still used by the second post
    let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
    let (ct, body) = build_multipart(&[("text", "first v2")], "b.gif", gif);
    let req = test::TestRequest::post()
        .uri(&format!("/leo/{first}/edit/"))
        .insert_header(bearer("leo"))
        .insert_header(("content-type", ct))
        .set_payload(body)
        .to_request();
    let edited: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let gif_key = edited["image"].as_str().unwrap().to_string();
    assert!(gif_key.ends_with(".gif"));
    assert!(media.path().join(&png_key).exists());
    assert!(media.path().join(&gif_key).exists());

    // second post clears: nothing refers to the png any more
    let (ct, body) = build_multipart(&[("text", "second v2"), ("image-clear", "on")], "", b"");
    let req = test::TestRequest::post()
        .uri(&format!("/leo/{second}/edit/"))
        .insert_header(bearer("leo"))
        .insert_header(("content-type", ct))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert!(!media.path().join(&png_key).exists());
    assert!(media.path().join(&gif_key).exists());

    let req = test::TestRequest::get().uri(&format!("/media/{png_key}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}
