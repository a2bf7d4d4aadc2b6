use actix_web::{dev::Payload, test, FromRequest, ResponseError};
use postfeed::{
    auth::{create_jwt, Auth, Claims, Role},
    error::ApiError,
    require_role,
};
use serial_test::serial;
use std::env;

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

#[actix_web::test]
#[serial]
async fn jwt_roundtrip_ok() {
    set_secret();
    let token = create_jwt("tester", vec![Role::User]).expect("token");
    // The Auth extractor is the public way to validate, so use it here.
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(auth.username(), "tester");
    assert!(!auth.is_admin());
}

#[actix_web::test]
#[serial]
async fn extractor_rejects_invalid_token() {
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    let err = Auth::from_request(&req, &mut pl).await.err().expect("rejected");
    assert!(matches!(err, ApiError::Unauthorized));
    assert_eq!(err.status_code(), 401);
}

#[actix_web::test]
#[serial]
async fn token_signed_with_other_secret_is_rejected() {
    env::set_var("JWT_SECRET", "another-secret-that-is-32-bytes-long");
    let token = create_jwt("tester", vec![Role::User]).expect("token");
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(matches!(Auth::from_request(&req, &mut pl).await, Err(ApiError::Unauthorized)));
}

#[actix_web::test]
#[serial]
async fn missing_token_redirects_to_login() {
    set_secret();
    let req = test::TestRequest::get().uri("/follow/?page=2").to_http_request();
    let mut pl = Payload::None;
    let err = Auth::from_request(&req, &mut pl).await.err().expect("rejected");
    match &err {
        ApiError::LoginRequired { location } => {
            assert_eq!(location, "/auth/login/?next=%2Ffollow%2F%3Fpage%3D2");
        }
        other => panic!("unexpected error {other:?}"),
    }
    let resp = err.error_response();
    assert_eq!(resp.status(), 302);
    assert!(resp.headers().get("location").is_some());
}

#[actix_web::test]
async fn require_role_macro_enforces_roles() {
    // Build Auth instances manually with different roles.
    let admin = Auth(Claims { sub: "a".into(), exp: usize::MAX, roles: vec![Role::Admin] });
    let user = Auth(Claims { sub: "u".into(), exp: usize::MAX, roles: vec![Role::User] });

    fn guarded(a: Auth) -> Result<(), ApiError> {
        require_role!(a, Role::Admin);
        Ok(())
    }
    assert!(admin.is_admin());
    assert!(guarded(admin).is_ok());
    assert!(matches!(guarded(user), Err(ApiError::Forbidden)));
}
