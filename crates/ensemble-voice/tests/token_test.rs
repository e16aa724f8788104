use ensemble_voice::{RoomAccess, RoomTokenIssuer, VoiceError};

const DEFAULT_URL: &str = "ws://localhost:7880";
const DEFAULT_KEY: &str = "devkey";
const DEFAULT_SECRET: &str = "secret";

fn access(secret: &str) -> RoomAccess {
    RoomAccess {
        url: DEFAULT_URL.to_string(),
        api_key: DEFAULT_KEY.to_string(),
        api_secret: secret.to_string(),
        ..RoomAccess::default()
    }
}

#[test]
fn test_issue_join_token() {
    let issuer = RoomTokenIssuer::new(access(DEFAULT_SECRET));

    let token = issuer
        .issue_join_token("mentoria", "finance-avatar", "Ricardo")
        .expect("Failed to issue token");

    assert!(!token.is_empty());
    assert_eq!(issuer.url(), DEFAULT_URL);
}

#[test]
fn test_token_claims() {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    use serde::Deserialize;

    let issuer = RoomTokenIssuer::new(access(DEFAULT_SECRET));
    let token = issuer
        .issue_join_token("mentoria", "finance-avatar", "Ricardo")
        .expect("Failed to issue token");

    #[derive(Deserialize)]
    struct Claims {
        sub: String,
        video: VideoClaims,
    }

    #[derive(Deserialize)]
    struct VideoClaims {
        #[serde(rename = "canPublish")]
        can_publish: bool,
        #[serde(rename = "roomJoin")]
        room_join: bool,
        room: String,
    }

    let validation = Validation::new(Algorithm::HS256);
    let key = DecodingKey::from_secret(DEFAULT_SECRET.as_bytes());
    let token_data = decode::<Claims>(&token, &key, &validation).expect("Failed to decode token");

    assert_eq!(token_data.claims.sub, "finance-avatar");
    assert!(token_data.claims.video.can_publish, "canPublish should be true");
    assert!(token_data.claims.video.room_join, "roomJoin should be true");
    assert_eq!(token_data.claims.video.room, "mentoria");
}

#[test]
fn test_missing_key_pair_is_a_config_error() {
    let issuer = RoomTokenIssuer::new(RoomAccess::default());
    assert!(!issuer.is_enabled());

    let err = issuer
        .issue_join_token("mentoria", "finance-avatar", "Ricardo")
        .unwrap_err();
    assert!(matches!(err, VoiceError::Config(_)));
}

#[test]
fn test_debug_hides_secret() {
    let debug = format!("{:?}", access("super-secret"));
    assert!(!debug.contains("super-secret"));
    assert!(debug.contains("<redacted>"));
    assert!(format!("{:?}", RoomAccess::default()).contains("<unset>"));
}

#[test]
fn test_partial_table_keeps_defaults() {
    let access: RoomAccess = toml::from_str(
        r#"
        url = "ws://localhost:7880"
        api_key = "devkey"
        "#,
    )
    .expect("valid table");
    assert!(!access.has_key_pair());
    assert_eq!(access.join_token_ttl_secs, 600);
}

#[test]
fn test_issuer_needs_a_url() {
    assert!(RoomTokenIssuer::for_room(&RoomAccess::default()).is_none());
    let issuer = RoomTokenIssuer::for_room(&access(DEFAULT_SECRET)).expect("url set");
    assert!(issuer.is_enabled());
}

#[test]
fn test_token_expiry_follows_ttl() {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Expiry {
        exp: u64,
        nbf: u64,
    }

    let mut access = access(DEFAULT_SECRET);
    access.join_token_ttl_secs = 120;
    let token = RoomTokenIssuer::new(access)
        .issue_join_token("mentoria", "finance-avatar", "Ricardo")
        .expect("token");
    let claims = decode::<Expiry>(
        &token,
        &DecodingKey::from_secret(DEFAULT_SECRET.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .expect("decodes")
    .claims;
    // nbf and exp are stamped separately, so a second may tick between them.
    assert!((120..=121).contains(&(claims.exp - claims.nbf)));
}
