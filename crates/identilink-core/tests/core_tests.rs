//! Tests for identilink-core: contact model, observation, view wire format, config files

use identilink_core::*;

// ===========================================================================
// ContactId / LinkPrecedence
// ===========================================================================

#[test]
fn contact_id_display_and_order() {
    let a = ContactId::new(2);
    let b = ContactId::from(10);
    assert_eq!(format!("{}", a), "2");
    assert!(a < b);
    assert_eq!(b.get(), 10);
}

#[test]
fn link_precedence_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&LinkPrecedence::Primary).unwrap(),
        r#""primary""#
    );
    assert_eq!(
        serde_json::to_string(&LinkPrecedence::Secondary).unwrap(),
        r#""secondary""#
    );
    assert_eq!(LinkPrecedence::parse("secondary"), Some(LinkPrecedence::Secondary));
    assert_eq!(LinkPrecedence::parse("tertiary"), None);
}

// ===========================================================================
// NewContact / LinkPatch
// ===========================================================================

#[test]
fn secondary_keeps_both_observed_fields() {
    let obs = Observation::new(Some("a@x.com".into()), Some("555".into())).unwrap();
    let new = NewContact::secondary(&obs, ContactId::new(1));
    assert_eq!(new.email.as_deref(), Some("a@x.com"));
    assert_eq!(new.phone_number.as_deref(), Some("555"));
    assert_eq!(new.linked_id, Some(ContactId::new(1)));
    assert_eq!(new.link_precedence, LinkPrecedence::Secondary);
}

#[test]
fn primary_has_no_link() {
    let obs = Observation::new(None, Some("123".into())).unwrap();
    let new = NewContact::primary(&obs);
    assert_eq!(new.linked_id, None);
    assert_eq!(new.link_precedence, LinkPrecedence::Primary);
    assert_eq!(new.email, None);
}

#[test]
fn link_patch_noop_detection() {
    let now = chrono::Utc::now();
    let contact = Contact {
        id: ContactId::new(4),
        email: Some("b@x.com".into()),
        phone_number: None,
        linked_id: Some(ContactId::new(1)),
        link_precedence: LinkPrecedence::Secondary,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    assert!(LinkPatch::link_to(ContactId::new(1)).is_noop_for(&contact));
    assert!(!LinkPatch::link_to(ContactId::new(2)).is_noop_for(&contact));
}

// ===========================================================================
// ContactView wire format
// ===========================================================================

#[test]
fn contact_view_uses_compatible_field_names() {
    let view = ContactView {
        primary_contact_id: ContactId::new(1),
        emails: vec!["a@x.com".into()],
        phone_numbers: vec!["123".into()],
        secondary_contact_ids: vec![ContactId::new(2)],
    };
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["primaryContatctId"], 1);
    assert_eq!(json["emails"][0], "a@x.com");
    assert_eq!(json["phoneNumbers"][0], "123");
    assert_eq!(json["secondaryContactIds"][0], 2);
}

// ===========================================================================
// Config files
// ===========================================================================

#[test]
fn config_load_reads_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identilink.toml");
    std::fs::write(
        &path,
        "[server]\nport = 8081\n\n[resolver]\nmax_attempts = 2\n",
    )
    .unwrap();
    let config = ServiceConfig::load(&path).unwrap();
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.resolver.max_attempts, 2);
    assert_eq!(config.store.backend, StoreBackend::Sqlite);
}

#[test]
fn config_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig::load_or_default(&dir.path().join("absent.toml"));
    assert_eq!(config, ServiceConfig::default());
}

#[test]
fn config_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[server\nport = ").unwrap();
    assert!(matches!(
        ServiceConfig::load(&path),
        Err(Error::TomlError(_))
    ));
}

#[test]
fn config_toml_roundtrips_through_file() {
    let mut config = ServiceConfig::default();
    config.store.backend = StoreBackend::Memory;
    let text = config.to_toml();
    let back: ServiceConfig = toml::from_str(&text).unwrap();
    assert_eq!(back, config);
}
