use super::*;

#[test]
fn test_round_trip_boundaries() {
    for (id, seq) in [(0, 0), (1, 42), (42, 7_340_032), (u64::MAX, u64::MAX)] {
        let cid = CorrelationId::new(id, seq);
        assert_eq!(CorrelationId::decode(&cid.encode()).unwrap(), cid);
    }
}

#[test]
fn test_tokens_are_fixed_width_and_url_safe() {
    for cid in [CorrelationId::new(0, 0), CorrelationId::new(u64::MAX, 1)] {
        let token = cid.encode();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}

#[test]
fn test_distinct_pairs_give_distinct_tokens() {
    assert_ne!(
        CorrelationId::new(1, 2).encode(),
        CorrelationId::new(2, 1).encode()
    );
}

#[test]
fn test_display_and_from_str_agree() {
    let cid = CorrelationId::new(9, 11);
    let parsed: CorrelationId = cid.to_string().parse().unwrap();
    assert_eq!(parsed, cid);
}

#[test]
fn test_rejects_empty() {
    assert!(matches!(
        CorrelationId::decode(""),
        Err(CorrelationError::Malformed { .. })
    ));
}

#[test]
fn test_rejects_every_truncation() {
    let token = CorrelationId::new(12345, 67890).encode();
    for len in 0..token.len() {
        assert!(
            CorrelationId::decode(&token[..len]).is_err(),
            "prefix of length {len} decoded"
        );
    }
}

#[test]
fn test_rejects_extended_token() {
    let token = format!("{}AAAA", CorrelationId::new(1, 1).encode());
    assert!(CorrelationId::decode(&token).is_err());
}

#[test]
fn test_rejects_non_base64_characters() {
    let token = CorrelationId::new(5, 6).encode();
    let corrupted = format!("{}!", &token[..TOKEN_LEN - 1]);
    assert!(CorrelationId::decode(&corrupted).is_err());
    assert!(CorrelationId::decode("42:7340032/////////////").is_err());
}

#[test]
fn test_rejects_padded_token() {
    let padded = format!("{}==", CorrelationId::new(5, 6).encode());
    assert!(CorrelationId::decode(&padded).is_err());
}

#[test]
fn test_rejects_plain_numbers() {
    assert!(CorrelationId::decode("42-7").is_err());
}

#[test]
fn test_error_names_token() {
    let err = CorrelationId::decode("zz").unwrap_err();
    assert!(err.to_string().contains("zz"));
}
