//! JSON wire codec
//!
//! One message per JSON object; stream transports frame them one per line.

use serde::de::DeserializeOwned;
use serde::Serialize;

use tether_core::{TetherError, TetherResult};

/// Serialize a message to JSON bytes
pub fn encode<T: Serialize>(message: &T) -> TetherResult<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| TetherError::InvalidWireFormat(e.to_string()))
}

/// Parse a message from JSON bytes
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> TetherResult<T> {
    serde_json::from_slice(bytes).map_err(|e| TetherError::InvalidWireFormat(e.to_string()))
}

/// Serialize a message as a newline-terminated JSON line
pub fn encode_line<T: Serialize>(message: &T) -> TetherResult<String> {
    let mut line = serde_json::to_string(message).map_err(|e| TetherError::InvalidWireFormat(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Parse one JSON line; surrounding whitespace is ignored
pub fn decode_line<T: DeserializeOwned>(line: &str) -> TetherResult<T> {
    serde_json::from_str(line.trim()).map_err(|e| TetherError::InvalidWireFormat(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{EventId, Inbound, Outbound, PathAddress, Value};

    #[test]
    fn test_encode_line_is_single_line() {
        let message = Outbound::Set {
            path: PathAddress::parse("settings.x").unwrap(),
            value: Value::from("two\nlines"),
            id: EventId::new(3),
        };
        let line = encode_line(&message).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let back: Outbound = decode_line(&line).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let cases = [
            "",
            "not json",
            r#"{"op":"teleport","id":1}"#,
            r#"{"op":"set","path":"a..b","id":1,"value":1}"#,
            r#"{"op":"delete","path":"state.x"}"#,
        ];
        for case in cases {
            assert!(
                matches!(decode_line::<Inbound>(case), Err(TetherError::InvalidWireFormat(_))),
                "{:?} should be rejected",
                case
            );
        }
    }

    #[test]
    fn test_decode_rollback() {
        let message: Inbound = decode(br#"{"op":"rollback","id":3}"#).unwrap();
        assert_eq!(message, Inbound::Rollback { id: 3 });
    }

    proptest::proptest! {
        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(proptest::num::u8::ANY, 0..256)) {
            let _ = decode::<Inbound>(&bytes);
        }

        #[test]
        fn prop_set_lines_survive_any_text(text in ".*", id in 0u64..1_000_000) {
            let message = Outbound::Set {
                path: PathAddress::parse("state.text").unwrap(),
                value: Value::from(text.as_str()),
                id: EventId::new(id),
            };
            let line = encode_line(&message).unwrap();
            proptest::prop_assert_eq!(line.matches('\n').count(), 1);
            proptest::prop_assert_eq!(decode_line::<Outbound>(&line).unwrap(), message);
        }
    }
}
