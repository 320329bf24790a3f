use anyhow::Result;
use bytes::BytesMut;
use rendezvous_client_codec::{
    Error, MAX_DATAGRAM,
    message::{Command, Message, ServerError},
};

mod samples {
    pub const HANDSHAKE: &[u8] =
        b"d9:Arguments14:4242|10.0.0.157:Command4:conn2:Id1:07:Payload5:net-a5:Query3:1.0e";
    pub const MEMBER_LIST: &[u8] = b"d9:Arguments5:b,c,d7:Command4:find2:Id36:550e8400-e29b-41d4-a716-4466554400007:Payload0:5:Query0:e";
    pub const RELAY_OFFER: &[u8] =
        b"d9:Arguments1:b7:Command2:cp2:Id1:07:Payload0:5:Query12:9.9.9.9:7000e";
}

#[test]
fn test_frame_decoding() -> Result<()> {
    let message = Message::decode(samples::HANDSHAKE)?;
    assert_eq!(message.command, Command::Conn);
    assert_eq!(message.id, "0");
    assert_eq!(message.query, "1.0");
    assert_eq!(message.arguments, "4242|10.0.0.15");
    assert_eq!(message.payload, "net-a");

    let message = Message::decode(samples::MEMBER_LIST)?;
    assert_eq!(message.command, Command::Find);
    assert_eq!(message.id.len(), 36);
    assert_eq!(message.arguments, "b,c,d");

    let message = Message::decode(samples::RELAY_OFFER)?;
    assert_eq!(message.command, Command::Cp);
    assert_eq!(message.query, "9.9.9.9:7000");
    assert_eq!(message.arguments, "b");

    Ok(())
}

#[test]
fn test_round_trip() -> Result<()> {
    let mut message = Message::new(Command::Conn, "0");
    message.query = "1.0".to_string();
    message.arguments = "4242|10.0.0.15|192.168.1.2".to_string();
    message.payload = "net-a".to_string();

    let mut bytes = BytesMut::new();
    message.encode(&mut bytes);
    assert!(bytes.len() <= MAX_DATAGRAM);
    assert_eq!(Message::decode(&bytes)?, message);

    // Encoding is deterministic, equal frames produce equal buffers.
    let mut again = BytesMut::new();
    message.encode(&mut again);
    assert_eq!(bytes, again);

    Ok(())
}

#[test]
fn test_defensive_decoding() {
    // Truncated envelope.
    assert!(matches!(
        Message::decode(b"d7:Command4:ping"),
        Err(Error::UnexpectedEnd)
    ));

    // Not a dictionary at all.
    assert!(matches!(
        Message::decode(b"4:ping"),
        Err(Error::NotADictionary)
    ));
    assert!(matches!(Message::decode(b""), Err(Error::UnexpectedEnd)));

    // Garbage after a well formed dictionary.
    assert!(matches!(
        Message::decode(b"d7:Command4:pingexx"),
        Err(Error::TrailingBytes)
    ));

    // A frame that never names its command.
    assert!(matches!(
        Message::decode(b"d2:Id1:0e"),
        Err(Error::MissingCommand)
    ));

    // A tag outside the command table.
    assert!(matches!(
        Message::decode(b"d7:Command5:punche"),
        Err(Error::UnknownCommand(_))
    ));
}

#[test]
fn test_foreign_content_is_skipped() -> Result<()> {
    // Unknown keys, integer values, nested containers: all ignored.
    let message = Message::decode(
        b"d3:Agei31e7:Command4:ping5:Extrali1eli2eee2:Id1:05:Nonced1:k1:vee",
    )?;
    assert_eq!(message.command, Command::Ping);
    assert_eq!(message.id, "0");

    // A known key bound to a non-string value keeps its default.
    let message = Message::decode(b"d7:Command4:ping5:Queryi7ee")?;
    assert_eq!(message.query, "");

    Ok(())
}

#[test]
fn test_error_table() {
    for tag in [
        "unsupported",
        "access_denied",
        "unknown_swarm",
        "no_relay",
        "no_address",
        "throttled",
    ] {
        let error = ServerError::from_tag(tag).unwrap();
        assert!(!error.text().is_empty());
    }

    assert_eq!(ServerError::from_tag("flooded"), None);
}
