use anyhow::Result;
use kad_server_codec::message::{Body, Message, WireError};
use kad_server_codec::payload::{self, CallArgs, ReplyValue};
use kad_server_codec::{Addr, Distance, Error, Id, Node, Value};

fn node(id: u64, port: u16) -> Node {
    Node::new(Id::from(id), Addr::new("127.0.0.1", port))
}

#[test]
fn test_id_forms() -> Result<()> {
    let id = Id::from_decimal("123456789012345678901234567890")?;

    assert_eq!(Id::from_le_bytes(id.to_le_bytes()), id);
    assert_eq!(id.to_string().parse::<Id>()?, id);
    assert_eq!("42".parse::<Id>()?, Id::from(42u64));
    assert_eq!(Id::from(1u64).to_string().len(), 32);

    assert!(Id::from_decimal("").is_err());
    assert!(Id::from_decimal("12a").is_err());
    // 2^160 is one past the top of the id space.
    assert!(Id::from_decimal("1461501637330902918203684832716283019655932542976").is_err());
    assert!(Id::from_decimal("1461501637330902918203684832716283019655932542975").is_ok());

    Ok(())
}

#[test]
fn test_xor_metric() {
    let a = Id::from(5u64);
    let b = Id::from(3u64);

    assert_eq!(a.xor(&a), Distance::ZERO);
    assert_eq!(a.xor(&b), b.xor(&a));
    assert_eq!(a.xor(&b), Id::from(6u64).xor(&Id::MIN));
    assert!(Id::from(2u64).xor(&Id::MIN) < Id::from(3u64).xor(&Id::MIN));
    assert!(Id::from(2u64) < Id::from(3u64));
}

#[test]
fn test_id_bits() {
    let id = Id::MIN.with_bit(0);

    assert!(id.bit(0));
    assert!(!id.bit(1));
    assert!(!Id::MIN.shares_prefix(&id, 1));
    assert!(Id::MIN.shares_prefix(&id, 0));
    assert!(Id::from(6u64).shares_prefix(&Id::from(7u64), 158));
    assert!(!Id::from(6u64).shares_prefix(&Id::from(7u64), 160));

    // Walking past the top of the id space is detected.
    assert_eq!(Id::MIN.checked_add_pow2(159), Some(id));
    assert_eq!(id.checked_add_pow2(159), None);
    assert_eq!(
        Id::MIN.checked_add_pow2(3),
        Some(Id::from(8u64)),
    );
}

#[test]
fn test_node_equality_by_id() {
    let a = node(1, 7000);
    let b = node(1, 8000);
    let c = node(2, 7000);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(Node::from_value(&a.to_value()).unwrap().addr.port, 7000);
}

#[test]
fn test_call_round_trips() {
    let caller = node(7, 7890);
    let calls = [
        CallArgs::Ping,
        CallArgs::Store {
            key: Id::from(42u64),
            value: b"hello".to_vec(),
        },
        CallArgs::FindNode { id: Id::from(9u64) },
        CallArgs::FindValue { id: Id::from(9u64) },
    ];

    for (id, args) in calls.into_iter().enumerate() {
        let func = args.func();
        let message = Message::call(id as u64, caller.clone(), func, args.clone().into_values());
        let decoded = Message::decode(&message.encode()).unwrap();

        assert_eq!(decoded, message);
        match decoded.body {
            Body::Call {
                caller: decoded_caller,
                args: values,
            } => {
                assert_eq!(decoded_caller, caller);
                assert_eq!(CallArgs::from_values(func, &values).unwrap(), args);
            }
            Body::Reply(_) => unreachable!(),
        }
    }
}

#[test]
fn test_reply_round_trips() {
    let replies = [
        (payload::PING, ReplyValue::Pong),
        (payload::STORE, ReplyValue::Stored),
        (
            payload::FIND_NODE,
            ReplyValue::Nodes(vec![node(1, 7001), node(2, 7002)]),
        ),
        (payload::FIND_VALUE, ReplyValue::Value(b"world".to_vec())),
        (payload::FIND_VALUE, ReplyValue::Nodes(vec![node(3, 7003)])),
    ];

    for (id, (func, reply)) in replies.into_iter().enumerate() {
        let message = Message::reply(id as u64, func.to_string(), Ok(reply.clone().into_value()));
        let decoded = Message::decode(&message.encode()).unwrap();

        assert_eq!(decoded, message);
        match decoded.body {
            Body::Reply(Ok(value)) => {
                assert_eq!(ReplyValue::from_value(func, &value).unwrap(), reply);
            }
            _ => unreachable!(),
        }
    }
}

#[test]
fn test_error_replies() {
    for error in [
        WireError::NoSuchRpc,
        WireError::Handler("lookup failed".to_string()),
    ] {
        let message = Message::reply(9, payload::PING.to_string(), Err(error.clone()));
        match Message::decode(&message.encode()).unwrap().body {
            Body::Reply(Err(decoded)) => assert_eq!(decoded, error),
            _ => unreachable!(),
        }
    }
}

#[test]
fn test_unknown_function_still_decodes() {
    let message = Message::call(3, node(7, 7890), "frobnicate", vec![Value::from(1u64)]);
    let decoded = Message::decode(&message.encode()).unwrap();

    assert_eq!(decoded.func, "frobnicate");
    match decoded.body {
        Body::Call { args, .. } => {
            assert_eq!(
                CallArgs::from_values("frobnicate", &args),
                Err(Error::Schema("unknown function")),
            );
        }
        Body::Reply(_) => unreachable!(),
    }
}

#[test]
fn test_malformed_frames() {
    assert_eq!(Message::decode(&[]), Err(Error::BadFrame));
    assert_eq!(Message::decode(&[0xc1, 0xff, 0x00]), Err(Error::BadFrame));

    let frame = Message::call(1, node(7, 7890), payload::PING, Vec::new()).encode();
    for cut in 1..frame.len() {
        assert!(Message::decode(&frame[..cut]).is_err());
    }

    // Well-formed MessagePack with the wrong shape.
    let bogus = rmp_serde::to_vec(&(1u64, true, "ping", 5u64)).unwrap();
    assert!(matches!(Message::decode(&bogus), Err(Error::Schema(_))));
}

#[test]
fn test_args_validation() {
    assert!(CallArgs::from_values(payload::PING, &[Value::from(1u64)]).is_err());
    assert!(CallArgs::from_values(payload::STORE, &[Value::from(1u64)]).is_err());
    assert!(
        CallArgs::from_values(payload::FIND_NODE, &[Value::from("nope")]).is_err()
    );
    assert!(ReplyValue::from_value(payload::FIND_NODE, &Value::from(1u64)).is_err());
}
