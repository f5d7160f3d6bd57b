#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tether_core::{EventId, Inbound, PathAddress, Value};
use tether_runtime::{RuntimeConfig, SyncRuntime};
use tether_transport::RecordingTransport;

#[derive(Arbitrary, Debug)]
enum Op {
    Set { field: u8, value: i32 },
    Append { key: u8 },
    Delete { key: u8 },
    Echo { id: u8 },
    RemoteSet { field: u8, value: bool },
    Rollback { id: u8 },
    Tick,
}

fn field(n: u8) -> String {
    format!("state.f{}", n % 8)
}

fuzz_target!(|ops: Vec<Op>| {
    let transport = RecordingTransport::new();
    let mut runtime = match SyncRuntime::new(RuntimeConfig::default(), transport.clone()) {
        Ok(runtime) => runtime,
        Err(_) => return,
    };
    let _ = runtime.receive(Inbound::Append {
        path: PathAddress::parse("state.items[_init]").expect("static path"),
        id: -1,
        primitive: false,
        key: "name".to_string(),
    });

    for op in ops {
        match op {
            Op::Set { field: n, value } => {
                let _ = runtime.set(field(n), i64::from(value));
            }
            Op::Append { key } => {
                let _ = runtime.append("state.items", Some(&format!("k{}", key % 8)), None);
            }
            Op::Delete { key } => {
                let _ = runtime.delete("state.items", &format!("k{}", key % 8));
            }
            Op::Echo { id } => {
                // Replay whatever was sent under this id
                let sent = transport.sent();
                if let Some(message) = sent.iter().find(|m| m.event_id() == Some(EventId::new(u64::from(id)))) {
                    if let (Some(path), tether_core::Outbound::Set { value, .. }) = (message.path(), message) {
                        let _ = runtime.receive(Inbound::Set {
                            path: path.clone(),
                            id: i64::from(id),
                            value: value.clone(),
                        });
                    }
                }
            }
            Op::RemoteSet { field: n, value } => {
                let _ = runtime.receive(Inbound::Set {
                    path: PathAddress::parse(&field(n)).expect("generated path"),
                    id: -1,
                    value: Value::Bool(value),
                });
            }
            Op::Rollback { id } => {
                runtime.rollback(EventId::new(u64::from(id)));
            }
            Op::Tick => {
                runtime.tick();
            }
        }
    }

    // Rolling everything back leaves no pending record behind
    runtime.rollback(EventId::ZERO);
    assert_eq!(runtime.journal().pending(), 0);
});
