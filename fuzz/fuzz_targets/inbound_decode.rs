#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_core::Inbound;
use tether_runtime::{RuntimeConfig, SyncRuntime};
use tether_transport::{decode, RecordingTransport};

fuzz_target!(|data: &[u8]| {
    let message: Inbound = match decode(data) {
        Ok(message) => message,
        Err(_) => return,
    };
    let mut runtime = match SyncRuntime::new(RuntimeConfig::default(), RecordingTransport::new()) {
        Ok(runtime) => runtime,
        Err(_) => return,
    };
    // Any decoded message either applies or is rejected with an error
    let _ = runtime.receive(message);
    assert_eq!(runtime.stats().received, 1);
});
