#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_core::PathAddress;

fuzz_target!(|text: &str| {
    if let Ok(path) = PathAddress::parse(text) {
        // Printing and re-parsing is stable
        let printed = path.to_string();
        let reparsed = PathAddress::parse(&printed).expect("printed path must parse");
        assert_eq!(reparsed, path);

        let mut cursor = path.clone();
        cursor.reset();
        while !cursor.is_final() {
            let _ = cursor.value();
            cursor.increment();
        }
        assert_eq!(cursor.cursor(), path.len());
    }
});
