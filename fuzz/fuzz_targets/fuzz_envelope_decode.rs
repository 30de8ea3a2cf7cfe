//! Fuzz target: `envelope::decode_for`
//!
//! Parses arbitrary bytes as a JSON note body and runs it through the
//! inbound command decoder. Anything that decodes must be addressed to
//! the fixed device id and survive a re-encode.
//!
//! cargo fuzz run fuzz_envelope_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use tankfleet::fleet::envelope;
use tankfleet::fleet::identity::DeviceId;

fuzz_target!(|data: &[u8]| {
    let Ok(doc) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    let me = DeviceId::new("dev:fuzz").unwrap();

    if let Ok(env) = envelope::decode_for(&doc, &me) {
        assert_eq!(env.target, me);
        let again = envelope::encode(&env).expect("decoded envelope must re-encode");
        assert_eq!(envelope::decode(&again).unwrap(), env);
    }
});
