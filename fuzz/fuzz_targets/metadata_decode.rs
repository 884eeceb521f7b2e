//! Fuzz the CBOR attack surface of the persisted metadata document.
//!
//! Arbitrary bytes must never panic the decoder, and any document that
//! does decode must uphold the wrapped-key size invariant (enforced at
//! the deserialization boundary) and survive a re-encode round trip.

#![no_main]

use libfuzzer_sys::fuzz_target;

use latchkey_core::VaultMetadata;
use latchkey_crypto::WRAPPED_KEY_SIZE;

fuzz_target!(|data: &[u8]| {
    let Ok(metadata) = ciborium::de::from_reader::<VaultMetadata, _>(data) else {
        return;
    };

    // The size invariant holds for every blob that made it through.
    for header in metadata.headers.values() {
        assert_eq!(header.wrapped_key.len(), WRAPPED_KEY_SIZE);
    }
    assert_eq!(metadata.wrapped_root_key.len(), WRAPPED_KEY_SIZE);

    // Re-encode round trip.
    let mut encoded = Vec::new();
    ciborium::ser::into_writer(&metadata, &mut encoded).expect("re-encode failed");
    let decoded: VaultMetadata =
        ciborium::de::from_reader(&encoded[..]).expect("round trip failed");
    assert_eq!(decoded, metadata);
});
