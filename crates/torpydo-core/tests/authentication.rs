//! Property tests: sealed records never open under a wrong key or after
//! any single-bit modification.

use proptest::prelude::*;
use torpydo_core::crypto::{self, SealedBox, TAG_SIZE};
use torpydo_core::tor::TorConfig;
use torpydo_core::{Error, User};

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 16),
        prop::collection::vec(any::<u8>(), 24),
        prop::collection::vec(any::<u8>(), 32),
    ]
}

proptest! {
    #[test]
    fn test_flipped_ciphertext_bit_fails(
        key in key_strategy(),
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        index in any::<usize>(),
        bit in 0u8..8,
    ) {
        let mut sealed = crypto::encrypt(&plaintext, &key).expect("encrypt");
        let index = index % sealed.ciphertext.len();
        sealed.ciphertext[index] ^= 1 << bit;
        prop_assert!(matches!(crypto::decrypt(&sealed, &key), Err(Error::Authentication)));
    }

    #[test]
    fn test_flipped_tag_bit_fails(
        key in key_strategy(),
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        index in 0usize..TAG_SIZE,
        bit in 0u8..8,
    ) {
        let mut sealed = crypto::encrypt(&plaintext, &key).expect("encrypt");
        sealed.tag[index] ^= 1 << bit;
        prop_assert!(matches!(crypto::decrypt(&sealed, &key), Err(Error::Authentication)));
    }

    #[test]
    fn test_other_key_fails(
        key in key_strategy(),
        other in prop::collection::vec(any::<u8>(), 0..64),
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        prop_assume!(key != other);
        let sealed = crypto::encrypt(&plaintext, &key).expect("encrypt");
        prop_assert!(matches!(crypto::decrypt(&sealed, &other), Err(Error::Authentication)));
    }

    #[test]
    fn test_user_record_bit_flip_fails(
        contacts in prop::collection::btree_map("[a-z]{1,12}", prop::collection::vec(any::<u8>(), 1..48), 0..8),
        index in any::<usize>(),
        bit in 0u8..8,
    ) {
        let mut user = User::new("alice", TorConfig::new("/tmp/alice-tordata", 9050, 9051));
        for (name, key) in &contacts {
            user.add_contact(name, key);
        }
        let key = crypto::generate_key(16);
        let bytes = user.serialize_with_key(&key, false).expect("serialize");

        let mut sealed = SealedBox::from_bytes(&bytes).expect("outer record");
        let index = index % sealed.ciphertext.len();
        sealed.ciphertext[index] ^= 1 << bit;
        let tampered = sealed.to_bytes().expect("encode");

        prop_assert!(matches!(
            User::deserialize(&tampered, Some(key.as_slice())),
            Err(Error::Authentication)
        ));
    }
}
