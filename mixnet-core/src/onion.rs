//! Onion construction and layer peeling.
//!
//! Each layer is a sealed box (see [`crate::crypto`]) around a JSON-encoded
//! [`HopDescriptor`]: `{"payload": base64(bytes), "address": "host:port"}`.
//! Building an onion wraps innermost (the recipient) first and outermost
//! (the first mix server) last; peeling reverses one wrap per mix hop.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::{seal, unseal};
use crate::error::{MixnetError, Result};

/// The cleartext that appears after peeling one onion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopDescriptor {
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub address: String,
}

impl HopDescriptor {
    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("HopDescriptor always serializes")
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| MixnetError::Crypto(format!("malformed hop descriptor: {e}")))
    }
}

mod base64_bytes {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        BASE64
            .decode(encoded)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 payload: {e}")))
    }
}

/// One hop in the onion, outermost-last in construction order: the public
/// key the layer is sealed to, and the address embedded in that layer's
/// hop descriptor (i.e. the address the *previous* hop's peel reveals).
pub struct Hop<'a> {
    pub public_key: &'a PublicKey,
    pub address: &'a str,
}

/// Build a full onion for `plaintext`.
///
/// `hops` must be ordered innermost-first: `hops[0]` is the recipient
/// (`address` is the recipient's own address), `hops[1]` is the last mix in
/// the chain, …, `hops[n-1]` is the first mix. The returned ciphertext is
/// what gets handed to the first mix server.
pub fn build_onion(plaintext: &[u8], hops: &[Hop<'_>]) -> Vec<u8> {
    assert!(!hops.is_empty(), "an onion needs at least a recipient hop");

    let mut ciphertext = plaintext.to_vec();
    for hop in hops {
        let descriptor = HopDescriptor {
            payload: ciphertext,
            address: hop.address.to_string(),
        };
        ciphertext = seal(hop.public_key, &descriptor.to_json_bytes());
    }
    ciphertext
}

/// Peel exactly one layer: decrypt under `secret`, then parse the plaintext
/// as a [`HopDescriptor`]. Used by both mix servers (to learn the next hop)
/// and the final recipient (to recover the original plaintext, whose
/// `address` field is then meaningless and ignored).
pub fn peel_layer(secret: &StaticSecret, ciphertext: &[u8]) -> Result<HopDescriptor> {
    let plaintext = unseal(secret, ciphertext)?;
    HopDescriptor::from_json_bytes(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn keypair() -> (StaticSecret, PublicKey) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        (secret, public)
    }

    #[test]
    fn three_hop_round_trip() {
        let (recipient_sk, recipient_pk) = keypair();
        let (mix3_sk, mix3_pk) = keypair();
        let (mix2_sk, mix2_pk) = keypair();
        let (mix1_sk, mix1_pk) = keypair();

        let hops = [
            Hop { public_key: &recipient_pk, address: "client2:50062" },
            Hop { public_key: &mix3_pk, address: "client2:50062" },
            Hop { public_key: &mix2_pk, address: "mix3:50053" },
            Hop { public_key: &mix1_pk, address: "mix2:50052" },
        ];

        let onion = build_onion(b"Hello, client2!", &hops);

        // mix1 peels, learns to forward to mix2
        let at_mix1 = peel_layer(&mix1_sk, &onion).unwrap();
        assert_eq!(at_mix1.address, "mix2:50052");

        let at_mix2 = peel_layer(&mix2_sk, &at_mix1.payload).unwrap();
        assert_eq!(at_mix2.address, "mix3:50053");

        let at_mix3 = peel_layer(&mix3_sk, &at_mix2.payload).unwrap();
        assert_eq!(at_mix3.address, "client2:50062");

        let at_recipient = peel_layer(&recipient_sk, &at_mix3.payload).unwrap();
        assert_eq!(at_recipient.payload, b"Hello, client2!");
    }

    #[test]
    fn single_hop_onion_to_self() {
        let (sk, pk) = keypair();
        let hops = [Hop { public_key: &pk, address: "self:1" }];
        let onion = build_onion(b"dummy", &hops);
        let peeled = peel_layer(&sk, &onion).unwrap();
        assert_eq!(peeled.payload, b"dummy");
    }

    #[test]
    fn wrong_hop_key_fails_to_peel() {
        let (_, recipient_pk) = keypair();
        let (wrong_sk, _) = keypair();
        let hops = [Hop { public_key: &recipient_pk, address: "x" }];
        let onion = build_onion(b"data", &hops);
        assert!(peel_layer(&wrong_sk, &onion).is_err());
    }

    #[test]
    fn descriptor_base64_round_trips() {
        let descriptor = HopDescriptor {
            payload: vec![0, 1, 2, 255],
            address: "127.0.0.1:9000".to_string(),
        };
        let encoded = descriptor.to_json_bytes();
        let decoded = HopDescriptor::from_json_bytes(&encoded).unwrap();
        assert_eq!(decoded, descriptor);
    }
}
