//! Open packets: composing, decomposing and verifying line handshakes.
//!
//! An open packet proves three things at once: the sender controls the
//! keys behind its hashname (signature), only the addressed recipient
//! can read it (sealed ephemeral key), and it is fresh (timestamp plus
//! strictly-increasing acceptance). Each side keeps its own
//! [`LocalHalf`] and learns a [`RemoteHalf`] from the peer's open; the
//! two halves together yield the line traffic keys.
//!
//! Wire shape of an open packet:
//!
//! ```text
//! outer header: { "type": "open", "open": b64(sealed eph key),
//!                 "iv": hex(nonce), "sig": b64(encrypted signature) }
//! outer body:   AEAD(inner packet) under a key derived from the eph key
//! inner header: { "to": recipient hashname, "at": unix millis,
//!                 "line": hex(sender's line id) }
//! inner body:   sender's long-term public keys (64 bytes)
//! ```

use crate::error::{Error, Result};
use crate::hashname::Hashname;
use crate::identity::{Identity, PublicKeys};
use crate::packet::{Header, Packet};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hashline_crypto::{
    AeadKey, AgreementPublic, AgreementSecret, LINE_ID_SIZE, LineKeys, Nonce, SealedKey,
    Signature, hash, random,
};
use rand_core::{CryptoRng, RngCore};

/// Packet type tag of outer open packets.
pub const OPEN_TYPE: &str = "open";

/// Current unix time in milliseconds, the clock open packets carry.
pub(crate) fn unix_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Our side of a line attempt: the token and ephemeral key we generated,
/// and the timestamp our open packet carries.
pub struct LocalHalf {
    /// Line identifier we generated; inbound line packets carry it.
    pub line_id: [u8; LINE_ID_SIZE],
    /// Timestamp stamped into our open packet, unix milliseconds.
    pub at: i64,
    ephemeral: AgreementSecret,
}

impl LocalHalf {
    /// Start a new line attempt at time `at`.
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R, at: i64) -> Self {
        Self {
            line_id: random::line_id(rng),
            at,
            ephemeral: AgreementSecret::generate(rng),
        }
    }
}

/// The peer's side of a line, learned from a verified open packet.
#[derive(Clone, Debug)]
pub struct RemoteHalf {
    /// Peer hashname, derived from the keys in the inner packet.
    pub hashname: Hashname,
    /// Peer long-term public keys.
    pub keys: PublicKeys,
    /// Peer ephemeral agreement key.
    pub ephemeral: AgreementPublic,
    /// Line identifier the peer generated; outbound line packets carry it.
    pub line_id: [u8; LINE_ID_SIZE],
    /// Timestamp of the peer's open packet, unix milliseconds.
    pub at: i64,
    /// Hashname the open was addressed to.
    pub to: Hashname,
}

impl RemoteHalf {
    /// Freshness and addressing checks, done on the reactor where the
    /// previously accepted timestamp is known.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeRejected`] when the open is addressed
    /// elsewhere, falls outside the clock skew bound, or is not strictly
    /// newer than the last accepted open from this peer.
    pub fn verify(
        &self,
        local: Hashname,
        last_accepted_at: Option<i64>,
        now_millis: i64,
        max_skew_millis: i64,
    ) -> Result<()> {
        if self.to != local {
            return Err(Error::HandshakeRejected("addressed to another hashname"));
        }
        if (now_millis - self.at).abs() > max_skew_millis {
            return Err(Error::HandshakeRejected("timestamp outside clock skew"));
        }
        if let Some(prev) = last_accepted_at {
            if self.at <= prev {
                return Err(Error::HandshakeRejected("not newer than accepted open"));
            }
        }
        Ok(())
    }
}

/// Build the open packet announcing `local` to the peer behind
/// `peer_keys`.
///
/// # Errors
///
/// Returns [`Error::Crypto`] when the peer's agreement key is degenerate.
pub fn compose_open<R: RngCore + CryptoRng>(
    rng: &mut R,
    identity: &Identity,
    peer_keys: &PublicKeys,
    local: &LocalHalf,
) -> Result<Packet> {
    let inner_header = Header {
        to: Some(peer_keys.hashname().to_string()),
        at: Some(local.at),
        line: Some(hex::encode(local.line_id)),
        ..Header::default()
    };
    let inner = Packet::new(inner_header, identity.keys().to_bytes().to_vec());
    let inner_bytes = inner.encode()?;

    let eph_public = local.ephemeral.public();
    let nonce = Nonce::generate(rng);

    // The same nonce is reused for the signature, under a different key.
    let inner_key = AeadKey::new(hash::derive_inner_key(eph_public.as_bytes()));
    let body = inner_key.encrypt(&nonce, &inner_bytes)?;

    let sealed = SealedKey::seal(rng, &peer_keys.agreement, eph_public.as_bytes())?;

    let signature = identity.signing().sign(&body);
    let sig_key = AeadKey::new(hash::derive_signature_key(
        eph_public.as_bytes(),
        &local.line_id,
    ));
    let sig_ct = sig_key.encrypt(&nonce, signature.as_bytes())?;

    let header = Header {
        open: Some(BASE64.encode(sealed.as_bytes())),
        iv: Some(hex::encode(nonce.as_bytes())),
        sig: Some(BASE64.encode(&sig_ct)),
        ..Header::of_type(OPEN_TYPE)
    };
    Ok(Packet::new(header, body))
}

/// Unwrap and authenticate a received open packet.
///
/// Performs every check that needs only the local identity: unsealing,
/// inner decryption, key-to-hashname binding and the signature. The
/// stateful freshness checks live in [`RemoteHalf::verify`].
///
/// # Errors
///
/// Returns [`Error::HandshakeRejected`] naming the first check that
/// failed; callers drop the packet either way.
pub fn decompose_open(identity: &Identity, pkt: &Packet) -> Result<RemoteHalf> {
    let header = pkt
        .header()
        .ok_or(Error::HandshakeRejected("missing header"))?;
    if header.typ.as_deref() != Some(OPEN_TYPE) {
        return Err(Error::HandshakeRejected("not an open packet"));
    }
    let open_b64 = header
        .open
        .as_ref()
        .ok_or(Error::HandshakeRejected("missing open field"))?;
    let iv_hex = header
        .iv
        .as_ref()
        .ok_or(Error::HandshakeRejected("missing iv field"))?;
    let sig_b64 = header
        .sig
        .as_ref()
        .ok_or(Error::HandshakeRejected("missing sig field"))?;

    let sealed_bytes = BASE64
        .decode(open_b64)
        .map_err(|_| Error::HandshakeRejected("open field not base64"))?;
    let sealed = SealedKey::from_bytes(&sealed_bytes)
        .map_err(|_| Error::HandshakeRejected("sealed key malformed"))?;
    let eph_bytes = sealed
        .unseal(identity.agreement())
        .map_err(|_| Error::HandshakeRejected("sealed key not addressed to us"))?;
    let ephemeral = AgreementPublic::from_slice(&eph_bytes)
        .map_err(|_| Error::HandshakeRejected("ephemeral key malformed"))?;

    let mut nonce_bytes = [0u8; hashline_crypto::NONCE_SIZE];
    hex::decode_to_slice(iv_hex, &mut nonce_bytes)
        .map_err(|_| Error::HandshakeRejected("iv malformed"))?;
    let nonce = Nonce::from_bytes(nonce_bytes);

    let inner_key = AeadKey::new(hash::derive_inner_key(ephemeral.as_bytes()));
    let inner_bytes = inner_key
        .decrypt(&nonce, &pkt.body)
        .map_err(|_| Error::HandshakeRejected("inner packet decryption failed"))?;
    let inner = Packet::decode(&inner_bytes)
        .map_err(|_| Error::HandshakeRejected("inner packet malformed"))?;
    let inner_header = inner
        .header()
        .ok_or(Error::HandshakeRejected("inner header missing"))?;

    let to: Hashname = inner_header
        .to
        .as_deref()
        .ok_or(Error::HandshakeRejected("inner to missing"))?
        .parse()
        .map_err(|_| Error::HandshakeRejected("inner to malformed"))?;
    let at = inner_header
        .at
        .ok_or(Error::HandshakeRejected("inner at missing"))?;
    let mut line_id = [0u8; LINE_ID_SIZE];
    hex::decode_to_slice(
        inner_header
            .line
            .as_deref()
            .ok_or(Error::HandshakeRejected("inner line missing"))?,
        &mut line_id,
    )
    .map_err(|_| Error::HandshakeRejected("inner line malformed"))?;

    let keys = PublicKeys::from_slice(&inner.body)
        .map_err(|_| Error::HandshakeRejected("key material invalid"))?;

    let sig_key = AeadKey::new(hash::derive_signature_key(ephemeral.as_bytes(), &line_id));
    let sig_ct = BASE64
        .decode(sig_b64)
        .map_err(|_| Error::HandshakeRejected("sig field not base64"))?;
    let sig_bytes = sig_key
        .decrypt(&nonce, &sig_ct)
        .map_err(|_| Error::HandshakeRejected("signature decryption failed"))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|_| Error::HandshakeRejected("signature malformed"))?;
    keys.verifying
        .verify(&pkt.body, &signature)
        .map_err(|_| Error::HandshakeRejected("signature invalid"))?;

    Ok(RemoteHalf {
        hashname: keys.hashname(),
        keys,
        ephemeral,
        line_id,
        at,
        to,
    })
}

/// Derive the line traffic keys once both halves are known.
///
/// # Errors
///
/// Returns [`Error::Crypto`] when the peer ephemeral key is a low-order
/// point; such a line must never be established.
pub fn derive_line_keys(local: &LocalHalf, remote: &RemoteHalf) -> Result<LineKeys> {
    let shared = local.ephemeral.agree(&remote.ephemeral)?;
    Ok(LineKeys::derive(&shared, &local.line_id, &remote.line_id))
}
