//! File-backed local event store consulted before any relay.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Result};
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde_json::to_writer;
use sha2::{Digest, Sha256};

use crate::{
    coordinate::Coordinate,
    event::{is_hex64, Event},
};

/// Persistent store rooted at `root`.
///
/// Layout:
/// - `events/ab/cd/<id>.json` – one file per event
/// - `latest/<sha256(coordinate)>` – id of the newest event for an
///   addressable or replaceable coordinate
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
    verify_sig: bool,
}

impl Store {
    /// Create a new store rooted at `root`.
    pub fn new(root: PathBuf, verify_sig: bool) -> Self {
        Self { root, verify_sig }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        for d in ["events", "latest"] {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    /// Persist an event. Returns `false` when it was already stored.
    ///
    /// The `latest` pointer for a coordinate only moves to an event with a
    /// strictly greater `created_at`.
    pub fn ingest(&self, ev: &Event) -> Result<bool> {
        if !is_hex64(&ev.id) {
            bail!("invalid event id `{}`", ev.id);
        }
        if self.verify_sig {
            verify_event(ev)?;
        }
        let path = self.event_path(&ev.id);
        if path.exists() {
            return Ok(false);
        }
        let parent_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent_dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
        to_writer(&tmp, ev)?;
        tmp.persist(&path)?;

        if ev.is_addressable() || ev.is_replaceable() {
            self.update_latest(ev)?;
        }
        Ok(true)
    }

    /// Load an event by id.
    pub fn get(&self, id: &str) -> Result<Option<Event>> {
        if !is_hex64(id) {
            return Ok(None);
        }
        read_event(&self.event_path(id))
    }

    /// Newest stored event for `(kind, pubkey, identifier)`.
    pub fn latest(&self, coord: &Coordinate) -> Result<Option<Event>> {
        let pointer = self.latest_path(coord);
        let Ok(id) = fs::read_to_string(&pointer) else {
            return Ok(None);
        };
        self.get(id.trim())
    }

    fn update_latest(&self, ev: &Event) -> Result<()> {
        let coord = Coordinate::of(ev);
        if let Some(current) = self.latest(&coord)? {
            if current.created_at >= ev.created_at {
                return Ok(());
            }
        }
        let pointer = self.latest_path(&coord);
        let parent = pointer
            .parent()
            .ok_or_else(|| anyhow!("missing parent directory for latest pointer"))?;
        fs::create_dir_all(parent)?;
        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        fs::write(tmp.path(), &ev.id)?;
        tmp.persist(&pointer)?;
        Ok(())
    }

    /// Compute the canonical path for an event ID.
    fn event_path(&self, id: &str) -> PathBuf {
        self.root
            .join("events")
            .join(&id[0..2])
            .join(&id[2..4])
            .join(format!("{id}.json"))
    }

    /// Identifiers are arbitrary text, so pointers are named by digest.
    fn latest_path(&self, coord: &Coordinate) -> PathBuf {
        let digest = Sha256::digest(coord.to_string().as_bytes());
        self.root.join("latest").join(hex::encode(digest))
    }
}

fn read_event(path: &Path) -> Result<Option<Event>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

/// Recompute the Nostr event hash from its fields.
pub(crate) fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// Verify an event's ID and Schnorr signature.
pub fn verify_event(ev: &Event) -> Result<()> {
    let hash = event_hash(ev)?;
    let calc_id = hex::encode(hash);
    if calc_id != ev.id {
        return Err(anyhow!("id mismatch"));
    }
    let sig = Signature::from_slice(&hex::decode(&ev.sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey)?)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(&hash)?;
    secp.verify_schnorr(&sig, &msg, &pk)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{event, hex_id, pubkey};
    use secp256k1::Keypair;
    use tempfile::TempDir;

    fn store(verify: bool) -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().to_path_buf(), verify);
        store.init().unwrap();
        (dir, store)
    }

    fn signed_event(kind: u32) -> Event {
        let secp = Secp256k1::new();
        let kp = Keypair::from_seckey_slice(&secp, &[1u8; 32]).unwrap();
        let mut ev = Event {
            id: String::new(),
            pubkey: hex::encode(kp.x_only_public_key().0.serialize()),
            kind,
            created_at: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        };
        let hash = event_hash(&ev).unwrap();
        ev.id = hex::encode(hash);
        let msg = Message::from_digest_slice(&hash).unwrap();
        ev.sig = hex::encode(secp.sign_schnorr_no_aux_rand(&msg, &kp).as_ref());
        ev
    }

    #[test]
    fn ingest_is_idempotent_and_readable() {
        let (_dir, store) = store(false);
        let ev = event(&hex_id(1), &pubkey(1), 1, 5, &[]);
        assert!(store.ingest(&ev).unwrap());
        assert!(!store.ingest(&ev).unwrap());
        assert_eq!(store.get(&ev.id).unwrap(), Some(ev));
        assert_eq!(store.get(&hex_id(2)).unwrap(), None);
        assert_eq!(store.get("short").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_ids() {
        let (_dir, store) = store(false);
        assert!(store.ingest(&event("ab", &pubkey(1), 1, 5, &[])).is_err());
    }

    #[test]
    fn latest_pointer_only_moves_forward() {
        let (_dir, store) = store(false);
        let pk = pubkey(2);
        let older = event(&hex_id(1), &pk, 30023, 10, &[&["d", "a:b/c"]]);
        let newer = event(&hex_id(2), &pk, 30023, 20, &[&["d", "a:b/c"]]);
        let tie = event(&hex_id(3), &pk, 30023, 20, &[&["d", "a:b/c"]]);
        store.ingest(&newer).unwrap();
        store.ingest(&older).unwrap();
        store.ingest(&tie).unwrap();
        let coord = Coordinate::new(30023, pk.clone(), "a:b/c");
        assert_eq!(store.latest(&coord).unwrap().unwrap().id, newer.id);
        assert!(store
            .latest(&Coordinate::new(30023, pk, "missing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn immutable_events_get_no_pointer() {
        let (dir, store) = store(false);
        store
            .ingest(&event(&hex_id(1), &pubkey(1), 1, 5, &[&["d", "x"]]))
            .unwrap();
        assert_eq!(fs::read_dir(dir.path().join("latest")).unwrap().count(), 0);
    }

    #[test]
    fn verification_accepts_signed_and_rejects_tampered() {
        let (_dir, store) = store(true);
        let ev = signed_event(1);
        assert!(store.ingest(&ev).unwrap());

        let mut bad_sig = signed_event(2);
        let flipped = if bad_sig.sig.starts_with("00") { "11" } else { "00" };
        bad_sig.sig.replace_range(0..2, flipped);
        assert!(store.ingest(&bad_sig).is_err());

        let mut bad_id = signed_event(3);
        bad_id.content = "changed".into();
        assert!(store.ingest(&bad_id).is_err());
    }
}
