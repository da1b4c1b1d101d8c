//! Migration graph and blob upgrade engine.
//!
//! The migrator keeps two views of the registered edges:
//!
//! - `steps`: source key -> typed upgrade function (decode, upgrade, encode)
//! - `edges`: source key -> target key, with no behaviour attached
//!
//! [`Migrator::apply`] walks `steps` and actually transforms data.
//! [`Migrator::validate_path`] walks `edges` only, so a boot-time or test-time
//! check can prove a chain is complete without constructing any payloads.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, trace};

use super::{KIND_FIELD, Migratable, Payload, SchemaKey, UpgradeError, VERSION_FIELD};

/// Upper bound on hops taken by a single [`Migrator::apply`] call.
pub const MAX_MIGRATION_DEPTH: usize = 100;

/// Failure inside one hop of a migration chain.
#[derive(Debug, Error)]
pub enum HopError {
    /// Stored data did not decode into the source revision.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The payload's own upgrade logic failed.
    #[error("upgrade failed: {0}")]
    Upgrade(#[source] UpgradeError),

    /// The upgraded value could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors raised by the migrator.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// No registered edge leaves the current schema.
    #[error("no migration path from {from} to {target}")]
    MigrationPathNotFound { from: SchemaKey, target: SchemaKey },

    /// The registered edges loop back on themselves before reaching the target.
    #[error("migration cycle detected at {at} while searching for {target}")]
    MigrationCycle { at: SchemaKey, target: SchemaKey },

    /// More than [`MAX_MIGRATION_DEPTH`] hops were taken without reaching the target.
    #[error("exceeded max migration depth of {max} hops towards {target}", max = MAX_MIGRATION_DEPTH)]
    MaxMigrationDepth { target: SchemaKey },

    /// An edge could not be registered. Raised as a panic by [`Migrator::register`].
    #[error("invalid migration registration for {source_key}: {reason}")]
    InvalidHandlerRegistration {
        source_key: SchemaKey,
        reason: &'static str,
    },

    /// The blob is not JSON, not an object, or lacks `kind`/`apiVersion`.
    #[error("invalid blob envelope: {0}")]
    InvalidEnvelope(String),

    /// The payload does not serialize to a JSON object.
    #[error("payload {0} does not serialize to a JSON object")]
    NotAnObject(SchemaKey),

    /// One hop of the chain failed; no partial result is returned.
    #[error("migration hop {from} -> {to} failed: {source}")]
    Hop {
        from: SchemaKey,
        to: SchemaKey,
        #[source]
        source: HopError,
    },

    /// The final payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for migrator operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

type StepFn = Box<dyn Fn(Value) -> std::result::Result<Value, HopError> + Send + Sync>;

struct Step {
    target: SchemaKey,
    run: StepFn,
}

/// Registry of upgrade edges between payload revisions.
///
/// Built once at process start and shared read-only afterwards.
#[derive(Default)]
pub struct Migrator {
    steps: HashMap<SchemaKey, Step>,
    edges: HashMap<SchemaKey, SchemaKey>,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator").field("edges", &self.edges).finish()
    }
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the edge `C -> C::Next`.
    ///
    /// # Panics
    ///
    /// Panics if an edge from `C`'s schema is already registered, or if `C`
    /// and `C::Next` share a schema key. Both are programming errors that
    /// should surface at startup.
    pub fn register<C: Migratable>(&mut self) -> &mut Self {
        if let Err(e) = self.try_register::<C>() {
            panic!("{e}");
        }
        self
    }

    /// Registers the edge `C -> C::Next`, returning an error instead of panicking.
    pub fn try_register<C: Migratable>(&mut self) -> Result<()> {
        let run: StepFn = Box::new(|value| {
            let current: C = serde_json::from_value(value).map_err(HopError::Decode)?;
            let next = current.upgrade().map_err(HopError::Upgrade)?;
            serde_json::to_value(&next).map_err(HopError::Encode)
        });
        self.insert_step(C::schema_key(), <C::Next as Payload>::schema_key(), run)
    }

    fn insert_step(&mut self, source: SchemaKey, target: SchemaKey, run: StepFn) -> Result<()> {
        if source == target {
            return Err(MigrationError::InvalidHandlerRegistration {
                source_key: source,
                reason: "source and target are the same schema",
            });
        }
        if self.steps.contains_key(&source) {
            return Err(MigrationError::InvalidHandlerRegistration {
                source_key: source,
                reason: "a migration from this schema is already registered",
            });
        }

        trace!(%source, %target, "registered migration");
        self.edges.insert(source.clone(), target.clone());
        self.steps.insert(source, Step { target, run });
        Ok(())
    }

    /// Upgrades `blob` until it conforms to `Target`'s schema.
    ///
    /// Returns the re-encoded blob with `kind`/`apiVersion` headers matching
    /// `Target`. A blob already at `Target`'s schema is returned unchanged in
    /// content.
    pub fn apply<Target: Payload>(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let (mut fields, key) = self.apply_fields(blob, &Target::schema_key())?;
        insert_headers(&mut fields, &key);
        Ok(serde_json::to_vec(&Value::Object(fields))?)
    }

    /// Upgrades `blob` to `Target`'s schema and deserializes it.
    pub fn decode<Target: Payload>(&self, blob: &[u8]) -> Result<Target> {
        let (fields, _) = self.apply_fields(blob, &Target::schema_key())?;
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    /// Checks, without running any upgrade, that a chain of registered edges
    /// leads from `Start`'s schema to `End`'s.
    pub fn validate_path<Start: Payload, End: Payload>(&self) -> Result<()> {
        self.validate_key_path(&Start::schema_key(), &End::schema_key())
    }

    /// Key-level form of [`Migrator::validate_path`].
    pub fn validate_key_path(&self, start: &SchemaKey, end: &SchemaKey) -> Result<()> {
        let mut current = start.clone();
        let mut visited = HashSet::new();

        while &current != end {
            if !visited.insert(current.clone()) {
                return Err(MigrationError::MigrationCycle {
                    at: current,
                    target: end.clone(),
                });
            }
            match self.edges.get(&current) {
                Some(next) => current = next.clone(),
                None => {
                    return Err(MigrationError::MigrationPathNotFound {
                        from: current,
                        target: end.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Runs the chain and returns the final payload fields (headers stripped)
    /// together with the schema they conform to.
    fn apply_fields(&self, blob: &[u8], target: &SchemaKey) -> Result<(Map<String, Value>, SchemaKey)> {
        let value: Value = serde_json::from_slice(blob)
            .map_err(|e| MigrationError::InvalidEnvelope(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(MigrationError::InvalidEnvelope(
                "blob is not a JSON object".to_string(),
            ));
        };
        let mut current = take_headers(&mut fields)?;
        let start = current.clone();
        let mut hops = 0usize;

        while &current != target {
            if hops >= MAX_MIGRATION_DEPTH {
                return Err(MigrationError::MaxMigrationDepth {
                    target: target.clone(),
                });
            }
            let Some(step) = self.steps.get(&current) else {
                return Err(MigrationError::MigrationPathNotFound {
                    from: current,
                    target: target.clone(),
                });
            };

            let upgraded = (step.run)(Value::Object(fields)).map_err(|source| MigrationError::Hop {
                from: current.clone(),
                to: step.target.clone(),
                source,
            })?;
            fields = match upgraded {
                Value::Object(mut next) => {
                    next.remove(KIND_FIELD);
                    next.remove(VERSION_FIELD);
                    next
                }
                _ => return Err(MigrationError::NotAnObject(step.target.clone())),
            };
            current = step.target.clone();
            hops += 1;
        }

        if hops > 0 {
            debug!(from = %start, to = %current, hops, "migrated blob");
        }
        Ok((fields, current))
    }
}

/// Serializes a payload into a blob, injecting `kind`/`apiVersion` headers.
///
/// Fails with [`MigrationError::NotAnObject`] if the payload serializes to
/// anything other than a JSON object.
pub fn new_blob<P: Payload>(payload: &P) -> Result<Vec<u8>> {
    let Value::Object(mut fields) = serde_json::to_value(payload)? else {
        return Err(MigrationError::NotAnObject(P::schema_key()));
    };
    insert_headers(&mut fields, &P::schema_key());
    Ok(serde_json::to_vec(&Value::Object(fields))?)
}

/// Reads only the `kind`/`apiVersion` headers of a blob.
pub fn peek_key(blob: &[u8]) -> Result<SchemaKey> {
    #[derive(serde::Deserialize)]
    struct Headers {
        kind: Option<String>,
        #[serde(rename = "apiVersion")]
        api_version: Option<String>,
    }

    let headers: Headers = serde_json::from_slice(blob)
        .map_err(|e| MigrationError::InvalidEnvelope(e.to_string()))?;
    match (headers.kind, headers.api_version) {
        (Some(kind), Some(version)) => Ok(SchemaKey::new(kind, version)),
        _ => Err(MigrationError::InvalidEnvelope(
            "missing kind or apiVersion".to_string(),
        )),
    }
}

fn take_headers(fields: &mut Map<String, Value>) -> Result<SchemaKey> {
    let kind = fields.remove(KIND_FIELD);
    let version = fields.remove(VERSION_FIELD);
    match (kind, version) {
        (Some(Value::String(kind)), Some(Value::String(version))) => {
            Ok(SchemaKey::new(kind, version))
        }
        _ => Err(MigrationError::InvalidEnvelope(
            "missing or non-string kind/apiVersion".to_string(),
        )),
    }
}

fn insert_headers(fields: &mut Map<String, Value>, key: &SchemaKey) {
    fields.insert(VERSION_FIELD.to_string(), Value::String(key.version.clone()));
    fields.insert(KIND_FIELD.to_string(), Value::String(key.kind.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobtypes::UpgradeError;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    // ─── Test payload chain: Note v1 -> v2 -> v3 ───

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct NoteV1 {
        text: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct NoteV2 {
        text: String,
        #[serde(default)]
        priority: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct NoteV3 {
        body: String,
        priority: i64,
        tags: Vec<String>,
    }

    impl Payload for NoteV1 {
        const KIND: &'static str = "Note";
        const VERSION: &'static str = "v1";
    }
    impl Payload for NoteV2 {
        const KIND: &'static str = "Note";
        const VERSION: &'static str = "v2";
    }
    impl Payload for NoteV3 {
        const KIND: &'static str = "Note";
        const VERSION: &'static str = "v3";
    }

    impl Migratable for NoteV1 {
        type Next = NoteV2;
        fn upgrade(self) -> std::result::Result<NoteV2, UpgradeError> {
            Ok(NoteV2 {
                text: self.text,
                priority: 1,
            })
        }
    }

    impl Migratable for NoteV2 {
        type Next = NoteV3;
        fn upgrade(self) -> std::result::Result<NoteV3, UpgradeError> {
            if self.text == "poison" {
                return Err("refusing to upgrade poison note".into());
            }
            Ok(NoteV3 {
                body: self.text,
                priority: self.priority,
                tags: Vec::new(),
            })
        }
    }

    fn note_migrator() -> Migrator {
        let mut m = Migrator::new();
        m.register::<NoteV1>().register::<NoteV2>();
        m
    }

    // ─── Cyclic chain: Loop v1 -> v2 -> v1, with v3 unreachable ───

    #[derive(Debug, Serialize, Deserialize)]
    struct LoopV1 {}
    #[derive(Debug, Serialize, Deserialize)]
    struct LoopV2 {}
    #[derive(Debug, Serialize, Deserialize)]
    struct LoopV3 {}

    impl Payload for LoopV1 {
        const KIND: &'static str = "Loop";
        const VERSION: &'static str = "v1";
    }
    impl Payload for LoopV2 {
        const KIND: &'static str = "Loop";
        const VERSION: &'static str = "v2";
    }
    impl Payload for LoopV3 {
        const KIND: &'static str = "Loop";
        const VERSION: &'static str = "v3";
    }
    impl Migratable for LoopV1 {
        type Next = LoopV2;
        fn upgrade(self) -> std::result::Result<LoopV2, UpgradeError> {
            Ok(LoopV2 {})
        }
    }
    impl Migratable for LoopV2 {
        type Next = LoopV1;
        fn upgrade(self) -> std::result::Result<LoopV1, UpgradeError> {
            Ok(LoopV1 {})
        }
    }

    // ─── Self edge and non-object payloads ───

    #[derive(Debug, Serialize, Deserialize)]
    struct SelfLoop {}
    impl Payload for SelfLoop {
        const KIND: &'static str = "Self";
        const VERSION: &'static str = "v1";
    }
    impl Migratable for SelfLoop {
        type Next = SelfLoop;
        fn upgrade(self) -> std::result::Result<SelfLoop, UpgradeError> {
            Ok(self)
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Bare(String);
    impl Payload for Bare {
        const KIND: &'static str = "Bare";
        const VERSION: &'static str = "v1";
    }

    // ─── Property tests ───

    proptest! {
        /// Every start revision reaches the latest revision with matching headers.
        #[test]
        fn apply_reaches_target_schema(text in "[a-zA-Z0-9 ]{0,40}") {
            prop_assume!(text != "poison");
            let m = note_migrator();
            let blob = new_blob(&NoteV1 { text: text.clone() }).unwrap();

            let upgraded = m.apply::<NoteV3>(&blob).unwrap();
            prop_assert_eq!(peek_key(&upgraded).unwrap(), NoteV3::schema_key());

            let v3: NoteV3 = m.decode(&upgraded).unwrap();
            prop_assert_eq!(v3, NoteV3 { body: text, priority: 1, tags: vec![] });
        }
    }

    // ─── Unit tests ───

    #[test]
    fn new_blob_injects_headers() {
        let blob = new_blob(&NoteV1 { text: "hi".into() }).unwrap();
        let value: Value = serde_json::from_slice(&blob).unwrap();
        assert_eq!(value["kind"], "Note");
        assert_eq!(value["apiVersion"], "v1");
        assert_eq!(value["text"], "hi");
    }

    #[test]
    fn new_blob_rejects_non_object_payload() {
        let err = new_blob(&Bare("x".into())).unwrap_err();
        assert!(matches!(err, MigrationError::NotAnObject(_)));
    }

    #[test]
    fn apply_at_target_is_identity() {
        let m = note_migrator();
        let blob = new_blob(&NoteV2 { text: "a".into(), priority: 7 }).unwrap();

        let out: NoteV2 = m.decode(&m.apply::<NoteV2>(&blob).unwrap()).unwrap();
        assert_eq!(out, NoteV2 { text: "a".into(), priority: 7 });
    }

    #[test]
    fn apply_intermediate_target_stops_early() {
        let m = note_migrator();
        let blob = new_blob(&NoteV1 { text: "a".into() }).unwrap();

        let out = m.apply::<NoteV2>(&blob).unwrap();
        assert_eq!(peek_key(&out).unwrap(), SchemaKey::new("Note", "v2"));
    }

    #[test]
    fn apply_without_edge_is_path_not_found() {
        let m = note_migrator();
        let blob = new_blob(&NoteV3 { body: "a".into(), priority: 0, tags: vec![] }).unwrap();

        let err = m.apply::<NoteV1>(&blob).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::MigrationPathNotFound { ref from, .. } if *from == NoteV3::schema_key()
        ));
    }

    #[test]
    fn failed_upgrade_names_the_hop() {
        let m = note_migrator();
        let blob = new_blob(&NoteV1 { text: "poison".into() }).unwrap();

        let err = m.apply::<NoteV3>(&blob).unwrap_err();
        match err {
            MigrationError::Hop { from, to, source: HopError::Upgrade(_) } => {
                assert_eq!(from, NoteV2::schema_key());
                assert_eq!(to, NoteV3::schema_key());
            }
            other => panic!("expected upgrade hop error, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_blob_fails_on_first_hop() {
        let m = note_migrator();
        let blob = br#"{"kind":"Note","apiVersion":"v1","text":42}"#;

        let err = m.apply::<NoteV3>(blob).unwrap_err();
        assert!(matches!(err, MigrationError::Hop { source: HopError::Decode(_), .. }));
    }

    #[test]
    fn blob_without_headers_is_invalid_envelope() {
        let m = note_migrator();
        let blobs: [&[u8]; 4] = [
            br#"{"text":"x"}"#,
            b"[1,2]",
            b"not json",
            br#"{"kind":1,"apiVersion":"v1"}"#,
        ];
        for blob in blobs {
            let err = m.apply::<NoteV3>(blob).unwrap_err();
            assert!(matches!(err, MigrationError::InvalidEnvelope(_)), "{err:?}");
        }
    }

    #[test]
    fn apply_over_cycle_hits_depth_limit() {
        let mut m = Migrator::new();
        m.register::<LoopV1>().register::<LoopV2>();
        let blob = new_blob(&LoopV1 {}).unwrap();

        let err = m.apply::<LoopV3>(&blob).unwrap_err();
        assert!(matches!(err, MigrationError::MaxMigrationDepth { .. }));
    }

    /// Chain `Chain v0 -> v1 -> ... -> v{len}` of pass-through hops.
    fn chain_migrator(len: usize) -> Migrator {
        let mut m = Migrator::new();
        for i in 0..len {
            m.insert_step(
                SchemaKey::new("Chain", format!("v{i}")),
                SchemaKey::new("Chain", format!("v{}", i + 1)),
                Box::new(Ok::<Value, HopError>),
            )
            .unwrap();
        }
        m
    }

    const CHAIN_START: &[u8] = br#"{"kind":"Chain","apiVersion":"v0","n":1}"#;

    #[test]
    fn chain_of_exactly_max_depth_succeeds() {
        let m = chain_migrator(MAX_MIGRATION_DEPTH);
        let target = SchemaKey::new("Chain", format!("v{MAX_MIGRATION_DEPTH}"));

        let (fields, key) = m.apply_fields(CHAIN_START, &target).unwrap();
        assert_eq!(key, target);
        assert_eq!(fields["n"], 1);
    }

    #[test]
    fn chain_one_past_max_depth_fails() {
        let len = MAX_MIGRATION_DEPTH + 1;
        let m = chain_migrator(len);
        let target = SchemaKey::new("Chain", format!("v{len}"));

        let err = m.apply_fields(CHAIN_START, &target).unwrap_err();
        assert!(matches!(err, MigrationError::MaxMigrationDepth { target: ref t } if *t == target));
        m.validate_key_path(&SchemaKey::new("Chain", "v0"), &target).unwrap();
    }

    #[test]
    fn validate_path_detects_cycle() {
        let mut m = Migrator::new();
        m.register::<LoopV1>().register::<LoopV2>();

        let err = m.validate_path::<LoopV1, LoopV3>().unwrap_err();
        assert!(matches!(err, MigrationError::MigrationCycle { .. }));
    }

    #[test]
    fn validate_path_detects_dead_end() {
        let mut m = Migrator::new();
        m.register::<NoteV1>();

        let err = m.validate_path::<NoteV1, NoteV3>().unwrap_err();
        assert!(matches!(
            err,
            MigrationError::MigrationPathNotFound { ref from, .. } if *from == NoteV2::schema_key()
        ));
    }

    #[test]
    fn validate_path_accepts_complete_chain() {
        let m = note_migrator();
        m.validate_path::<NoteV1, NoteV3>().unwrap();
        m.validate_path::<NoteV2, NoteV3>().unwrap();
        m.validate_path::<NoteV3, NoteV3>().unwrap();
    }

    #[test]
    fn try_register_rejects_duplicate_source() {
        let mut m = note_migrator();
        let err = m.try_register::<NoteV1>().unwrap_err();
        assert!(matches!(err, MigrationError::InvalidHandlerRegistration { .. }));
    }

    #[test]
    fn try_register_rejects_self_edge() {
        let mut m = Migrator::new();
        let err = m.try_register::<SelfLoop>().unwrap_err();
        assert!(matches!(err, MigrationError::InvalidHandlerRegistration { .. }));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn register_duplicate_panics() {
        let mut m = Migrator::new();
        m.register::<NoteV1>();
        m.register::<NoteV1>();
    }
}
