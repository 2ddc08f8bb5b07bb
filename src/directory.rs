use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{info, warn};
use ndarray::Array1;
use serde::Deserialize;
use std::time::Duration;

use crate::{Embedding, EMBEDDING_DIM};

/// One identity as the directory service serves it. Each reference photo
/// yields one encoding record.
#[derive(Debug, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub encodings: Vec<EncodingRecord>,
}

#[derive(Debug, Deserialize)]
pub struct EncodingRecord {
    /// Base64 text wrapping the serialized embedding vector; may be absent
    /// for records whose photo never produced an encoding.
    pub encoding: Option<String>,
}

/// Why a single encoding record was skipped during sync.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid vector payload: {0}")]
    Payload(#[from] postcard::Error),
    #[error("expected a {expected}-dimension embedding, got {got}")]
    Dimension { expected: usize, got: usize },
}

/// Immutable snapshot of the known identities: three columns in lockstep,
/// one row per reference embedding. Identities with several reference photos
/// occupy several rows.
#[derive(Debug, Default)]
pub struct Roster {
    ids: Vec<i64>,
    embeddings: Vec<Embedding>,
    names: Vec<String>,
}

impl Roster {
    pub fn push(&mut self, id: i64, name: String, embedding: Embedding) {
        self.ids.push(id);
        self.names.push(name);
        self.embeddings.push(embedding);
    }

    /// Number of reference embeddings (rows), not distinct identities.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.ids.len(), self.embeddings.len());
        debug_assert_eq!(self.ids.len(), self.names.len());
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn identity(&self, index: usize) -> (i64, &str) {
        (self.ids[index], &self.names[index])
    }

    pub fn distinct_identities(&self) -> usize {
        let mut ids = self.ids.clone();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

/// Decode one transport-encoded embedding: base64 text, then serialized
/// f32 vector bytes, then a dimension check.
pub fn decode_encoding(text: &str) -> Result<Embedding, DecodeError> {
    let bytes = BASE64.decode(text)?;
    let vector: Vec<f32> = postcard::from_bytes(&bytes)?;
    if vector.len() != EMBEDDING_DIM {
        return Err(DecodeError::Dimension {
            expected: EMBEDDING_DIM,
            got: vector.len(),
        });
    }
    Ok(Embedding {
        vector: Array1::from_vec(vector),
    })
}

/// Fold user records into a roster, skipping records that fail to decode.
/// Partial success is the norm; a bad record never blocks its siblings.
pub fn build_roster(users: Vec<UserRecord>) -> Roster {
    let mut roster = Roster::default();
    for user in users {
        for record in &user.encodings {
            let Some(text) = record.encoding.as_deref() else {
                continue;
            };
            match decode_encoding(text) {
                Ok(embedding) => roster.push(user.id, user.name.clone(), embedding),
                Err(err) => warn!("skipping bad encoding for user {}: {}", user.id, err),
            }
        }
    }
    roster
}

pub struct DirectoryClient {
    base_url: String,
    agent: ureq::Agent,
}

impl DirectoryClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(10))
                .build(),
        }
    }

    /// Fetch all identities once. A transport failure degrades to an empty
    /// roster so the session still starts, with everyone unknown.
    pub fn sync(&self) -> Roster {
        match self.fetch_users() {
            Ok(users) => {
                let roster = build_roster(users);
                info!(
                    "Loaded {} reference embeddings for {} identities",
                    roster.len(),
                    roster.distinct_identities()
                );
                roster
            }
            Err(err) => {
                warn!("Failed to sync with directory: {:#}", err);
                Roster::default()
            }
        }
    }

    fn fetch_users(&self) -> Result<Vec<UserRecord>> {
        let url = format!("{}/users/", self.base_url);
        let response = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("fetching {}", url))?;
        serde_json::from_reader(response.into_reader()).context("parsing directory response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(vector: Vec<f32>) -> String {
        BASE64.encode(postcard::to_allocvec(&vector).unwrap())
    }

    fn user(id: i64, name: &str, encodings: Vec<Option<String>>) -> UserRecord {
        UserRecord {
            id,
            name: name.to_string(),
            encodings: encodings
                .into_iter()
                .map(|encoding| EncodingRecord { encoding })
                .collect(),
        }
    }

    #[test]
    fn decode_roundtrip() {
        let vector: Vec<f32> = (0..EMBEDDING_DIM).map(|i| i as f32 / 128.0).collect();
        let embedding = decode_encoding(&encoded(vector.clone())).unwrap();
        assert_eq!(embedding.vector.len(), EMBEDDING_DIM);
        assert_eq!(embedding.vector[5], vector[5]);
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(matches!(
            decode_encoding("not valid base64!!!"),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn decode_rejects_wrong_dimension() {
        let err = decode_encoding(&encoded(vec![1.0, 2.0, 3.0])).unwrap_err();
        assert!(matches!(err, DecodeError::Dimension { got: 3, .. }));
    }

    #[test]
    fn one_bad_record_never_blocks_siblings() {
        let good = vec![0.5f32; EMBEDDING_DIM];
        let users = vec![
            user(
                1,
                "Alice",
                vec![
                    Some(encoded(good.clone())),
                    Some("garbage".to_string()),
                    Some(encoded(good.clone())),
                ],
            ),
            user(2, "Bob", vec![None, Some(encoded(good))]),
        ];
        let roster = build_roster(users);
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.distinct_identities(), 2);
        assert_eq!(roster.identity(0), (1, "Alice"));
        assert_eq!(roster.identity(2), (2, "Bob"));
    }

    #[test]
    fn roster_columns_stay_in_lockstep() {
        let users = vec![user(
            7,
            "Carol",
            vec![Some(encoded(vec![0.0; EMBEDDING_DIM])); 4],
        )];
        let roster = build_roster(users);
        assert_eq!(roster.len(), 4);
        assert_eq!(roster.embeddings().len(), 4);
        for i in 0..roster.len() {
            assert_eq!(roster.identity(i), (7, "Carol"));
        }
    }

    #[test]
    fn payload_shape_is_tolerated() {
        // Records without encodings, and null encodings, parse cleanly.
        let raw = r#"[
            {"id": 1, "name": "Alice", "encodings": [{"encoding": null}]},
            {"id": 2, "name": "Bob"}
        ]"#;
        let users: Vec<UserRecord> = serde_json::from_str(raw).unwrap();
        let roster = build_roster(users);
        assert!(roster.is_empty());
    }
}
