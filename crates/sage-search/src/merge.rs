//! Cross-collection result merging.
//!
//! The same chunk can come back from several probes and several
//! collections. Merging keeps one copy per chunk id (the best score),
//! ranks by score, applies the similarity threshold, and caps the list.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use sage_core::{Chunk, QueryResult, SourceKind};

/// Convert a vector-store result into scored chunks.
///
/// Metadata keys `documentName`, `pageNumber`, and `chunkIndex` are read
/// when present; the stored id is kept as-is.
pub fn chunks_from_query(result: &QueryResult, kind: SourceKind) -> Vec<Chunk> {
    (0..result.len())
        .map(|i| {
            let metadata = result.metadatas.get(i).unwrap_or(&JsonValue::Null);
            let document_name = metadata
                .get("documentName")
                .and_then(JsonValue::as_str)
                .unwrap_or("unknown")
                .to_string();
            let page_number = metadata
                .get("pageNumber")
                .and_then(JsonValue::as_u64)
                .unwrap_or(1) as u32;
            let chunk_index = metadata
                .get("chunkIndex")
                .and_then(JsonValue::as_u64)
                .unwrap_or(i as u64) as usize;
            let distance = result.distances.get(i).copied().unwrap_or(1.0);

            Chunk {
                id: result.ids[i].clone(),
                text: result.texts.get(i).cloned().unwrap_or_default(),
                document_name,
                page_number,
                chunk_index,
                source_kind: kind,
                score: 1.0 - distance,
            }
        })
        .collect()
}

/// Keep the best-scoring copy of each chunk id, preserving first-seen order.
pub fn deduplicate_chunks(candidates: impl IntoIterator<Item = Chunk>) -> Vec<Chunk> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Chunk> = Vec::new();

    for chunk in candidates {
        match positions.get(&chunk.id) {
            Some(&pos) => {
                if chunk.score > unique[pos].score {
                    unique[pos] = chunk;
                }
            }
            None => {
                positions.insert(chunk.id.clone(), unique.len());
                unique.push(chunk);
            }
        }
    }

    unique
}

/// Stable sort by score, highest first.
pub fn sort_by_score(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Deduplicate, rank, drop scores below `threshold`, and keep at most `cap`.
pub fn merge_chunks(
    candidates: impl IntoIterator<Item = Chunk>,
    threshold: f32,
    cap: usize,
) -> Vec<Chunk> {
    let mut merged = deduplicate_chunks(candidates);
    sort_by_score(&mut merged);
    merged.retain(|c| c.score >= threshold);
    merged.truncate(cap);
    merged
}
