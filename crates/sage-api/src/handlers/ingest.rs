//! Document ingestion endpoint.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use sage_core::CollectionRef;
use sage_search::IngestReport;

use crate::error::ApiError;
use crate::identity::Identity;
use crate::state::AppState;

/// `POST /api/v1/collections/:name/documents`
///
/// Multipart body with one `file` field. Re-uploading a document replaces
/// its earlier chunks. Cached answers are dropped afterwards.
pub async fn upload_document(
    State(state): State<AppState>,
    Identity(principal): Identity,
    Path(name): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestReport>), ApiError> {
    if CollectionRef::from_collection_name(&name).is_none() {
        return Err(ApiError::BadRequest(format!(
            "Unknown collection '{}': expected global_knowledge, documents, or category_<slug>",
            name
        )));
    }

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(String::from)
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| ApiError::BadRequest("File field has no filename".into()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
        upload = Some((filename, data.to_vec()));
        break;
    }

    let (filename, data) =
        upload.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".into()))?;
    if data.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".into()));
    }

    let report = state.ingestor.ingest_file(&name, &filename, &data).await?;
    state.cache.invalidate_all().await;

    info!(
        user_id = %principal.id,
        collection = %report.collection,
        document = %report.document_name,
        chunk_count = report.chunks,
        "Document ingested"
    );
    Ok((StatusCode::CREATED, Json(report)))
}
