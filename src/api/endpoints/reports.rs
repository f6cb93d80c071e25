//! `POST /api/reports/upload`: accept a report and start processing it.
//!
//! The response only acknowledges the job. Results arrive on the user's
//! topic, so clients should subscribe before or right after uploading.

use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::pipeline::dispatch::Acknowledgement;
use crate::pipeline::extraction::ReportFile;

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

pub async fn upload(
    State(ctx): State<ApiContext>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<Acknowledgement>, ApiError> {
    if ctx.dispatcher.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }

    let mut file: Option<ReportFile> = None;
    let mut user_id = query.user_id;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {e}")))?;
                file = Some(ReportFile::new(file_name, content_type, bytes.to_vec()));
            }
            "userId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read userId: {e}")))?;
                if !text.trim().is_empty() {
                    user_id = Some(text);
                }
            }
            _ => {}
        }
    }

    let file = file
        .filter(|f| !f.bytes.is_empty())
        .ok_or_else(|| ApiError::BadRequest("A non-empty 'file' part is required".into()))?;

    tracing::info!(
        size = file.bytes.len(),
        content_type = file.content_type.as_deref().unwrap_or("unknown"),
        "Report upload received"
    );

    let submitted = ctx.dispatcher.submit(file, user_id);
    Ok(Json(submitted.ack))
}
