//! Control HTTP server
//!
//! Operator endpoints for registering torrents, requesting pieces and
//! inspecting state.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use driftnet_core::torrent::{TorrentInfo, TorrentLayout};
use driftnet_core::{DriftnetError, EngineHandle, InfoHash, PieceIndex, TorrentError};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone)]
pub struct ControlState {
    pub engine: EngineHandle,
    /// Piece length for torrents registered without one
    pub default_piece_length: u32,
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/cmd_torrent_add", get(cmd_torrent_add))
        .route("/cmd_torrent_info", get(cmd_torrent_info))
        .route("/cmd_torrent_list", get(cmd_torrent_list))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct TorrentAddQuery {
    pub info_hash: String,
    pub total_pieces: u32,
    pub piece: u32,
    pub piece_length: Option<u32>,
    /// Content size in bytes; lets the last piece be shorter
    pub total_length: Option<u64>,
    /// Concatenated SHA-1 piece digests, 40 hex characters each
    pub piece_hashes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TorrentInfoQuery {
    pub info_hash: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TorrentAddResponse {
    pub info_hash: String,
    pub piece: u32,
    /// False when the piece was already wanted or already present
    pub added: bool,
}

/// Node error mapped onto an HTTP status.
#[derive(Debug)]
pub struct ControlError(pub DriftnetError);

impl ControlError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DriftnetError::Torrent(TorrentError::TorrentNotFound { .. }) => StatusCode::NOT_FOUND,
            DriftnetError::Torrent(TorrentError::DuplicateTorrent { .. }) => StatusCode::CONFLICT,
            DriftnetError::Torrent(TorrentError::EngineShutdown) => StatusCode::SERVICE_UNAVAILABLE,
            error if error.is_user_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TorrentError> for ControlError {
    fn from(error: TorrentError) -> Self {
        Self(error.into())
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Control request failed: {}", self.0);
        }
        let body = json!({
            "error": self.0.user_message(),
            "detail": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl TorrentAddQuery {
    /// Piece layout for registering the torrent, if it is new.
    fn layout(&self, default_piece_length: u32) -> Result<TorrentLayout, TorrentError> {
        let mut layout = TorrentLayout::new(
            self.total_pieces,
            self.piece_length.unwrap_or(default_piece_length),
        );
        if let Some(total_length) = self.total_length {
            layout = layout.with_total_length(total_length);
        }
        if let Some(text) = &self.piece_hashes {
            layout = layout.with_piece_hashes(TorrentLayout::parse_piece_hashes(text)?);
        }
        layout.validate()?;
        Ok(layout)
    }
}

/// Registers the torrent if it is new, then marks `piece` wanted.
///
/// Layout parameters are validated on every call but only take effect on the
/// first one, when the torrent is registered.
pub async fn cmd_torrent_add(
    State(state): State<ControlState>,
    Query(params): Query<TorrentAddQuery>,
) -> Result<Json<TorrentAddResponse>, ControlError> {
    let info_hash = InfoHash::from_hex(&params.info_hash)?;
    let layout = params.layout(state.default_piece_length)?;

    match state.engine.register_torrent(info_hash, layout).await {
        Ok(()) | Err(TorrentError::DuplicateTorrent { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    let added = state
        .engine
        .add_piece(info_hash, PieceIndex::new(params.piece))
        .await?;
    tracing::info!("Piece {} of {} requested (new: {})", params.piece, info_hash, added);

    Ok(Json(TorrentAddResponse {
        info_hash: info_hash.to_string(),
        piece: params.piece,
        added,
    }))
}

pub async fn cmd_torrent_info(
    State(state): State<ControlState>,
    Query(params): Query<TorrentInfoQuery>,
) -> Result<Json<TorrentInfo>, ControlError> {
    let info_hash = InfoHash::from_hex(&params.info_hash)?;
    Ok(Json(state.engine.torrent_info(info_hash).await?))
}

pub async fn cmd_torrent_list(
    State(state): State<ControlState>,
) -> Result<Json<Vec<TorrentInfo>>, ControlError> {
    Ok(Json(state.engine.list_torrents().await?))
}
