//! Items CRUD handlers.

use crate::api::handlers::AppState;
use crate::api::models::{Item, ItemCreate, ItemUpdate, ListItemsQuery, Status};
use crate::core::error::{AppError, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

fn parse_item_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("invalid item id '{}'", raw)))
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Item {} not found", id))
}

/// `GET /items`
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListItemsQuery>,
) -> Result<Json<Vec<Item>>> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<Status>().map_err(AppError::BadRequest)?),
    };

    let items = state.items.list(query.limit, query.offset, status)?;
    tracing::debug!(count = items.len(), "Listed items");
    Ok(Json(items))
}

/// `GET /items/{id}`
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Item>> {
    let id = parse_item_id(&id)?;
    state.items.get(id).map(Json).ok_or_else(|| not_found(id))
}

/// `POST /items`
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ItemCreate>,
) -> Result<(StatusCode, Json<Item>)> {
    let item = state.items.create(payload)?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// `PUT /items/{id}`
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ItemUpdate>,
) -> Result<Json<Item>> {
    let id = parse_item_id(&id)?;
    state.items.update(id, payload).map(Json)
}

/// `DELETE /items/{id}`
pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = parse_item_id(&id)?;
    if state.items.delete(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_item_id(&id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_item_id("not-a-uuid"),
            Err(AppError::BadRequest(_))
        ));
    }
}
