use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::wishlist::{AddWishlistRequest, WishlistEntry, WishlistStatus, WishlistView},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, WishlistItem},
    response::{ApiResponse, Meta},
    services::{
        cart_service::{ensure_product_exists, upsert_line},
        product_service::ProductRow,
    },
    state::AppState,
};

#[derive(FromRow)]
struct WishlistWithProductRow {
    added_at: DateTime<Utc>,
    #[sqlx(flatten)]
    product: ProductRow,
}

pub async fn get_wishlist(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<WishlistView>> {
    let rows = sqlx::query_as::<_, WishlistWithProductRow>(
        r#"
        SELECT wi.created_at AS added_at, p.*
        FROM wishlist_items wi
        JOIN products p ON p.id = wi.product_id
        WHERE wi.user_id = $1
        ORDER BY wi.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    let items: Vec<WishlistEntry> = rows
        .into_iter()
        .map(|row| WishlistEntry {
            product: row.product.into(),
            added_at: row.added_at,
        })
        .collect();
    let meta = Meta::single_page(items.len());
    let total_items = items.len() as i64;

    Ok(ApiResponse::success(
        "OK",
        WishlistView { items, total_items },
        Some(meta),
    ))
}

pub async fn add_to_wishlist(
    state: &AppState,
    user: &AuthUser,
    payload: AddWishlistRequest,
) -> AppResult<ApiResponse<WishlistItem>> {
    ensure_product_exists(state, payload.product_id).await?;

    let inserted = insert_item(state, user.user_id, payload.product_id).await?;
    let item = inserted.ok_or_else(|| AppError::bad_request("Already in wishlist!"))?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "wishlist_add",
        "wishlist_items",
        serde_json::json!({ "product_id": payload.product_id }),
    )
    .await;

    Ok(ApiResponse::success("Added to wishlist!", item, None))
}

pub async fn remove_from_wishlist(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    if !delete_item(state, user.user_id, product_id).await? {
        return Err(AppError::not_found("Wishlist item"));
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "wishlist_remove",
        "wishlist_items",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Removed from wishlist",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn toggle_wishlist(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<WishlistStatus>> {
    if delete_item(state, user.user_id, product_id).await? {
        return Ok(ApiResponse::success(
            "Removed from wishlist",
            WishlistStatus {
                product_id,
                in_wishlist: false,
            },
            None,
        ));
    }

    ensure_product_exists(state, product_id).await?;
    // A concurrent toggle may have inserted it already; either way it is now present.
    insert_item(state, user.user_id, product_id).await?;

    Ok(ApiResponse::success(
        "Added to wishlist!",
        WishlistStatus {
            product_id,
            in_wishlist: true,
        },
        None,
    ))
}

pub async fn is_in_wishlist(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<WishlistStatus>> {
    let found: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM wishlist_items WHERE user_id = $1 AND product_id = $2")
            .bind(user.user_id)
            .bind(product_id)
            .fetch_optional(&state.pool)
            .await?;

    Ok(ApiResponse::success(
        "OK",
        WishlistStatus {
            product_id,
            in_wishlist: found.is_some(),
        },
        None,
    ))
}

/// Moves one wishlist entry into the cart as a single unit.
pub async fn move_to_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<CartItem>> {
    let mut tx = state.pool.begin().await?;

    let removed = sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1 AND product_id = $2")
        .bind(user.user_id)
        .bind(product_id)
        .execute(&mut *tx)
        .await?;
    if removed.rows_affected() == 0 {
        return Err(AppError::not_found("Wishlist item"));
    }

    let cart_item = upsert_line(&mut *tx, user.user_id, product_id, 1, None).await?;
    tx.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "wishlist_move_to_cart",
        "wishlist_items",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    Ok(ApiResponse::success("Moved to cart", cart_item, None))
}

pub async fn clear_wishlist(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "wishlist_clear",
        "wishlist_items",
        serde_json::json!({ "removed": result.rows_affected() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Wishlist cleared",
        serde_json::json!({ "removed": result.rows_affected() }),
        Some(Meta::empty()),
    ))
}

/// `None` when the product is already in the wishlist.
async fn insert_item(
    state: &AppState,
    user_id: Uuid,
    product_id: Uuid,
) -> AppResult<Option<WishlistItem>> {
    let item = sqlx::query_as::<_, WishlistItem>(
        r#"
        INSERT INTO wishlist_items (id, user_id, product_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, product_id) DO NOTHING
        RETURNING id, user_id, product_id, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(product_id)
    .fetch_optional(&state.pool)
    .await?;
    Ok(item)
}

async fn delete_item(state: &AppState, user_id: Uuid, product_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1 AND product_id = $2")
        .bind(user_id)
        .bind(product_id)
        .execute(&state.pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
