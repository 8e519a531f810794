use uuid::Uuid;
use vastraverse_api::{
    config::AppConfig,
    db::{create_pool, run_migrations},
    dto::{
        orders::{CreateOrderRequest, OrderLineRequest},
        products::CreateProductRequest,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::Role,
    services::{order_service, product_service},
    state::AppState,
};

// Wipes the whole catalog, so it lives in its own binary and never races the order flows.
fn database_url() -> Option<String> {
    match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run catalog tests.");
            None
        }
    }
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let state = AppState::new(
        pool,
        AppConfig {
            database_url: database_url.to_string(),
            host: "127.0.0.1".into(),
            port: 0,
            jwt_secret: "catalog-test-secret".into(),
            jwt_ttl_days: 7,
            cors_origin: None,
        },
    );
    run_migrations(&state.orm).await?;
    Ok(state)
}

fn admin() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: Role::Admin,
    }
}

#[tokio::test]
async fn deleting_all_products_keeps_placed_orders() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;

    let product = product_service::create_product(
        &state,
        &admin(),
        CreateProductRequest {
            name: Some(format!("Linen Shirt {}", Uuid::new_v4().simple())),
            description: Some("Relaxed fit linen".into()),
            price: Some(1_800),
            category: Some("shirts".into()),
            collection: Some("men".into()),
            image: Some("linen.jpg".into()),
            stock: Some(4),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("product");

    let placed = order_service::create_order(
        &state,
        None,
        CreateOrderRequest {
            user_name: Some("Rohan Iyer".into()),
            user_email: Some("rohan@example.com".into()),
            user_phone: Some("9123456780".into()),
            location: Some("Chennai".into()),
            products: Some(vec![OrderLineRequest {
                product_id: Some(product.id),
                product_name: Some(product.name.clone()),
                product_price: Some(1_800),
                product_image: Some(product.image.clone()),
                quantity: Some(2),
                collection: Some("men".into()),
            }]),
        },
    )
    .await?
    .data
    .expect("order");

    let err = product_service::delete_all_products(
        &state,
        &AuthUser {
            user_id: Uuid::new_v4(),
            role: Role::User,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let deleted = product_service::delete_all_products(&state, &admin())
        .await?
        .data
        .expect("count");
    assert!(deleted.deleted >= 1);

    let err = product_service::get_product(&state, product.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let kept = order_service::get_order(&state, &admin(), placed.order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(kept.order.total_amount, 3_600);
    assert_eq!(kept.items.len(), 1);
    assert_eq!(kept.items[0].product_id, product.id);
    assert_eq!(kept.items[0].product_name, product.name);
    Ok(())
}
