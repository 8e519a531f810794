use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use tokio::task::JoinSet;
use uuid::Uuid;
use vastraverse_api::{
    config::AppConfig,
    db::{create_pool, run_migrations},
    dto::{
        auth::RegisterRequest,
        cart::{AddToCartRequest, UpdateCartRequest},
        orders::{CheckoutRequest, CreateOrderRequest, OrderLineRequest, UpdateOrderStatusRequest},
        products::{CreateProductRequest, DecrementStockRequest},
        wishlist::AddWishlistRequest,
    },
    entity::{AuditLogs, audit_logs},
    error::AppError,
    middleware::auth::AuthUser,
    models::{OrderStatus, Product, Role},
    pricing::MAX_LINE_QUANTITY,
    routes::params::OrderListQuery,
    services::{auth_service, cart_service, order_service, product_service, wishlist_service},
    state::AppState,
};

// These flows need a Postgres instance; they skip when none is configured.
fn database_url() -> Option<String> {
    match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
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
            jwt_secret: "flow-test-secret".into(),
            jwt_ttl_days: 7,
            cors_origin: None,
        },
    );
    run_migrations(&state.orm).await?;
    Ok(state)
}

fn unique(label: &str) -> String {
    format!("{label}-{}", Uuid::new_v4().simple())
}

async fn register(state: &AppState, name: &str) -> anyhow::Result<(AuthUser, String)> {
    let email = format!("{}@example.com", unique(name));
    let resp = auth_service::register_user(
        state,
        RegisterRequest {
            name: Some(name.into()),
            email: Some(email.clone()),
            password: Some("secret123".into()),
            phone: Some("9876543210".into()),
            address: Some("221 Linking Road, Mumbai".into()),
        },
    )
    .await?;
    let user = resp.data.expect("auth data").user;
    Ok((
        AuthUser {
            user_id: user.id,
            role: Role::User,
        },
        email,
    ))
}

fn admin() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: Role::Admin,
    }
}

async fn create_product(state: &AppState, price: i64, stock: i32) -> anyhow::Result<Product> {
    let resp = product_service::create_product(
        state,
        &admin(),
        CreateProductRequest {
            name: Some(unique("Block Print Kurta")),
            description: Some("Hand block printed cotton".into()),
            price: Some(price),
            category: Some("ethnic".into()),
            collection: Some("women".into()),
            image: Some("kurta.jpg".into()),
            stock: Some(stock),
            ..Default::default()
        },
    )
    .await?;
    Ok(resp.data.expect("product"))
}

async fn stock_of(state: &AppState, id: Uuid) -> anyhow::Result<i32> {
    let resp = product_service::get_product(state, id).await?;
    Ok(resp.data.expect("product").stock)
}

fn order_request(email: &str, product: &Product, price: i64, quantity: i32) -> CreateOrderRequest {
    CreateOrderRequest {
        user_name: Some("Asha Verma".into()),
        user_email: Some(email.into()),
        user_phone: Some("9876543210".into()),
        location: Some("Pune".into()),
        products: Some(vec![OrderLineRequest {
            product_id: Some(product.id),
            product_name: Some(product.name.clone()),
            product_price: Some(price),
            product_image: Some(product.image.clone()),
            quantity: Some(quantity),
            collection: Some("women".into()),
        }]),
    }
}

#[tokio::test]
async fn guest_order_totals_and_stock_flow() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;

    let product = create_product(&state, 1_000, 3).await?;
    let email = format!("{}@example.com", unique("guest"));

    let placed = order_service::create_order(&state, None, order_request(&email, &product, 1_000, 2))
        .await?
        .data
        .expect("order");
    assert_eq!(placed.order.total_amount, 2_000);
    assert_eq!(placed.order.order_status, OrderStatus::Pending);
    assert_eq!(placed.items.len(), 1);
    assert!(placed.order.invoice_number.starts_with("INV-"));
    assert_eq!(stock_of(&state, product.id).await?, 1);

    // Only one unit left: the order is refused and nothing is decremented.
    let err = order_service::create_order(&state, None, order_request(&email, &product, 1_000, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(stock_of(&state, product.id).await?, 1);

    let err = order_service::create_order(&state, None, order_request(&email, &product, 900, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg.contains("has changed")));

    let mut ghost = product.clone();
    ghost.id = Uuid::new_v4();
    let err = order_service::create_order(&state, None, order_request(&email, &ghost, 1_000, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = product_service::get_product(&state, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let updated = order_service::update_order_status(
        &state,
        &admin(),
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "shipped".into(),
        },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(updated.order_status, OrderStatus::Shipped);

    let receipt = order_service::get_receipt(&state, &admin(), placed.order.id).await?;
    assert!(receipt.contains(&placed.order.invoice_number));
    assert!(receipt.contains("Rs. 20.00"));

    Ok(())
}

#[tokio::test]
async fn register_rejects_duplicate_email() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;

    let email = format!("{}@example.com", unique("dup"));
    let request = |email: &str| RegisterRequest {
        name: Some("Ravi".into()),
        email: Some(email.to_string()),
        password: Some("secret123".into()),
        phone: Some("9000000000".into()),
        address: Some("Chennai".into()),
    };

    auth_service::register_user(&state, request(&email)).await?;
    let err = auth_service::register_user(&state, request(&email.to_uppercase()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "User already exists with this email"));
    Ok(())
}

#[tokio::test]
async fn cart_checkout_and_wishlist_flow() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;

    let (user, _) = register(&state, "shopper").await?;
    let shirt = create_product(&state, 1_500, 10).await?;
    let scarf = create_product(&state, 500, 10).await?;

    for quantity in [2, 1] {
        cart_service::add_to_cart(
            &state,
            &user,
            AddToCartRequest {
                product_id: shirt.id,
                quantity: Some(quantity),
                size: Some("M".into()),
            },
        )
        .await?;
    }

    // Wishlist: add, reject duplicate, then move into the cart.
    wishlist_service::add_to_wishlist(&state, &user, AddWishlistRequest { product_id: scarf.id })
        .await?;
    let err = wishlist_service::add_to_wishlist(
        &state,
        &user,
        AddWishlistRequest { product_id: scarf.id },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    wishlist_service::move_to_cart(&state, &user, scarf.id).await?;
    let status = wishlist_service::is_in_wishlist(&state, &user, scarf.id)
        .await?
        .data
        .expect("status");
    assert!(!status.in_wishlist);

    cart_service::update_cart_item(
        &state,
        &user,
        UpdateCartRequest {
            product_id: scarf.id,
            quantity: 2,
        },
    )
    .await?;

    let cart = cart_service::get_cart(&state, &user).await?.data.expect("cart");
    assert_eq!(cart.total_items, 5);
    assert_eq!(cart.subtotal, 3 * 1_500 + 2 * 500);

    let placed = order_service::checkout(&state, &user, CheckoutRequest::default())
        .await?
        .data
        .expect("order");
    assert_eq!(placed.order.total_amount, 5_500);
    assert_eq!(placed.order.user_id, Some(user.user_id));
    assert_eq!(stock_of(&state, shirt.id).await?, 7);
    assert_eq!(stock_of(&state, scarf.id).await?, 8);

    let cart = cart_service::get_cart(&state, &user).await?.data.expect("cart");
    assert!(cart.items.is_empty());
    let err = order_service::checkout(&state, &user, CheckoutRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "Cart is empty"));

    let mine = order_service::list_my_orders(&state, &user, OrderListQuery::default())
        .await?
        .data
        .expect("orders");
    assert!(mine.orders.iter().any(|o| o.order.id == placed.order.id));

    let audit_entries = AuditLogs::find()
        .filter(audit_logs::Column::UserId.eq(user.user_id))
        .count(&state.orm)
        .await?;
    assert!(audit_entries >= 4);

    Ok(())
}

#[tokio::test]
async fn order_lines_store_catalog_name_and_image() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;

    let product = create_product(&state, 2_000, 5).await?;
    let mut request = order_request("catalog@example.com", &product, 2_000, 1);
    if let Some(lines) = request.products.as_mut() {
        lines[0].product_name = Some("Tampered Name".into());
        lines[0].product_image = Some("elsewhere.jpg".into());
    }

    let placed = order_service::create_order(&state, None, request)
        .await?
        .data
        .expect("order");
    assert_eq!(placed.items[0].product_name, product.name);
    assert_eq!(placed.items[0].product_image, product.image);
    Ok(())
}

#[tokio::test]
async fn admin_stock_decrement_stops_at_zero() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;
    let product = create_product(&state, 1_200, 2).await?;

    let updated = product_service::decrement_stock(
        &state,
        &admin(),
        product.id,
        DecrementStockRequest { quantity: 2 },
    )
    .await?
    .data
    .expect("product");
    assert_eq!(updated.stock, 0);

    let err = product_service::decrement_stock(
        &state,
        &admin(),
        product.id,
        DecrementStockRequest { quantity: 1 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg.starts_with("Insufficient stock")));

    let err = product_service::decrement_stock(
        &state,
        &admin(),
        product.id,
        DecrementStockRequest { quantity: 0 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = product_service::decrement_stock(
        &state,
        &admin(),
        Uuid::new_v4(),
        DecrementStockRequest { quantity: 1 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    assert_eq!(stock_of(&state, product.id).await?, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decrements_never_oversell() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;
    let product = create_product(&state, 800, 10).await?;

    let mut tasks = JoinSet::new();
    for _ in 0..25 {
        let state = state.clone();
        tasks.spawn(async move {
            product_service::apply_stock_decrement(&state.orm, product.id, 1).await
        });
    }

    let mut sold = 0;
    while let Some(result) = tasks.join_next().await {
        match result? {
            Ok(()) => sold += 1,
            Err(AppError::BadRequest(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(sold, 10);
    assert_eq!(stock_of(&state, product.id).await?, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_line_orders_do_not_deadlock() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;
    let first = create_product(&state, 1_000, 10_000).await?;
    let second = create_product(&state, 1_500, 10_000).await?;

    let mut tasks = JoinSet::new();
    for i in 0..40 {
        let state = state.clone();
        let (a, b) = if i % 2 == 0 {
            (first.clone(), second.clone())
        } else {
            (second.clone(), first.clone())
        };
        tasks.spawn(async move {
            let mut request = order_request("swap@example.com", &a, a.price, 1);
            let other = order_request("swap@example.com", &b, b.price, 1);
            if let (Some(lines), Some(more)) = (request.products.as_mut(), other.products) {
                lines.extend(more);
            }
            order_service::create_order(&state, None, request).await
        });
    }

    while let Some(result) = tasks.join_next().await {
        let placed = result?.map_err(|err| anyhow::anyhow!("order failed: {err:?}"))?;
        assert_eq!(placed.data.expect("order").order.total_amount, 2_500);
    }
    assert_eq!(stock_of(&state, first.id).await?, 10_000 - 40);
    assert_eq!(stock_of(&state, second.id).await?, 10_000 - 40);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_beyond_pool_size_all_complete() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;
    let product = create_product(&state, 700, 100).await?;

    // More shoppers than the pool has connections.
    let mut shoppers = Vec::new();
    for _ in 0..15 {
        let (user, _) = register(&state, "rush").await?;
        cart_service::add_to_cart(
            &state,
            &user,
            AddToCartRequest {
                product_id: product.id,
                quantity: Some(1),
                size: None,
            },
        )
        .await?;
        shoppers.push(user);
    }

    let mut tasks = JoinSet::new();
    for user in shoppers {
        let state = state.clone();
        tasks.spawn(async move {
            order_service::checkout(&state, &user, CheckoutRequest::default()).await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result?.map_err(|err| anyhow::anyhow!("checkout failed: {err:?}"))?;
    }

    assert_eq!(stock_of(&state, product.id).await?, 85);
    Ok(())
}

#[tokio::test]
async fn cart_quantity_updates_and_caps() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;
    let (user, _) = register(&state, "capper").await?;
    let product = create_product(&state, 300, 5).await?;

    let add = |quantity: i32| AddToCartRequest {
        product_id: product.id,
        quantity: Some(quantity),
        size: None,
    };
    cart_service::add_to_cart(&state, &user, add(MAX_LINE_QUANTITY)).await?;
    let err = cart_service::add_to_cart(&state, &user, add(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg.starts_with("Cart quantity cannot exceed")));

    let err = cart_service::update_cart_item(
        &state,
        &user,
        UpdateCartRequest {
            product_id: product.id,
            quantity: i32::MAX,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let removed = cart_service::update_cart_item(
        &state,
        &user,
        UpdateCartRequest {
            product_id: product.id,
            quantity: 0,
        },
    )
    .await?;
    assert!(removed.data.expect("data").is_none());
    let cart = cart_service::get_cart(&state, &user).await?.data.expect("cart");
    assert!(cart.items.is_empty());

    let err = cart_service::update_cart_item(
        &state,
        &user,
        UpdateCartRequest {
            product_id: product.id,
            quantity: 2,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn wishlist_toggle_flips_membership() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;
    let (user, _) = register(&state, "toggler").await?;
    let product = create_product(&state, 900, 3).await?;

    for expected in [true, false, true] {
        let status = wishlist_service::toggle_wishlist(&state, &user, product.id)
            .await?
            .data
            .expect("status");
        assert_eq!(status.in_wishlist, expected);
        let contains = wishlist_service::is_in_wishlist(&state, &user, product.id)
            .await?
            .data
            .expect("status");
        assert_eq!(contains.in_wishlist, expected);
    }

    let err = wishlist_service::toggle_wishlist(&state, &user, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn orders_by_email_are_limited_to_the_owner() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;
    let (user, email) = register(&state, "owner").await?;
    let (_, other_email) = register(&state, "neighbour").await?;

    let own = order_service::list_orders_by_email(
        &state,
        &user,
        &email.to_uppercase(),
        OrderListQuery::default(),
    )
    .await?;
    assert!(own.success);

    let err = order_service::list_orders_by_email(
        &state,
        &user,
        &other_email,
        OrderListQuery::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let as_admin = order_service::list_orders_by_email(
        &state,
        &admin(),
        &other_email,
        OrderListQuery::default(),
    )
    .await?;
    assert!(as_admin.success);
    Ok(())
}

#[tokio::test]
async fn product_names_are_unique() -> anyhow::Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&url).await?;
    let product = create_product(&state, 1_100, 2).await?;

    let err = product_service::create_product(
        &state,
        &admin(),
        CreateProductRequest {
            name: Some(product.name.clone()),
            description: Some("Same name, different piece".into()),
            price: Some(1_300),
            category: Some("ethnic".into()),
            collection: Some("women".into()),
            image: Some("copy.jpg".into()),
            stock: Some(1),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg.contains("already exists")));
    Ok(())
}
