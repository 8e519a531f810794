use vastraverse_api::{
    config::AppConfig,
    db::create_pool,
    models::{Collection, Role},
    services::auth_service::hash_password,
};
use uuid::Uuid;

struct SeedProduct {
    name: &'static str,
    description: &'static str,
    price: i64,
    category: &'static str,
    collection: Collection,
    image: &'static str,
    stock: i32,
    rating: f64,
}

// Prices are in paise.
const PRODUCTS: &[SeedProduct] = &[
    SeedProduct {
        name: "Classic Oxford Shirt",
        description: "Crisp cotton oxford with a button-down collar",
        price: 149_900,
        category: "shirts",
        collection: Collection::Men,
        image: "https://images.vastraverse.in/men/oxford-shirt.jpg",
        stock: 40,
        rating: 4.4,
    },
    SeedProduct {
        name: "Slim Fit Chinos",
        description: "Stretch twill chinos for everyday wear",
        price: 199_900,
        category: "trousers",
        collection: Collection::Men,
        image: "https://images.vastraverse.in/men/chinos.jpg",
        stock: 35,
        rating: 4.2,
    },
    SeedProduct {
        name: "Nehru Jacket",
        description: "Textured silk-blend jacket for festive evenings",
        price: 349_900,
        category: "ethnic",
        collection: Collection::Men,
        image: "https://images.vastraverse.in/men/nehru-jacket.jpg",
        stock: 15,
        rating: 4.7,
    },
    SeedProduct {
        name: "Floral Anarkali Kurta",
        description: "Flared georgette kurta with floral print",
        price: 249_900,
        category: "ethnic",
        collection: Collection::Women,
        image: "https://images.vastraverse.in/women/anarkali.jpg",
        stock: 25,
        rating: 4.6,
    },
    SeedProduct {
        name: "High Rise Denim",
        description: "Straight leg jeans in mid-wash indigo",
        price: 179_900,
        category: "jeans",
        collection: Collection::Women,
        image: "https://images.vastraverse.in/women/denim.jpg",
        stock: 30,
        rating: 4.3,
    },
    SeedProduct {
        name: "Linen Wrap Dress",
        description: "Breathable linen midi dress with tie waist",
        price: 229_900,
        category: "dresses",
        collection: Collection::Women,
        image: "https://images.vastraverse.in/women/wrap-dress.jpg",
        stock: 20,
        rating: 4.5,
    },
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id = ensure_user(&pool, "Store Admin", "admin@vastraverse.in", "admin123", Role::Admin).await?;
    let user_id = ensure_user(&pool, "Asha Verma", "asha@example.com", "user123", Role::User).await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> anyhow::Result<Uuid> {
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let (user_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, email, password_hash, phone, address, role)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind("9876543210")
    .bind("12 MG Road, Bengaluru")
    .bind(role.as_str())
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    for product in PRODUCTS {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, category, collection, image, stock, rating)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(product.name)
        .bind(product.description)
        .bind(product.price)
        .bind(product.category)
        .bind(product.collection.as_str())
        .bind(product.image)
        .bind(product.stock)
        .bind(product.rating)
        .execute(pool)
        .await?;
    }

    println!("Seeded {} products", PRODUCTS.len());
    Ok(())
}
