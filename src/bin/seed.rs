use storefront_api::{
    config::AppConfig,
    db::{DbPool, create_pool, run_migrations},
    models::{ROLE_ADMIN, ROLE_USER},
    services::auth_service::hash_password,
};
use uuid::Uuid;

struct SeedUser<'a> {
    email: &'a str,
    password: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    role: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let admin_id = ensure_user(
        &pool,
        SeedUser {
            email: "admin@example.com",
            password: "admin123",
            first_name: "Store",
            last_name: "Admin",
            role: ROLE_ADMIN,
        },
    )
    .await?;
    let user_id = ensure_user(
        &pool,
        SeedUser {
            email: "user@example.com",
            password: "user123",
            first_name: "Demo",
            last_name: "Shopper",
            role: ROLE_USER,
        },
    )
    .await?;
    seed_catalog(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(pool: &DbPool, user: SeedUser<'_>) -> anyhow::Result<Uuid> {
    let password_hash =
        hash_password(user.password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Existing accounts keep their password; role and verification are enforced.
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, first_name, last_name, role, email_verified)
        VALUES ($1, $2, $3, $4, $5, $6, TRUE)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role, email_verified = TRUE
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.email)
    .bind(password_hash)
    .bind(user.first_name)
    .bind(user.last_name)
    .bind(user.role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {} (role={})", user.email, user.role);
    Ok(id)
}

async fn seed_catalog(pool: &DbPool) -> anyhow::Result<()> {
    let categories = [
        ("Apparel", "Hoodies, shirts and caps"),
        ("Kitchen", "Mugs and bottles"),
        ("Accessories", "Stickers, pins and bags"),
        ("Books", "Printed and digital books"),
    ];

    for (name, description) in categories {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .execute(pool)
        .await?;
    }

    // (name, description, price in cents, stock, category)
    let products = [
        ("Classic Hoodie", "Heavyweight fleece hoodie", 5_500_i64, 50, "Apparel"),
        ("Logo Cap", "Adjustable cotton cap", 2_200, 8, "Apparel"),
        ("Ceramic Mug", "350 ml glazed mug", 1_200, 100, "Kitchen"),
        ("Steel Bottle", "Insulated 750 ml bottle", 2_800, 5, "Kitchen"),
        ("Sticker Pack", "Ten vinyl stickers", 500, 200, "Accessories"),
        ("Canvas Tote", "Reinforced shopping bag", 1_800, 40, "Accessories"),
        ("Async Patterns", "A practical guide to async code", 3_900, 75, "Books"),
    ];

    for (name, description, price, stock, category) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, category_id, name, description, price, stock, image_url)
            VALUES ($1, (SELECT id FROM categories WHERE name = $2), $3, $4, $5, $6, $7)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(category)
        .bind(name)
        .bind(description)
        .bind(price)
        .bind(stock)
        .bind(format!(
            "https://images.example.com/products/{}.jpg",
            name.to_lowercase().replace(' ', "-")
        ))
        .execute(pool)
        .await?;
    }

    println!("Seeded categories and products");
    Ok(())
}
