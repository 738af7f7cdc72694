use crate::db::{templates, users};
use crate::domain::models::{TemplateType, UserRole};
use crate::services::ai::starter_template;
use anyhow::Result;
use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2,
};
use sqlx::PgPool;

/// Creates the bootstrap admin (if absent) and gives them starter templates.
pub async fn seed_admin(pool: &PgPool, email: &str, password: &str) -> Result<()> {
    let admin = match users::find_by_email(pool, email).await? {
        Some(existing) => existing,
        None => {
            let salt = SaltString::generate(rand_core::OsRng);
            let hash = Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
                .to_string();

            let created = users::create_if_absent(
                pool,
                users::NewUser {
                    email,
                    name: "Administrator",
                    password_hash: &hash,
                    role: UserRole::Admin,
                },
            )
            .await?;

            match created {
                Some(user) => {
                    tracing::info!("Seeded admin user {}", user.email);
                    user
                }
                // Lost a race with another instance.
                None => users::find_by_email(pool, email)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("seeded admin vanished"))?,
            }
        }
    };

    if templates::count_for_user(pool, admin.id).await? > 0 {
        return Ok(());
    }

    for kind in TemplateType::ALL {
        templates::create(pool, admin.id, &starter_template(kind)).await?;
    }
    tracing::info!(
        "Seeded {} starter templates for {}",
        TemplateType::ALL.len(),
        admin.email
    );
    Ok(())
}
