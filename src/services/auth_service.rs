use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::Utc;
use password_hash::rand_core::OsRng;
use sea_orm::{ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, QueryFilter, Set};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    audit,
    dto::auth::{
        ForgotPasswordRequest, LoginRequest, LoginResponse, LogoutRequest, RefreshRequest,
        RefreshResponse, RegisterRequest, ResendVerificationRequest, ResetPasswordRequest,
        TokenKind, UpdateProfileRequest, VerifyEmailRequest,
    },
    entity::{
        refresh_tokens::ActiveModel as RefreshTokenActive,
        users::{Column as UserCol, Entity as Users},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{ROLE_USER, User},
    response::{ApiResponse, Meta},
    state::AppState,
    validation::{Validator, normalize_email},
};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Every column of `users` except the password hash.
pub(crate) const USER_COLUMNS: &str = "id, email, first_name, last_name, phone, role, is_active, \
     email_verified, last_login, created_at, updated_at";

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Signs a single-use link token and records it. Earlier unused links of the
/// same kind for this user stop working.
pub async fn issue_email_token(
    state: &AppState,
    user_id: Uuid,
    role: &str,
    kind: TokenKind,
) -> AppResult<String> {
    let issued = match kind {
        TokenKind::Verify => state.tokens.issue_verify(user_id, role),
        TokenKind::Reset => state.tokens.issue_reset(user_id, role),
        TokenKind::Access | TokenKind::Refresh => {
            return Err(AppError::Internal(anyhow::anyhow!(
                "{} tokens are not mailed",
                kind.as_str()
            )));
        }
    }
    .map_err(|e| AppError::Internal(e.into()))?;
    let jti = issued
        .jti
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("mailed token without jti")))?;

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE email_tokens SET used_at = NOW()
        WHERE user_id = $1 AND purpose = $2 AND used_at IS NULL
        "#,
    )
    .bind(user_id)
    .bind(kind.as_str())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO email_tokens (id, user_id, purpose, expires_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(jti)
    .bind(user_id)
    .bind(kind.as_str())
    .bind(issued.expires_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(issued.token)
}

/// Marks a mailed token used and returns its user. `None` when the token is
/// malformed, expired, superseded or already used.
async fn consume_email_token(
    state: &AppState,
    conn: &mut PgConnection,
    token: &str,
    kind: TokenKind,
) -> AppResult<Option<Uuid>> {
    let Ok(claims) = state.tokens.verify(token.trim(), kind) else {
        return Ok(None);
    };
    let (Ok(user_id), Some(Ok(jti))) = (
        Uuid::parse_str(&claims.sub),
        claims.jti.as_deref().map(Uuid::parse_str),
    ) else {
        return Ok(None);
    };

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE email_tokens SET used_at = NOW()
        WHERE id = $1
          AND user_id = $2
          AND purpose = $3
          AND used_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
        "#,
    )
    .bind(jti)
    .bind(user_id)
    .bind(kind.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|(id,)| id))
}

async fn send_verification_email(
    state: &AppState,
    user_id: Uuid,
    role: &str,
    email: &str,
    first_name: &str,
) -> AppResult<()> {
    let token = issue_email_token(state, user_id, role, TokenKind::Verify).await?;
    let link = format!("{}/verify-email?token={}", state.config.client_url, token);
    state
        .mailer
        .send_verification(email, first_name, &link)
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

pub async fn register_user(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>> {
    Validator::new()
        .email("email", &payload.email)
        .min_len("password", &payload.password, MIN_PASSWORD_LEN)
        .required("first_name", &payload.first_name)
        .required("last_name", &payload.last_name)
        .finish()?;

    let email = normalize_email(&payload.email);
    let exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    if exist.is_some() {
        return Err(AppError::BadRequest("Email is already registered".to_string()));
    }

    let password_hash = hash_password(&payload.password)?;

    let user: User = sqlx::query_as(&format!(
        r#"
        INSERT INTO users (id, email, password_hash, first_name, last_name, phone, role)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(email.as_str())
    .bind(password_hash)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(payload.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()))
    .bind(ROLE_USER)
    .fetch_one(&state.pool)
    .await
    .map_err(|err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::BadRequest("Email is already registered".to_string())
        }
        _ => AppError::from(err),
    })?;

    tracing::info!(user_id = %user.id, "user registered");
    if let Err(err) =
        send_verification_email(state, user.id, &user.role, &user.email, &user.first_name).await
    {
        tracing::warn!(error = %err, user_id = %user.id, "verification email failed");
    }
    audit::record(
        &state.pool,
        Some(user.id),
        "user_register",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Registration successful. Please check your email to verify your account before logging in",
        user,
        Some(Meta::empty()),
    ))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let email = normalize_email(&payload.email);
    let user = Users::find()
        .filter(UserCol::Email.eq(email))
        .one(&state.orm)
        .await?;

    let user = match user {
        Some(u) => u,
        None => return Err(AppError::Unauthorized("Invalid email or password".into())),
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        return Err(AppError::Unauthorized("Invalid email or password".into()));
    }

    if !user.is_active {
        return Err(AppError::Unauthorized("Account is deactivated".into()));
    }

    if !user.email_verified {
        return Err(AppError::Unauthorized(
            "Please verify your email before logging in".into(),
        ));
    }

    let access = state
        .tokens
        .issue_access(user.id, &user.role)
        .map_err(|e| AppError::Internal(e.into()))?;
    let refresh = state
        .tokens
        .issue_refresh(user.id, &user.role)
        .map_err(|e| AppError::Internal(e.into()))?;
    let jti = refresh
        .jti
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("refresh token without jti")))?;

    RefreshTokenActive {
        id: Set(jti),
        user_id: Set(user.id),
        expires_at: Set(refresh.expires_at.into()),
        revoked_at: Set(None),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let user: User = sqlx::query_as(&format!(
        "UPDATE users SET last_login = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
    ))
    .bind(user.id)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(user_id = %user.id, "user logged in");
    audit::record(
        &state.pool,
        Some(user.id),
        "user_login",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Logged in",
        LoginResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            user,
        },
        Some(Meta::empty()),
    ))
}

pub async fn refresh_access_token(
    state: &AppState,
    payload: RefreshRequest,
) -> AppResult<ApiResponse<RefreshResponse>> {
    let token = payload
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Unauthorized("Refresh token required".into()))?;

    let invalid = || AppError::Unauthorized("Invalid refresh token".into());

    let claims = state
        .tokens
        .verify(&token, TokenKind::Refresh)
        .map_err(|_| invalid())?;
    let jti = claims
        .jti
        .as_deref()
        .and_then(|jti| Uuid::parse_str(jti).ok())
        .ok_or_else(invalid)?;

    let row: Option<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT u.id, u.role
        FROM refresh_tokens rt
        JOIN users u ON u.id = rt.user_id
        WHERE rt.id = $1
          AND rt.revoked_at IS NULL
          AND rt.expires_at > NOW()
          AND u.is_active
        "#,
    )
    .bind(jti)
    .fetch_optional(&state.pool)
    .await?;

    let (user_id, role) = row.ok_or_else(invalid)?;

    let access = state
        .tokens
        .issue_access(user_id, &role)
        .map_err(|e| AppError::Internal(e.into()))?;

    tracing::debug!(user_id = %user_id, "access token refreshed");

    Ok(ApiResponse::success(
        "Token refreshed",
        RefreshResponse {
            access_token: access.token,
        },
        Some(Meta::empty()),
    ))
}

/// Revokes the given refresh token. Unknown or malformed tokens are ignored.
pub async fn logout(
    state: &AppState,
    payload: LogoutRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let jti = payload
        .refresh_token
        .as_deref()
        .and_then(|token| state.tokens.verify(token, TokenKind::Refresh).ok())
        .and_then(|claims| claims.jti)
        .and_then(|jti| Uuid::parse_str(&jti).ok());

    if let Some(jti) = jti {
        let revoked: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE refresh_tokens SET revoked_at = NOW()
            WHERE id = $1 AND revoked_at IS NULL
            RETURNING user_id
            "#,
        )
        .bind(jti)
        .fetch_optional(&state.pool)
        .await?;

        if let Some((user_id,)) = revoked {
            audit::record(
                &state.pool,
                Some(user_id),
                "user_logout",
                "refresh_tokens",
                serde_json::json!({ "token_id": jti }),
            )
            .await;
        }
    }

    Ok(ApiResponse::message_only("Logged out"))
}

/// Always answers the same way so the endpoint cannot be used to enumerate accounts.
pub async fn forgot_password(
    state: &AppState,
    payload: ForgotPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    Validator::new().email("email", &payload.email).finish()?;

    let email = normalize_email(&payload.email);
    let user = Users::find()
        .filter(UserCol::Email.eq(email))
        .filter(UserCol::IsActive.eq(true))
        .one(&state.orm)
        .await?;

    if let Some(user) = user {
        let token = issue_email_token(state, user.id, &user.role, TokenKind::Reset).await?;
        let link = format!("{}/reset-password?token={}", state.config.client_url, token);

        if let Err(err) = state
            .mailer
            .send_password_reset(&user.email, &user.first_name, &link)
            .await
        {
            tracing::warn!(error = %err, user_id = %user.id, "password reset email failed");
        }

        audit::record(
            &state.pool,
            Some(user.id),
            "password_reset_requested",
            "users",
            serde_json::json!({ "user_id": user.id }),
        )
        .await;
    }

    Ok(ApiResponse::message_only(
        "If an account exists for that email, a reset link has been sent",
    ))
}

pub async fn reset_password(
    state: &AppState,
    payload: ResetPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    Validator::new()
        .required("token", &payload.token)
        .min_len("password", &payload.password, MIN_PASSWORD_LEN)
        .finish()?;

    let invalid = || AppError::Unauthorized("Invalid or expired reset token".into());

    let mut tx = state.pool.begin().await?;

    let user_id = consume_email_token(state, &mut tx, &payload.token, TokenKind::Reset)
        .await?
        .ok_or_else(invalid)?;

    let password_hash = hash_password(&payload.password)?;

    let updated = sqlx::query(
        "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1 AND is_active",
    )
    .bind(user_id)
    .bind(password_hash)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(invalid());
    }

    sqlx::query(
        "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(user_id = %user_id, "password reset");
    audit::record(
        &state.pool,
        Some(user_id),
        "password_reset",
        "users",
        serde_json::json!({ "user_id": user_id }),
    )
    .await;

    Ok(ApiResponse::message_only("Password has been reset"))
}

pub async fn verify_email(
    state: &AppState,
    payload: VerifyEmailRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    Validator::new().required("token", &payload.token).finish()?;

    let mut tx = state.pool.begin().await?;

    let user_id = consume_email_token(state, &mut tx, &payload.token, TokenKind::Verify)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired verification token".into()))?;

    sqlx::query("UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(user_id = %user_id, "email verified");
    audit::record(
        &state.pool,
        Some(user_id),
        "email_verified",
        "users",
        serde_json::json!({ "user_id": user_id }),
    )
    .await;

    Ok(ApiResponse::message_only("Email verified. You can now log in"))
}

/// Same answer whether or not the address belongs to an unverified account.
pub async fn resend_verification(
    state: &AppState,
    payload: ResendVerificationRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    Validator::new().email("email", &payload.email).finish()?;

    let email = normalize_email(&payload.email);
    let user = Users::find()
        .filter(UserCol::Email.eq(email))
        .filter(UserCol::IsActive.eq(true))
        .filter(UserCol::EmailVerified.eq(false))
        .one(&state.orm)
        .await?;

    if let Some(user) = user {
        if let Err(err) =
            send_verification_email(state, user.id, &user.role, &user.email, &user.first_name)
                .await
        {
            tracing::warn!(error = %err, user_id = %user.id, "verification email failed");
        }
    }

    Ok(ApiResponse::message_only(
        "If that account still needs verification, a new link has been sent",
    ))
}

pub async fn get_profile(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<User>> {
    let profile = Users::find_by_id(user.user_id)
        .one(&state.orm)
        .await?
        .map(User::from);
    let profile = match profile {
        Some(p) => p,
        None => return Err(AppError::NotFoundMsg("User not found".into())),
    };
    Ok(ApiResponse::success("Profile", profile, Some(Meta::empty())))
}

pub async fn update_profile(
    state: &AppState,
    user: &AuthUser,
    payload: UpdateProfileRequest,
) -> AppResult<ApiResponse<User>> {
    Validator::new()
        .not_blank("first_name", payload.first_name.as_deref())
        .not_blank("last_name", payload.last_name.as_deref())
        .finish()?;

    let existing = Users::find_by_id(user.user_id).one(&state.orm).await?;
    let existing = match existing {
        Some(u) => u,
        None => return Err(AppError::NotFoundMsg("User not found".into())),
    };

    let mut active: crate::entity::users::ActiveModel = existing.into();
    if let Some(first_name) = payload.first_name {
        active.first_name = Set(first_name.trim().to_string());
    }
    if let Some(last_name) = payload.last_name {
        active.last_name = Set(last_name.trim().to_string());
    }
    if let Some(phone) = payload.phone {
        let phone = phone.trim().to_string();
        active.phone = Set((!phone.is_empty()).then_some(phone));
    }
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "profile_update",
        "users",
        serde_json::json!({ "user_id": user.user_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Profile updated",
        User::from(updated),
        Some(Meta::empty()),
    ))
}
