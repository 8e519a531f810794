use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use password_hash::rand_core::OsRng;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::{
    audit,
    dto::auth::{AuthResponse, Claims, LoginRequest, ProfileResponse, RegisterRequest, UpdateProfileRequest},
    entity::users::{ActiveModel as UserActive, Column as UserCol, Entity as Users, Model as UserModel},
    error::{AppError, AppResult, is_unique_violation},
    middleware::auth::AuthUser,
    models::{Role, User, parse_stored},
    response::{ApiResponse, Meta},
    state::AppState,
    validation::{normalize_email, optional, required, validate_email},
};

pub const MIN_PASSWORD_LEN: usize = 6;

pub async fn register_user(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<AuthResponse>> {
    const MISSING: &str = "Please provide name, email, password, phone number, and address";
    let name = required(payload.name.as_deref(), MISSING)?;
    let email = normalize_email(&required(payload.email.as_deref(), MISSING)?);
    let password = payload
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::bad_request(MISSING))?;
    let phone = required(payload.phone.as_deref(), MISSING)?;
    let address = required(payload.address.as_deref(), MISSING)?;

    validate_email(&email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let exists = Users::find()
        .filter(UserCol::Email.eq(email.as_str()))
        .one(&state.orm)
        .await?;
    if exists.is_some() {
        return Err(AppError::bad_request("User already exists with this email"));
    }

    let password_hash = hash_password(&password)?;

    let now = Utc::now().fixed_offset();
    let inserted = UserActive {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        email: Set(email),
        password_hash: Set(password_hash),
        phone: Set(phone),
        address: Set(address),
        role: Set(Role::User.as_str().to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&state.orm)
    .await;

    // A concurrent registration can pass the lookup above; the unique index decides.
    let user = match inserted {
        Ok(user) => user,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::bad_request("User already exists with this email"));
        }
        Err(err) => return Err(err.into()),
    };

    let token = issue_token(
        &state.config.jwt_secret,
        user.id,
        Role::User,
        state.config.jwt_ttl_days,
    )?;

    audit::record(
        &state.pool,
        Some(user.id),
        "user_register",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;
    tracing::info!(user_id = %user.id, "user registered");

    Ok(ApiResponse::success(
        "User registered successfully",
        AuthResponse {
            token,
            user: user_from_entity(user),
        },
        None,
    ))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<AuthResponse>> {
    const MISSING: &str = "Please provide email and password";
    let email = normalize_email(&required(payload.email.as_deref(), MISSING)?);
    let password = payload
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::bad_request(MISSING))?;

    let user = Users::find()
        .filter(UserCol::Email.eq(email.as_str()))
        .one(&state.orm)
        .await?;

    let user = match user {
        Some(u) => u,
        None => return Err(AppError::Unauthorized("Invalid credentials".into())),
    };

    if !verify_password(&password, &user.password_hash)? {
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }

    let role = parse_stored(&user.role, Role::User);
    let token = issue_token(
        &state.config.jwt_secret,
        user.id,
        role,
        state.config.jwt_ttl_days,
    )?;

    audit::record(
        &state.pool,
        Some(user.id),
        "user_login",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Login successful",
        AuthResponse {
            token,
            user: user_from_entity(user),
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_profile(
    state: &AppState,
    auth: &AuthUser,
) -> AppResult<ApiResponse<ProfileResponse>> {
    let user = find_user(state, auth.user_id).await?;
    Ok(ApiResponse::success(
        "Profile",
        ProfileResponse {
            user: user_from_entity(user),
        },
        None,
    ))
}

pub async fn update_profile(
    state: &AppState,
    auth: &AuthUser,
    payload: UpdateProfileRequest,
) -> AppResult<ApiResponse<ProfileResponse>> {
    let existing = find_user(state, auth.user_id).await?;

    let mut active: UserActive = existing.into();
    if let Some(name) = optional(payload.name.as_deref()) {
        active.name = Set(name);
    }
    if let Some(phone) = optional(payload.phone.as_deref()) {
        active.phone = Set(phone);
    }
    if let Some(address) = optional(payload.address.as_deref()) {
        active.address = Set(address);
    }
    active.updated_at = Set(Utc::now().fixed_offset());

    let user = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.id),
        "profile_update",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Profile updated",
        ProfileResponse {
            user: user_from_entity(user),
        },
        None,
    ))
}

pub(crate) async fn find_user(state: &AppState, id: Uuid) -> AppResult<UserModel> {
    Users::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("User"))
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
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

pub fn issue_token(secret: &str, user_id: Uuid, role: Role, ttl_days: i64) -> AppResult<String> {
    let now = Utc::now();
    let expiration = now
        .checked_add_signed(Duration::days(ttl_days))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user_id.to_string(),
        role: role.as_str().to_string(),
        iat: now.timestamp() as usize,
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

pub fn decode_token(secret: &str, token: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))
}

pub(crate) fn user_from_entity(model: UserModel) -> User {
    User {
        id: model.id,
        name: model.name,
        email: model.email,
        phone: model.phone,
        address: model.address,
        role: parse_stored(&model.role, Role::User),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}
