use affitto_core::models::{OwnerContact, Profile, Property};
use affitto_core::{
    new_id, now_micros, now_timestamp, AuthResponse, ConfirmPaymentRequest, ConfirmPaymentResponse,
    ContactRequest, CreatePaymentIntentRequest, CreatePaymentIntentResponse, Error, LoginRequest,
    PropertyQuery, RegisterRequest, Role, StatusResponse, UpdateProfileRequest, User,
};
use axum::body::Bytes;
use axum::extract::multipart::Field;
use axum::extract::{Extension, Multipart, Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::auth::{self, ApiError};
use crate::AppState;

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Handler for POST /api/register
pub async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    if req.name.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(auth::bad_request("name, email and password are required"));
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(&req.email)
        .fetch_one(&state.pool)
        .await
        .map_err(auth::internal)?;
    if existing > 0 {
        return Err((
            StatusCode::CONFLICT,
            Json(Error::new("conflict", "user already exists")),
        ));
    }

    let user_id = new_id();
    let token = new_id();
    let password_hash = hash_password(&req.password);
    let role = req.role.unwrap_or(Role::Tenant);
    let created_at = now_timestamp();

    sqlx::query(
        "INSERT INTO users (user_id, name, email, password_hash, phone, role, token, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user_id)
    .bind(&req.name)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&req.phone)
    .bind(role.as_str())
    .bind(&token)
    .bind(&created_at)
    .execute(&state.pool)
    .await
    .map_err(auth::internal)?;

    let user = User {
        user_id,
        name: req.name,
        email: req.email,
        role,
        phone: req.phone,
    };
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

/// Handler for POST /api/login
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let row =
        sqlx::query("SELECT user_id, name, email, role, phone, password_hash FROM users WHERE email = ?")
            .bind(&req.email)
            .fetch_optional(&state.pool)
            .await
            .map_err(auth::internal)?;
    // same answer for unknown email and wrong password
    let row = row.ok_or_else(|| auth::unauthorized("invalid credentials"))?;

    let stored_hash: String = row.try_get("password_hash").map_err(auth::internal)?;
    if hash_password(&req.password) != stored_hash {
        return Err(auth::unauthorized("invalid credentials"));
    }

    let user = auth::user_from_row(&row).map_err(auth::internal)?;

    // rotate the token on every login
    let token = new_id();
    sqlx::query("UPDATE users SET token = ? WHERE user_id = ?")
        .bind(&token)
        .bind(&user.user_id)
        .execute(&state.pool)
        .await
        .map_err(auth::internal)?;

    Ok(Json(AuthResponse { token, user }))
}

/// Handler for GET /api/user/profile
pub async fn get_profile(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Profile>, ApiError> {
    let user = auth::require_user(&state.pool, &headers).await?;
    let profile = profile_by_id(&state.pool, &user.user_id).await?;
    Ok(Json(profile))
}

/// Handler for PUT /api/user/profile; absent fields are left unchanged.
pub async fn update_profile(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>, ApiError> {
    let user = auth::require_user(&state.pool, &headers).await?;

    sqlx::query(
        "UPDATE users SET name = COALESCE(?, name), phone = COALESCE(?, phone), \
         address = COALESCE(?, address), bio = COALESCE(?, bio) WHERE user_id = ?",
    )
    .bind(&req.name)
    .bind(&req.phone)
    .bind(&req.address)
    .bind(&req.bio)
    .bind(&user.user_id)
    .execute(&state.pool)
    .await
    .map_err(auth::internal)?;

    let profile = profile_by_id(&state.pool, &user.user_id).await?;
    Ok(Json(profile))
}

async fn profile_by_id(pool: &SqlitePool, user_id: &str) -> Result<Profile, ApiError> {
    let row = sqlx::query(
        "SELECT user_id, name, email, role, phone, address, bio, created_at \
         FROM users WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .map_err(auth::internal)?;

    let role: String = row.try_get("role").map_err(auth::internal)?;
    Ok(Profile {
        user_id: row.try_get("user_id").map_err(auth::internal)?,
        name: row.try_get("name").map_err(auth::internal)?,
        email: row.try_get("email").map_err(auth::internal)?,
        role: Role::parse(&role).unwrap_or(Role::Tenant),
        phone: row.try_get("phone").map_err(auth::internal)?,
        address: row.try_get("address").map_err(auth::internal)?,
        bio: row.try_get("bio").map_err(auth::internal)?,
        created_at: row.try_get("created_at").map_err(auth::internal)?,
    })
}

const PROPERTY_SELECT: &str = "SELECT p.property_id, p.title, p.description, p.location, p.city, p.price, p.kind, \
            p.bedrooms, p.bathrooms, p.size, p.images, p.featured, p.available, p.created_at, \
            u.user_id AS owner_id, u.name AS owner_name, u.email AS owner_email, u.phone AS owner_phone \
     FROM properties p JOIN users u ON u.user_id = p.owner_id";

fn property_from_row(row: &SqliteRow) -> Result<Property, sqlx::Error> {
    let images_raw: String = row.try_get("images")?;
    let featured: i64 = row.try_get("featured")?;
    let available: i64 = row.try_get("available")?;
    Ok(Property {
        property_id: row.try_get("property_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        city: row.try_get("city")?,
        price: row.try_get("price")?,
        kind: row.try_get("kind")?,
        bedrooms: row.try_get("bedrooms")?,
        bathrooms: row.try_get("bathrooms")?,
        size: row.try_get("size")?,
        images: serde_json::from_str(&images_raw).unwrap_or_default(),
        featured: featured != 0,
        available: available != 0,
        owner: OwnerContact {
            user_id: row.try_get("owner_id")?,
            name: row.try_get("owner_name")?,
            email: row.try_get("owner_email")?,
            phone: row.try_get("owner_phone")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

async fn fetch_property(pool: &SqlitePool, property_id: &str) -> Result<Property, ApiError> {
    let sql = format!("{} WHERE p.property_id = ?", PROPERTY_SELECT);
    let row = sqlx::query(&sql)
        .bind(property_id)
        .fetch_optional(pool)
        .await
        .map_err(auth::internal)?
        .ok_or_else(|| auth::not_found("property not found"))?;
    property_from_row(&row).map_err(auth::internal)
}

/// Handler for GET /api/properties. Filters are applied over the available
/// listings; the filter contract is intentionally shallow.
pub async fn list_properties(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<PropertyQuery>,
) -> Result<Json<Vec<Property>>, ApiError> {
    let sql = format!(
        "{} WHERE p.available = 1 ORDER BY p.created_at DESC",
        PROPERTY_SELECT
    );
    let rows = sqlx::query(&sql)
        .fetch_all(&state.pool)
        .await
        .map_err(auth::internal)?;
    let mut properties = rows
        .iter()
        .map(property_from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(auth::internal)?;

    if let Some(location) = &query.location {
        let needle = location.to_lowercase();
        properties.retain(|p| p.city.to_lowercase().contains(&needle));
    }
    if let Some(kind) = &query.kind {
        properties.retain(|p| &p.kind == kind);
    }
    if let Some(min) = query.min_price {
        properties.retain(|p| p.price >= min);
    }
    if let Some(max) = query.max_price {
        properties.retain(|p| p.price <= max);
    }
    if let Some(bedrooms) = query.bedrooms {
        properties.retain(|p| p.bedrooms >= bedrooms);
    }

    Ok(Json(properties))
}

/// Handler for GET /api/properties/featured
pub async fn featured_properties(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Property>>, ApiError> {
    let sql = format!(
        "{} WHERE p.featured = 1 AND p.available = 1 ORDER BY p.created_at DESC LIMIT 6",
        PROPERTY_SELECT
    );
    let rows = sqlx::query(&sql)
        .fetch_all(&state.pool)
        .await
        .map_err(auth::internal)?;
    let properties = rows
        .iter()
        .map(property_from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(auth::internal)?;
    Ok(Json(properties))
}

/// Handler for GET /api/properties/:id
pub async fn get_property(
    Extension(state): Extension<Arc<AppState>>,
    Path(property_id): Path<String>,
) -> Result<Json<Property>, ApiError> {
    let property = fetch_property(&state.pool, &property_id).await?;
    Ok(Json(property))
}

/// Handler for GET /api/user/properties
pub async fn my_properties(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Property>>, ApiError> {
    let user = auth::require_user(&state.pool, &headers).await?;
    let sql = format!(
        "{} WHERE p.owner_id = ? ORDER BY p.created_at DESC",
        PROPERTY_SELECT
    );
    let rows = sqlx::query(&sql)
        .bind(&user.user_id)
        .fetch_all(&state.pool)
        .await
        .map_err(auth::internal)?;
    let properties = rows
        .iter()
        .map(property_from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(auth::internal)?;
    Ok(Json(properties))
}

const MAX_IMAGES: usize = 10;
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Multipart form for listing create/update. Absent fields stay None so the
/// same reader serves partial updates. Image bytes are buffered here and only
/// hit disk once the handler's validation has passed.
#[derive(Default)]
struct PropertyForm {
    title: Option<String>,
    description: Option<String>,
    location: Option<String>,
    city: Option<String>,
    price: Option<i64>,
    kind: Option<String>,
    bedrooms: Option<i64>,
    bathrooms: Option<i64>,
    size: Option<i64>,
    featured: Option<bool>,
    images: Vec<PendingImage>,
}

struct PendingImage {
    filename: String,
    data: Bytes,
}

async fn text_field(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| auth::bad_request(format!("invalid form field: {}", e)))
}

async fn read_property_form(mut multipart: Multipart) -> Result<PropertyForm, ApiError> {
    let mut form = PropertyForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| auth::bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => form.title = Some(text_field(field).await?),
            "description" => form.description = Some(text_field(field).await?),
            "location" => form.location = Some(text_field(field).await?),
            "city" => form.city = Some(text_field(field).await?),
            "type" => form.kind = Some(text_field(field).await?),
            "price" => form.price = text_field(field).await?.trim().parse().ok(),
            "bedrooms" => form.bedrooms = text_field(field).await?.trim().parse().ok(),
            "bathrooms" => form.bathrooms = text_field(field).await?.trim().parse().ok(),
            "size" => form.size = text_field(field).await?.trim().parse().ok(),
            "featured" => form.featured = Some(text_field(field).await? == "true"),
            "images" => {
                if form.images.len() >= MAX_IMAGES {
                    return Err(auth::bad_request("too many images"));
                }
                let content_type = field.content_type().unwrap_or_default().to_string();
                if !content_type.starts_with("image/") {
                    return Err(auth::bad_request("only image files are allowed"));
                }
                let original = field.file_name().unwrap_or("image").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| auth::bad_request(format!("failed to read image: {}", e)))?;
                if data.len() > MAX_IMAGE_BYTES {
                    return Err(auth::bad_request("image larger than 10 MiB"));
                }
                // keep only the final path component of the client filename
                let base = std::path::Path::new(&original)
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("image");
                let filename = format!("{}-{}", now_micros() / 1000, base);
                form.images.push(PendingImage { filename, data });
            }
            _ => {}
        }
    }
    Ok(form)
}

/// Write buffered image bytes under the upload directory and return their
/// public `/uploads/...` paths.
async fn store_images(state: &AppState, images: Vec<PendingImage>) -> Result<Vec<String>, ApiError> {
    let mut paths = Vec::with_capacity(images.len());
    for image in images {
        tokio::fs::write(state.upload_dir.join(&image.filename), &image.data)
            .await
            .map_err(auth::internal)?;
        paths.push(format!("/uploads/{}", image.filename));
    }
    Ok(paths)
}

/// Handler for POST /api/properties (owner only, multipart with images)
pub async fn create_property(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Property>), ApiError> {
    let user = auth::require_user(&state.pool, &headers).await?;
    if user.role != Role::Owner {
        return Err(auth::forbidden("only owners can create listings"));
    }

    let form = read_property_form(multipart).await?;
    let title = form
        .title
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| auth::bad_request("title is required"))?;
    let location = form
        .location
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| auth::bad_request("location is required"))?;
    let city = form
        .city
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| auth::bad_request("city is required"))?;
    let kind = form
        .kind
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| auth::bad_request("type is required"))?;
    let price = form
        .price
        .ok_or_else(|| auth::bad_request("price is required"))?;

    // images reach disk only after field validation; a rejected form leaves
    // no files behind
    let image_paths = store_images(&state, form.images).await?;

    let property_id = new_id();
    let created_at = now_timestamp();
    let images_json = serde_json::to_string(&image_paths).map_err(auth::internal)?;

    sqlx::query(
        "INSERT INTO properties (property_id, title, description, location, city, price, kind, \
         bedrooms, bathrooms, size, images, featured, available, owner_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&property_id)
    .bind(&title)
    .bind(&form.description)
    .bind(&location)
    .bind(&city)
    .bind(price)
    .bind(&kind)
    .bind(form.bedrooms.unwrap_or(0))
    .bind(form.bathrooms.unwrap_or(0))
    .bind(form.size.unwrap_or(0))
    .bind(&images_json)
    .bind(form.featured.unwrap_or(false) as i64)
    .bind(&user.user_id)
    .bind(&created_at)
    .execute(&state.pool)
    .await
    .map_err(auth::internal)?;

    let property = fetch_property(&state.pool, &property_id).await?;
    Ok((StatusCode::CREATED, Json(property)))
}

/// Handler for PUT /api/properties/:id (owner of the row only)
pub async fn update_property(
    Extension(state): Extension<Arc<AppState>>,
    Path(property_id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Property>, ApiError> {
    let user = auth::require_user(&state.pool, &headers).await?;
    let owner_id: Option<String> =
        sqlx::query_scalar("SELECT owner_id FROM properties WHERE property_id = ?")
            .bind(&property_id)
            .fetch_optional(&state.pool)
            .await
            .map_err(auth::internal)?;
    let owner_id = owner_id.ok_or_else(|| auth::not_found("property not found"))?;
    if owner_id != user.user_id {
        return Err(auth::forbidden("access denied"));
    }

    let form = read_property_form(multipart).await?;
    let images_json = if form.images.is_empty() {
        None
    } else {
        let image_paths = store_images(&state, form.images).await?;
        Some(serde_json::to_string(&image_paths).map_err(auth::internal)?)
    };

    sqlx::query(
        "UPDATE properties SET title = COALESCE(?, title), description = COALESCE(?, description), \
         location = COALESCE(?, location), city = COALESCE(?, city), price = COALESCE(?, price), \
         kind = COALESCE(?, kind), bedrooms = COALESCE(?, bedrooms), \
         bathrooms = COALESCE(?, bathrooms), size = COALESCE(?, size), \
         featured = COALESCE(?, featured), images = COALESCE(?, images) \
         WHERE property_id = ?",
    )
    .bind(&form.title)
    .bind(&form.description)
    .bind(&form.location)
    .bind(&form.city)
    .bind(form.price)
    .bind(&form.kind)
    .bind(form.bedrooms)
    .bind(form.bathrooms)
    .bind(form.size)
    .bind(form.featured.map(|f| f as i64))
    .bind(&images_json)
    .bind(&property_id)
    .execute(&state.pool)
    .await
    .map_err(auth::internal)?;

    let property = fetch_property(&state.pool, &property_id).await?;
    Ok(Json(property))
}

/// Handler for DELETE /api/properties/:id (owner of the row only)
pub async fn delete_property(
    Extension(state): Extension<Arc<AppState>>,
    Path(property_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, ApiError> {
    let user = auth::require_user(&state.pool, &headers).await?;
    let owner_id: Option<String> =
        sqlx::query_scalar("SELECT owner_id FROM properties WHERE property_id = ?")
            .bind(&property_id)
            .fetch_optional(&state.pool)
            .await
            .map_err(auth::internal)?;
    let owner_id = owner_id.ok_or_else(|| auth::not_found("property not found"))?;
    if owner_id != user.user_id {
        return Err(auth::forbidden("access denied"));
    }

    sqlx::query("DELETE FROM properties WHERE property_id = ?")
        .bind(&property_id)
        .execute(&state.pool)
        .await
        .map_err(auth::internal)?;

    Ok(Json(StatusResponse {
        message: "Property deleted successfully".to_string(),
    }))
}

/// Handler for POST /api/contact. The messaging-focused schema keeps no
/// contact table; submissions are logged and acked.
pub async fn contact(Json(req): Json<ContactRequest>) -> Json<StatusResponse> {
    tracing::info!(
        "contact form submission from {} <{}>: {}",
        req.name,
        req.email,
        req.message
    );
    Json(StatusResponse {
        message: "Message sent successfully".to_string(),
    })
}

/// Handler for POST /api/create-payment-intent. Records the intent locally;
/// no external processor is called.
pub async fn create_payment_intent(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreatePaymentIntentRequest>,
) -> Result<Json<CreatePaymentIntentResponse>, ApiError> {
    let user = auth::require_user(&state.pool, &headers).await?;
    if req.amount <= 0 {
        return Err(auth::bad_request("amount must be positive"));
    }
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM properties WHERE property_id = ?")
        .bind(&req.property_id)
        .fetch_one(&state.pool)
        .await
        .map_err(auth::internal)?;
    if exists == 0 {
        return Err(auth::not_found("property not found"));
    }

    let intent_id = format!("pi_{}", new_id());
    let client_secret = format!("{}_secret_{}", intent_id, new_id());
    sqlx::query(
        "INSERT INTO payment_intents (intent_id, property_id, user_id, amount, client_secret, status, created_at) \
         VALUES (?, ?, ?, ?, ?, 'requires_confirmation', ?)",
    )
    .bind(&intent_id)
    .bind(&req.property_id)
    .bind(&user.user_id)
    .bind(req.amount)
    .bind(&client_secret)
    .bind(now_timestamp())
    .execute(&state.pool)
    .await
    .map_err(auth::internal)?;

    Ok(Json(CreatePaymentIntentResponse { client_secret }))
}

/// Handler for POST /api/confirm-payment. Marks the intent succeeded and the
/// property booked (unavailable).
pub async fn confirm_payment(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConfirmPaymentRequest>,
) -> Result<(StatusCode, Json<ConfirmPaymentResponse>), ApiError> {
    let user = auth::require_user(&state.pool, &headers).await?;

    let row = sqlx::query(
        "SELECT property_id, status FROM payment_intents WHERE intent_id = ? AND user_id = ?",
    )
    .bind(&req.payment_intent_id)
    .bind(&user.user_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(auth::internal)?;

    let confirmable = match &row {
        Some(r) => {
            let property_id: String = r.try_get("property_id").map_err(auth::internal)?;
            let status: String = r.try_get("status").map_err(auth::internal)?;
            property_id == req.property_id && status == "requires_confirmation"
        }
        None => false,
    };
    if !confirmable {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ConfirmPaymentResponse {
                success: false,
                message: "Payment not completed".to_string(),
            }),
        ));
    }

    sqlx::query("UPDATE payment_intents SET status = 'succeeded' WHERE intent_id = ?")
        .bind(&req.payment_intent_id)
        .execute(&state.pool)
        .await
        .map_err(auth::internal)?;
    sqlx::query("UPDATE properties SET available = 0 WHERE property_id = ?")
        .bind(&req.property_id)
        .execute(&state.pool)
        .await
        .map_err(auth::internal)?;

    Ok((
        StatusCode::OK,
        Json(ConfirmPaymentResponse {
            success: true,
            message: "Payment successful and property booked!".to_string(),
        }),
    ))
}
