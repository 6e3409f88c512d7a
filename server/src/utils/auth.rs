use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::utils::error::AppError;

/// Header carrying the user id resolved by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the caller's role, set by the same upstream layer.
pub const USER_ROLE_HEADER: &str = "x-user-role";

const STAFF_ROLES: [&str; 2] = ["staff", "admin"];

/// Authenticated caller. Authentication itself happens upstream; this only
/// reads the trusted user id it forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::AuthError("Missing user identity".to_string()))?;

        raw.to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(CurrentUser)
            .ok_or_else(|| AppError::AuthError("Malformed user identity".to_string()))
    }
}

/// Identified caller holding a staff or admin role. Required for check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaffUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for StaffUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user_id) = CurrentUser::from_request_parts(parts, state).await?;

        let is_staff = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|role| {
                let role = role.trim();
                STAFF_ROLES.iter().any(|staff| role.eq_ignore_ascii_case(staff))
            })
            .unwrap_or(false);
        if !is_staff {
            return Err(AppError::Forbidden("Check-in requires a staff role".to_string()));
        }
        Ok(StaffUser(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<CurrentUser, AppError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CurrentUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_reads_user_id_header() {
        assert_eq!(extract(Some("42")).await.unwrap(), CurrentUser(42));
    }

    #[tokio::test]
    async fn test_rejects_missing_or_malformed_header() {
        assert!(matches!(extract(None).await, Err(AppError::AuthError(_))));
        assert!(matches!(extract(Some("abc")).await, Err(AppError::AuthError(_))));
        assert!(matches!(extract(Some("-1")).await, Err(AppError::AuthError(_))));
    }

    async fn extract_staff(user: Option<&str>, role: Option<&str>) -> Result<StaffUser, AppError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = user {
            builder = builder.header(USER_ID_HEADER, value);
        }
        if let Some(value) = role {
            builder = builder.header(USER_ROLE_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        StaffUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_accepts_staff_and_admin_roles() {
        assert_eq!(extract_staff(Some("7"), Some("staff")).await.unwrap(), StaffUser(7));
        assert_eq!(extract_staff(Some("7"), Some(" Admin ")).await.unwrap(), StaffUser(7));
    }

    #[tokio::test]
    async fn test_customers_are_forbidden_and_anonymous_unauthenticated() {
        assert!(matches!(
            extract_staff(Some("7"), None).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            extract_staff(Some("7"), Some("customer")).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            extract_staff(None, Some("staff")).await,
            Err(AppError::AuthError(_))
        ));
    }
}
