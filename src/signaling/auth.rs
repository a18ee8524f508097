//! Caller identity for the RPC surface. The upstream gateway authenticates
//! the user and forwards their id in `x-user-id`; roles live in the store.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::store::users::Role;
use crate::store::Store;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthenticated)?;

        Ok(Caller {
            user_id: user_id.to_string(),
        })
    }
}

impl Caller {
    pub fn require_admin(&self, store: &Store) -> Result<(), ApiError> {
        match store.user_role(&self.user_id)? {
            Role::Admin => Ok(()),
            Role::Member => Err(ApiError::PermissionDenied(
                "only admins can do this".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<Caller, ApiError> {
        let mut builder = Request::builder().uri("/rpc/forwarding");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn header_identifies_caller() {
        let caller = extract(Some(" owner-1 ")).await.unwrap();
        assert_eq!(caller.user_id, "owner-1");
    }

    #[tokio::test]
    async fn missing_or_blank_header_is_unauthenticated() {
        assert!(matches!(extract(None).await, Err(ApiError::Unauthenticated)));
        assert!(matches!(extract(Some("  ")).await, Err(ApiError::Unauthenticated)));
    }

    #[test]
    fn only_admins_pass_the_admin_check() {
        let store = Store::open_in_memory().unwrap();
        store.set_user_role("owner-1", Role::Admin).unwrap();

        let admin = Caller { user_id: "owner-1".into() };
        let member = Caller { user_id: "tech-7".into() };
        assert!(admin.require_admin(&store).is_ok());
        assert!(matches!(
            member.require_admin(&store),
            Err(ApiError::PermissionDenied(_))
        ));
    }
}
