use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::{Actor, Role};

pub const ROLE_HEADER: &str = "x-actor-role";
pub const ID_HEADER: &str = "x-actor-id";

/// Identity claim resolved upstream by the auth layer and forwarded as headers.
#[derive(Debug, Clone, Copy)]
pub struct Claim(pub Actor);

impl Claim {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.0.role) {
            Ok(())
        } else {
            Err(AppError::Authorization(format!(
                "{:?} may not perform this action",
                self.0.role
            )))
        }
    }

    /// Passes for admins and for `role` acting on its own id.
    pub fn require_self_or_admin(&self, role: Role, id: Uuid) -> Result<(), AppError> {
        if self.0.role == Role::Admin || self.0.is(role, id) {
            Ok(())
        } else {
            Err(AppError::Authorization(format!(
                "{:?} may not act on behalf of {id}",
                self.0.role
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Claim
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw_role = header(parts, ROLE_HEADER)?
            .ok_or_else(|| AppError::Authorization(format!("missing {ROLE_HEADER} header")))?;
        let role = Role::parse(raw_role)
            .ok_or_else(|| AppError::Authorization(format!("unknown actor role: {raw_role}")))?;

        let id = header(parts, ID_HEADER)?
            .map(|raw| {
                Uuid::parse_str(raw.trim())
                    .map_err(|err| AppError::Authorization(format!("invalid {ID_HEADER}: {err}")))
            })
            .transpose()?;

        if role != Role::Admin && id.is_none() {
            return Err(AppError::Authorization(format!(
                "{role:?} claims need an {ID_HEADER} header"
            )));
        }

        Ok(Claim(Actor { role, id }))
    }
}

/// A claim that must carry the admin role; rejected during extraction so it
/// fails before extractors placed after it, such as a websocket upgrade.
#[derive(Debug, Clone, Copy)]
pub struct AdminClaim(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for AdminClaim
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claim = Claim::from_request_parts(parts, state).await?;
        claim.require_role(&[Role::Admin])?;
        Ok(AdminClaim(claim.0))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, AppError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AppError::Authorization(format!("{name} is not valid ascii")))
        })
        .transpose()
}
