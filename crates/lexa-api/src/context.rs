//! Per-request caller context taken from headers.
//!
//! Authentication happens upstream of this service; the gateway forwards the
//! verified identity in these headers:
//!
//! | Header | Notes |
//! |--------|-------|
//! | `x-tenant-id` | Required |
//! | `x-actor-id` | Required; user id, or client id with `x-actor-type: SERVICE` |
//! | `x-actor-type` | `USER` (default) or `SERVICE` |
//! | `x-actor-roles` | Comma-separated role names |
//! | `x-correlation-id` | Generated when absent |

use axum::{extract::FromRequestParts, http::request::Parts};
use lexa_core::audit::{Actor, ActorType};
use uuid::Uuid;

use crate::error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";
pub const ACTOR_TYPE_HEADER: &str = "x-actor-type";
pub const ROLES_HEADER: &str = "x-actor-roles";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Debug, Clone)]
pub struct RequestContext {
  pub tenant_id:      String,
  pub actor:          Actor,
  pub correlation_id: String,
}

impl RequestContext {
  pub fn correlation_id(&self) -> Option<&str> { Some(&self.correlation_id) }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
  match parts.headers.get(name) {
    None => Ok(None),
    Some(v) => v
      .to_str()
      .map(|s| Some(s.trim()).filter(|s| !s.is_empty()))
      .map_err(|_| ApiError::BadRequest(format!("{name} is not valid UTF-8"))),
  }
}

fn required<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
  header(parts, name)?.ok_or_else(|| ApiError::BadRequest(format!("missing {name} header")))
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    let tenant_id = required(parts, TENANT_HEADER)?.to_owned();
    let actor_id = required(parts, ACTOR_HEADER)?.to_owned();

    let actor_type = match header(parts, ACTOR_TYPE_HEADER)? {
      Some(t) => ActorType::parse(t)?,
      None => ActorType::User,
    };
    let actor = match actor_type {
      ActorType::Service => Actor::Service { client_id: actor_id },
      ActorType::User => {
        let roles = header(parts, ROLES_HEADER)?
          .map(|r| {
            r.split(',')
              .map(str::trim)
              .filter(|r| !r.is_empty())
              .map(str::to_owned)
              .collect()
          })
          .unwrap_or_default();
        Actor::user(actor_id, roles)
      }
    };

    let correlation_id = match header(parts, CORRELATION_HEADER)? {
      Some(id) => id.to_owned(),
      None => Uuid::new_v4().to_string(),
    };

    Ok(Self { tenant_id, actor, correlation_id })
  }
}
