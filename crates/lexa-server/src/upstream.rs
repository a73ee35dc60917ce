//! [`HttpUpstream`]: fact producer, entity and evidence catalogs and blob
//! store backed by the domain service's HTTP API.
//!
//! | Method | Path | Returns |
//! |--------|------|---------|
//! | `GET`  | `/tenants/{tenant}/facts?module=...&loan_id=...` | `{ "factVersion", "data" }` |
//! | `GET`  | `/tenants/{tenant}/loans/recent?limit=N` | loan ids, newest first |
//! | `GET`  | `/tenants/{tenant}/loans/{loan}/kpis?limit=N` | KPI ids |
//! | `GET`  | `/tenants/{tenant}/loans/{loan}/covenants?limit=N` | covenant ids |
//! | `GET`  | `/tenants/{tenant}/loans/{loan}/evidence/{id}` | evidence metadata |
//! | `GET`  | `/blobs/{key}` | raw bytes |
//!
//! `404` maps to not found; `429`, `5xx`, timeouts and connection failures
//! are transient; anything else is an invalid response.

use std::time::Duration;

use anyhow::{Context as _, bail};
use bytes::Bytes;
use lexa_core::{
  entity::EntityKeys,
  evidence::EvidenceRecord,
  fact::FactPayload,
  producer::{
    BlobError, BlobStore, EntityCatalog, EvidenceCatalog, FactProducer, ProducerError,
  },
};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
  client: Client,
  base:   Url,
}

impl HttpUpstream {
  pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
    let base = Url::parse(base_url).with_context(|| format!("invalid upstream url {base_url:?}"))?;
    if base.cannot_be_a_base() {
      bail!("upstream url {base_url:?} cannot be a base");
    }
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, base })
  }

  /// `base` with `segments` appended, each percent-encoded.
  fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  async fn fetch_json<T: DeserializeOwned>(
    &self,
    req: RequestBuilder,
    what: &str,
  ) -> Result<T, ProducerError> {
    let resp = req.send().await.map_err(|e| transport_error(e, what))?;
    let status = resp.status();
    if !status.is_success() {
      debug!(%status, what, "upstream request failed");
      return Err(status_error(status, what));
    }
    resp.json().await.map_err(|e| transport_error(e, what))
  }

  async fn list_ids(
    &self,
    segments: &[&str],
    limit: usize,
    what: &str,
  ) -> Result<Vec<String>, ProducerError> {
    let req = self
      .client
      .get(self.url(segments.iter().copied()))
      .query(&[("limit", limit)]);
    let mut ids: Vec<String> = self.fetch_json(req, what).await?;
    ids.truncate(limit);
    Ok(ids)
  }
}

fn status_error(status: StatusCode, what: &str) -> ProducerError {
  if status == StatusCode::NOT_FOUND {
    ProducerError::NotFound(what.to_owned())
  } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
    ProducerError::Transient(format!("{what}: upstream returned {status}"))
  } else {
    ProducerError::Invalid(format!("{what}: upstream returned {status}"))
  }
}

fn transport_error(e: reqwest::Error, what: &str) -> ProducerError {
  if e.is_decode() {
    ProducerError::Invalid(format!("{what}: {e}"))
  } else {
    ProducerError::Transient(format!("{what}: {e}"))
  }
}

impl FactProducer for HttpUpstream {
  async fn compute(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
  ) -> Result<FactPayload, ProducerError> {
    let req = self.client.get(self.url(["tenants", tenant_id, "facts"])).query(entity);
    self.fetch_json(req, &entity.to_string()).await
  }
}

impl EntityCatalog for HttpUpstream {
  async fn recent_loans(
    &self,
    tenant_id: &str,
    limit: usize,
  ) -> Result<Vec<String>, ProducerError> {
    self
      .list_ids(&["tenants", tenant_id, "loans", "recent"], limit, "recent loans")
      .await
  }

  async fn kpis_for_loan(
    &self,
    tenant_id: &str,
    loan_id: &str,
    limit: usize,
  ) -> Result<Vec<String>, ProducerError> {
    self
      .list_ids(&["tenants", tenant_id, "loans", loan_id, "kpis"], limit, "loan kpis")
      .await
  }

  async fn covenants_for_loan(
    &self,
    tenant_id: &str,
    loan_id: &str,
    limit: usize,
  ) -> Result<Vec<String>, ProducerError> {
    self
      .list_ids(&["tenants", tenant_id, "loans", loan_id, "covenants"], limit, "loan covenants")
      .await
  }
}

impl EvidenceCatalog for HttpUpstream {
  async fn evidence(
    &self,
    tenant_id: &str,
    loan_id: &str,
    evidence_id: &str,
  ) -> Result<EvidenceRecord, ProducerError> {
    let url = self.url(["tenants", tenant_id, "loans", loan_id, "evidence", evidence_id]);
    self.fetch_json(self.client.get(url), &format!("evidence {evidence_id}")).await
  }
}

impl BlobStore for HttpUpstream {
  async fn get_object(&self, key: &str) -> Result<Bytes, BlobError> {
    let url = self.url(std::iter::once("blobs").chain(key.split('/')));
    let resp = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| BlobError::Transient(format!("{key}: {e}")))?;
    match resp.status() {
      StatusCode::NOT_FOUND => Err(BlobError::NotFound(key.to_owned())),
      status if !status.is_success() => {
        Err(BlobError::Transient(format!("{key}: storage returned {status}")))
      }
      _ => resp
        .bytes()
        .await
        .map_err(|e| BlobError::Transient(format!("{key}: {e}"))),
    }
  }
}
