//! Evidence fetches from blob storage.

use bytes::Bytes;
use lexa_core::producer::{BlobError, BlobStore};

use crate::{
  Result,
  retry::{RetryPolicy, retry_with_backoff},
};

/// Fetch `key`, retrying transient storage failures with exponential
/// backoff. A missing object fails immediately.
pub async fn fetch_with_backoff<B: BlobStore>(
  blobs: &B,
  key: &str,
  policy: &RetryPolicy,
) -> Result<Bytes> {
  let bytes = retry_with_backoff(policy, "blob.get_object", BlobError::is_retryable, move || {
    blobs.get_object(key)
  })
  .await?;
  Ok(bytes)
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
  };

  use super::*;
  use crate::EngineError;

  struct FlakyBlobs {
    calls:    AtomicU32,
    fail_for: u32,
  }

  impl BlobStore for FlakyBlobs {
    async fn get_object(&self, key: &str) -> Result<Bytes, BlobError> {
      let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
      if key == "missing" {
        return Err(BlobError::NotFound(key.to_owned()));
      }
      if n <= self.fail_for {
        Err(BlobError::Transient("connection reset".into()))
      } else {
        Ok(Bytes::from_static(b"evidence"))
      }
    }
  }

  fn policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2))
  }

  #[tokio::test]
  async fn retries_transient_errors() {
    let blobs = FlakyBlobs { calls: AtomicU32::new(0), fail_for: 2 };
    let bytes = fetch_with_backoff(&blobs, "doc.pdf", &policy()).await.unwrap();
    assert_eq!(&bytes[..], b"evidence");
    assert_eq!(blobs.calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn missing_objects_fail_fast() {
    let blobs = FlakyBlobs { calls: AtomicU32::new(0), fail_for: 0 };
    let err = fetch_with_backoff(&blobs, "missing", &policy()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert_eq!(blobs.calls.load(Ordering::SeqCst), 1);
  }
}
