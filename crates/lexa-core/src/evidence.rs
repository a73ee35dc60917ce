//! ESG evidence documents and their automatic verification.
//!
//! Verification is a deterministic first pass over the uploaded file: it
//! never reads the document's content, only its size, type and checksum.
//! Anything it cannot vouch for is left for manual review.

use serde::{Deserialize, Serialize};

/// Files smaller than this are too small to be meaningful evidence.
pub const MIN_EVIDENCE_BYTES: usize = 20;

/// Evidence metadata as known upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRecord {
  pub evidence_id:  String,
  pub loan_id:      String,
  pub title:        String,
  pub content_type: String,
  /// Blob storage key of the uploaded file.
  pub file_key:     String,
  #[serde(default)]
  pub checksum:     Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
  Verified,
  NeedsReview,
  Rejected,
}

impl VerificationStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Verified => "VERIFIED",
      Self::NeedsReview => "NEEDS_REVIEW",
      Self::Rejected => "REJECTED",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceVerification {
  pub evidence_id: String,
  pub loan_id:     String,
  pub status:      VerificationStatus,
  /// In `0.0..=1.0`.
  pub confidence:  f64,
  pub notes:       Vec<String>,
  pub bytes:       usize,
}

/// Assess an evidence file of `bytes` bytes described by `record`.
pub fn assess(record: &EvidenceRecord, bytes: usize) -> EvidenceVerification {
  let mut status = VerificationStatus::Verified;
  let mut confidence: f64 = 0.85;
  let mut notes = Vec::new();

  if record.checksum.as_deref().is_none_or(|c| c.trim().is_empty()) {
    status = VerificationStatus::NeedsReview;
    confidence = 0.4;
    notes.push("missing checksum".to_owned());
  }

  if bytes == 0 {
    status = VerificationStatus::Rejected;
    confidence = 0.1;
    notes.push("empty file".to_owned());
  } else if bytes < MIN_EVIDENCE_BYTES {
    status = VerificationStatus::NeedsReview;
    confidence = confidence.min(0.55);
    notes.push("file is very small; needs manual review".to_owned());
  } else {
    notes.push("file present and non-empty".to_owned());
  }

  if record.content_type.to_ascii_lowercase().contains("pdf") {
    notes.push("PDF evidence detected".to_owned());
    confidence = (confidence + 0.05).min(0.95);
  } else {
    notes.push(format!("non-PDF evidence ({}); acceptable but less standardized", record.content_type));
    confidence = confidence.min(0.8);
  }

  notes.push(format!("auto-check complete for {:?}", record.title));

  EvidenceVerification {
    evidence_id: record.evidence_id.clone(),
    loan_id: record.loan_id.clone(),
    status,
    confidence,
    notes,
    bytes,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(content_type: &str, checksum: Option<&str>) -> EvidenceRecord {
    EvidenceRecord {
      evidence_id:  "ev-1".into(),
      loan_id:      "loan-1".into(),
      title:        "Annual ESG report".into(),
      content_type: content_type.into(),
      file_key:     "evidence/ev-1.pdf".into(),
      checksum:     checksum.map(str::to_owned),
    }
  }

  fn close(a: f64, b: f64) -> bool { (a - b).abs() < 1e-9 }

  #[test]
  fn checksummed_pdf_is_verified() {
    let v = assess(&record("application/pdf", Some("abc")), 4096);
    assert_eq!(v.status, VerificationStatus::Verified);
    assert!(close(v.confidence, 0.9));
    assert_eq!(v.notes.last().unwrap(), "auto-check complete for \"Annual ESG report\"");
  }

  #[test]
  fn missing_checksum_needs_review() {
    let v = assess(&record("text/plain", None), 4096);
    assert_eq!(v.status, VerificationStatus::NeedsReview);
    assert!(close(v.confidence, 0.4));
    assert_eq!(v.notes[0], "missing checksum");
  }

  #[test]
  fn empty_and_tiny_files() {
    let empty = assess(&record("application/pdf", Some("abc")), 0);
    assert_eq!(empty.status, VerificationStatus::Rejected);
    assert!(close(empty.confidence, 0.15));

    let tiny = assess(&record("text/csv", Some("abc")), MIN_EVIDENCE_BYTES - 1);
    assert_eq!(tiny.status, VerificationStatus::NeedsReview);
    assert!(close(tiny.confidence, 0.55));
  }
}
