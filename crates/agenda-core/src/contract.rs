use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Pending,
    Signed,
    Cancelled,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Signed => "signed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SignaturePosition {
    #[serde(default = "first_page")]
    pub page: u32,
    pub x: f64,
    pub y: f64,
}

fn first_page() -> u32 {
    1
}

impl std::str::FromStr for SignaturePosition {
    type Err = anyhow::Error;

    /// `X,Y` or `X,Y@PAGE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (coords, page) = match s.split_once('@') {
            Some((coords, page)) => (
                coords,
                page.trim()
                    .parse::<u32>()
                    .with_context(|| format!("invalid page in signature position: {s}"))?,
            ),
            None => (s, 1),
        };
        let (x, y) = coords
            .split_once(',')
            .ok_or_else(|| anyhow!("expected X,Y[@PAGE], got: {s}"))?;
        let x: f64 = x
            .trim()
            .parse()
            .with_context(|| format!("invalid x coordinate: {s}"))?;
        let y: f64 = y
            .trim()
            .parse()
            .with_context(|| format!("invalid y coordinate: {s}"))?;
        if page == 0 || x < 0.0 || y < 0.0 {
            return Err(anyhow!("signature position out of range: {s}"));
        }
        Ok(Self { page, x, y })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub client_id: Option<u64>,
    pub document_path: String,
    #[serde(default)]
    pub signed_document_path: Option<String>,
    pub status: ContractStatus,
    #[serde(default)]
    pub signature_positions: Vec<SignaturePosition>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub signed_at: Option<DateTime<Utc>>,
    pub professional_id: u64,
}

impl Contract {
    pub fn sign(&mut self, positions: Vec<SignaturePosition>, now: DateTime<Utc>) -> anyhow::Result<()> {
        if self.status != ContractStatus::Pending {
            return Err(anyhow!(
                "contract {} is {}; only pending contracts can be signed",
                self.id,
                self.status.as_str()
            ));
        }
        if positions.is_empty() {
            return Err(anyhow!("at least one signature position is required"));
        }
        self.signature_positions = positions;
        self.signed_document_path = Some(self.document_path.clone());
        self.status = ContractStatus::Signed;
        self.signed_at = Some(now);
        Ok(())
    }
}

/// Document storage for contract PDFs, rooted under the data directory.
/// Files land at `<root>/<professional>/<unix-millis>_<name>`.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[tracing::instrument(skip(self, source, now), fields(source = %source.display()))]
    pub fn upload_pdf(
        &self,
        professional_id: u64,
        source: &Path,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        ensure_pdf(source)?;

        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("document path has no file name: {}", source.display()))?;

        let relative = format!(
            "{professional_id}/{}_{file_name}",
            now.timestamp_millis()
        );
        let target = self.root.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(source, &target).with_context(|| {
            format!(
                "failed to copy {} to {}",
                source.display(),
                target.display()
            )
        })?;

        info!(stored = %target.display(), "stored contract document");
        Ok(relative)
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

fn ensure_pdf(path: &Path) -> anyhow::Result<()> {
    let has_pdf_ext = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !has_pdf_ext {
        return Err(anyhow!("please select a PDF file: {}", path.display()));
    }

    let mut head = [0_u8; 5];
    let mut file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let read = file
        .read(&mut head)
        .with_context(|| format!("failed to read {}", path.display()))?;
    debug!(read, "checked document header");
    if read < PDF_MAGIC.len() || head != PDF_MAGIC {
        return Err(anyhow!("file is not a PDF document: {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::{Contract, ContractStatus, DocumentStore, SignaturePosition};

    #[test]
    fn parses_signature_positions() {
        let pos: SignaturePosition = "120.5,300".parse().expect("parse position");
        assert_eq!(pos.page, 1);
        assert!((pos.x - 120.5).abs() < f64::EPSILON);

        let pos: SignaturePosition = "10,20@3".parse().expect("parse paged position");
        assert_eq!(pos.page, 3);

        assert!("10".parse::<SignaturePosition>().is_err());
        assert!("10,20@0".parse::<SignaturePosition>().is_err());
    }

    #[test]
    fn upload_rejects_non_pdf() {
        let temp = tempdir().expect("tempdir");
        let store = DocumentStore::new(temp.path().join("contracts"));

        let txt = temp.path().join("notes.txt");
        std::fs::write(&txt, "hello").expect("write txt");
        assert!(store.upload_pdf(1, &txt, Utc::now()).is_err());

        let fake = temp.path().join("fake.pdf");
        std::fs::write(&fake, "not really").expect("write fake");
        assert!(store.upload_pdf(1, &fake, Utc::now()).is_err());
    }

    #[test]
    fn upload_copies_pdf_under_professional() {
        let temp = tempdir().expect("tempdir");
        let store = DocumentStore::new(temp.path().join("contracts"));
        let pdf = temp.path().join("lease.pdf");
        std::fs::write(&pdf, b"%PDF-1.7\n...").expect("write pdf");

        let stored = store.upload_pdf(7, &pdf, Utc::now()).expect("upload");
        assert!(stored.starts_with("7/"));
        assert!(stored.ends_with("_lease.pdf"));
        assert!(store.resolve(&stored).exists());
    }

    #[test]
    fn signing_is_one_shot() {
        let now = Utc::now();
        let mut contract = Contract {
            id: 1,
            title: "Service agreement".to_string(),
            client_id: Some(2),
            document_path: "1/0_agreement.pdf".to_string(),
            signed_document_path: None,
            status: ContractStatus::Pending,
            signature_positions: vec![],
            created_at: now,
            signed_at: None,
            professional_id: 1,
        };

        assert!(contract.sign(vec![], now).is_err());

        let pos: SignaturePosition = "10,20".parse().expect("position");
        contract.sign(vec![pos], now).expect("first sign");
        assert_eq!(contract.status, ContractStatus::Signed);
        assert_eq!(contract.signed_at, Some(now));
        assert!(contract.sign(vec![pos], now).is_err());
    }
}
