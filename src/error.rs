use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilingError {
    #[error("malformed filing data for organization {org_id}: {detail}")]
    MalformedFiling { org_id: String, detail: String },

    #[error("could not fetch organization {org_id}: {reason}")]
    Fetch { org_id: String, reason: String },

    #[error("unreadable source file {path}: {reason}")]
    UnreadableSourceFile { path: String, reason: String },

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("export error: {0}")]
    Export(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FilingError {
    /// Errors that only spoil the organization being processed. The run
    /// logs them and moves on to the next organization.
    pub fn is_org_local(&self) -> bool {
        matches!(
            self,
            FilingError::MalformedFiling { .. } | FilingError::Fetch { .. }
        )
    }

    pub(crate) fn malformed(org_id: &str, detail: impl Into<String>) -> Self {
        FilingError::MalformedFiling {
            org_id: org_id.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn unreadable(path: &str, reason: impl ToString) -> Self {
        FilingError::UnreadableSourceFile {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FilingError>;

#[test]
fn org_local_errors() {
    assert!(FilingError::malformed("1", "missing totrevenue").is_org_local());
    assert!(FilingError::Fetch {
        org_id: "1".into(),
        reason: "HTTP 404".into()
    }
    .is_org_local());
    assert!(!FilingError::unreadable("listoforgs.csv", "not found").is_org_local());
}
