use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage backend types
///
/// Names are the keys the storage registry resolves constructors by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local filesystem tree under a base directory.
    Local,
    /// S3-compatible object storage.
    S3,
    /// Remote filesystem mounted into the local namespace (NFS, SSHFS, SMB).
    Nfs,
}

impl StorageBackend {
    pub const ALL: [StorageBackend; 3] = [StorageBackend::Local, StorageBackend::S3, StorageBackend::Nfs];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageBackend::Local => "local",
            StorageBackend::S3 => "s3",
            StorageBackend::Nfs => "nfs",
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "s3" => Ok(StorageBackend::S3),
            "nfs" => Ok(StorageBackend::Nfs),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("LOCAL".parse::<StorageBackend>(), Ok(StorageBackend::Local));
        assert_eq!("s3".parse::<StorageBackend>(), Ok(StorageBackend::S3));
        assert!("ftp".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn display_matches_registry_names() {
        for backend in StorageBackend::ALL {
            assert_eq!(backend.to_string().parse::<StorageBackend>(), Ok(backend));
        }
    }
}
