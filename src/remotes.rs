//! Configured remote endpoints and the registry that orders them.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::json_file::{read_json, write_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderCategory {
    OAuthCloud,
    ObjectStorage,
    Protocol,
    Local,
}

/// Every storage backend the application knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "proton")]
    ProtonDrive,
    #[serde(rename = "gdrive")]
    GoogleDrive,
    #[serde(rename = "dropbox")]
    Dropbox,
    #[serde(rename = "onedrive")]
    OneDrive,
    #[serde(rename = "s3")]
    S3,
    #[serde(rename = "icloud")]
    ICloud,
    #[serde(rename = "mega")]
    Mega,
    #[serde(rename = "box")]
    Box,
    #[serde(rename = "pcloud")]
    PCloud,
    #[serde(rename = "webdav")]
    WebDav,
    #[serde(rename = "sftp")]
    Sftp,
    #[serde(rename = "ftp")]
    Ftp,
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "nextcloud")]
    Nextcloud,
    #[serde(rename = "owncloud")]
    OwnCloud,
    #[serde(rename = "seafile")]
    Seafile,
    #[serde(rename = "koofr")]
    Koofr,
    #[serde(rename = "yandex")]
    YandexDisk,
    #[serde(rename = "mailru")]
    MailRuCloud,
    #[serde(rename = "b2")]
    BackblazeB2,
    #[serde(rename = "wasabi")]
    Wasabi,
    #[serde(rename = "spaces")]
    DigitalOceanSpaces,
    #[serde(rename = "r2")]
    CloudflareR2,
    #[serde(rename = "scaleway")]
    Scaleway,
    #[serde(rename = "oraclecloud")]
    OracleCloud,
    #[serde(rename = "storj")]
    Storj,
    #[serde(rename = "filebase")]
    Filebase,
    #[serde(rename = "gcs")]
    GoogleCloudStorage,
    #[serde(rename = "azureblob")]
    AzureBlob,
    #[serde(rename = "azurefiles")]
    AzureFiles,
    #[serde(rename = "onedrive-business")]
    OneDriveBusiness,
    #[serde(rename = "sharepoint")]
    SharePoint,
    #[serde(rename = "oss")]
    AlibabaOss,
    #[serde(rename = "jottacloud")]
    Jottacloud,
    #[serde(rename = "flickr")]
    Flickr,
    #[serde(rename = "sugarsync")]
    SugarSync,
    #[serde(rename = "opendrive")]
    OpenDrive,
    #[serde(rename = "putio")]
    PutIo,
    #[serde(rename = "premiumizeme")]
    PremiumizeMe,
    #[serde(rename = "quatrix")]
    Quatrix,
    #[serde(rename = "filefabric")]
    FileFabric,
}

const MIB: u64 = 1024 * 1024;

impl ProviderType {
    pub const ALL: [ProviderType; 41] = [
        Self::ProtonDrive,
        Self::GoogleDrive,
        Self::Dropbox,
        Self::OneDrive,
        Self::S3,
        Self::ICloud,
        Self::Mega,
        Self::Box,
        Self::PCloud,
        Self::WebDav,
        Self::Sftp,
        Self::Ftp,
        Self::Local,
        Self::Nextcloud,
        Self::OwnCloud,
        Self::Seafile,
        Self::Koofr,
        Self::YandexDisk,
        Self::MailRuCloud,
        Self::BackblazeB2,
        Self::Wasabi,
        Self::DigitalOceanSpaces,
        Self::CloudflareR2,
        Self::Scaleway,
        Self::OracleCloud,
        Self::Storj,
        Self::Filebase,
        Self::GoogleCloudStorage,
        Self::AzureBlob,
        Self::AzureFiles,
        Self::OneDriveBusiness,
        Self::SharePoint,
        Self::AlibabaOss,
        Self::Jottacloud,
        Self::Flickr,
        Self::SugarSync,
        Self::OpenDrive,
        Self::PutIo,
        Self::PremiumizeMe,
        Self::Quatrix,
        Self::FileFabric,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ProtonDrive => "Proton Drive",
            Self::GoogleDrive => "Google Drive",
            Self::Dropbox => "Dropbox",
            Self::OneDrive => "OneDrive",
            Self::S3 => "Amazon S3",
            Self::ICloud => "iCloud Drive",
            Self::Mega => "MEGA",
            Self::Box => "Box",
            Self::PCloud => "pCloud",
            Self::WebDav => "WebDAV",
            Self::Sftp => "SFTP",
            Self::Ftp => "FTP",
            Self::Local => "Local Storage",
            Self::Nextcloud => "Nextcloud",
            Self::OwnCloud => "ownCloud",
            Self::Seafile => "Seafile",
            Self::Koofr => "Koofr",
            Self::YandexDisk => "Yandex Disk",
            Self::MailRuCloud => "Mail.ru Cloud",
            Self::BackblazeB2 => "Backblaze B2",
            Self::Wasabi => "Wasabi",
            Self::DigitalOceanSpaces => "DigitalOcean Spaces",
            Self::CloudflareR2 => "Cloudflare R2",
            Self::Scaleway => "Scaleway",
            Self::OracleCloud => "Oracle Cloud",
            Self::Storj => "Storj",
            Self::Filebase => "Filebase",
            Self::GoogleCloudStorage => "Google Cloud Storage",
            Self::AzureBlob => "Azure Blob Storage",
            Self::AzureFiles => "Azure Files",
            Self::OneDriveBusiness => "OneDrive for Business",
            Self::SharePoint => "SharePoint",
            Self::AlibabaOss => "Alibaba Cloud OSS",
            Self::Jottacloud => "Jottacloud",
            Self::Flickr => "Flickr",
            Self::SugarSync => "SugarSync",
            Self::OpenDrive => "OpenDrive",
            Self::PutIo => "Put.io",
            Self::PremiumizeMe => "Premiumize.me",
            Self::Quatrix => "Quatrix",
            Self::FileFabric => "File Fabric",
        }
    }

    /// Connection name used when a remote has no custom one. The local
    /// filesystem has no connection name at all.
    pub fn default_connection_name(&self) -> &'static str {
        match self {
            Self::ProtonDrive => "proton",
            Self::GoogleDrive => "google",
            Self::ICloud => "icloud",
            Self::Local => "",
            Self::YandexDisk => "yandex",
            Self::MailRuCloud => "mailru",
            Self::BackblazeB2 => "b2",
            Self::DigitalOceanSpaces => "spaces",
            Self::CloudflareR2 => "r2",
            Self::GoogleCloudStorage => "gcs",
            Self::AlibabaOss => "oss",
            Self::OneDriveBusiness => "onedrive-business",
            other => other.rclone_type(),
        }
    }

    /// The serialized identifier, which doubles as rclone's backend name for
    /// most providers.
    pub fn rclone_type(&self) -> &'static str {
        match self {
            Self::ProtonDrive => "proton",
            Self::GoogleDrive => "gdrive",
            Self::Dropbox => "dropbox",
            Self::OneDrive => "onedrive",
            Self::S3 => "s3",
            Self::ICloud => "icloud",
            Self::Mega => "mega",
            Self::Box => "box",
            Self::PCloud => "pcloud",
            Self::WebDav => "webdav",
            Self::Sftp => "sftp",
            Self::Ftp => "ftp",
            Self::Local => "local",
            Self::Nextcloud => "nextcloud",
            Self::OwnCloud => "owncloud",
            Self::Seafile => "seafile",
            Self::Koofr => "koofr",
            Self::YandexDisk => "yandex",
            Self::MailRuCloud => "mailru",
            Self::BackblazeB2 => "b2",
            Self::Wasabi => "wasabi",
            Self::DigitalOceanSpaces => "spaces",
            Self::CloudflareR2 => "r2",
            Self::Scaleway => "scaleway",
            Self::OracleCloud => "oraclecloud",
            Self::Storj => "storj",
            Self::Filebase => "filebase",
            Self::GoogleCloudStorage => "gcs",
            Self::AzureBlob => "azureblob",
            Self::AzureFiles => "azurefiles",
            Self::OneDriveBusiness => "onedrive-business",
            Self::SharePoint => "sharepoint",
            Self::AlibabaOss => "oss",
            Self::Jottacloud => "jottacloud",
            Self::Flickr => "flickr",
            Self::SugarSync => "sugarsync",
            Self::OpenDrive => "opendrive",
            Self::PutIo => "putio",
            Self::PremiumizeMe => "premiumizeme",
            Self::Quatrix => "quatrix",
            Self::FileFabric => "filefabric",
        }
    }

    pub fn category(&self) -> ProviderCategory {
        match self {
            Self::Local | Self::ICloud => ProviderCategory::Local,
            Self::S3
            | Self::BackblazeB2
            | Self::Wasabi
            | Self::DigitalOceanSpaces
            | Self::CloudflareR2
            | Self::Scaleway
            | Self::OracleCloud
            | Self::Storj
            | Self::Filebase
            | Self::GoogleCloudStorage
            | Self::AzureBlob
            | Self::AzureFiles
            | Self::AlibabaOss => ProviderCategory::ObjectStorage,
            Self::WebDav
            | Self::Sftp
            | Self::Ftp
            | Self::Nextcloud
            | Self::OwnCloud
            | Self::Seafile => ProviderCategory::Protocol,
            _ => ProviderCategory::OAuthCloud,
        }
    }

    pub fn requires_oauth(&self) -> bool {
        matches!(
            self,
            Self::GoogleDrive
                | Self::Dropbox
                | Self::OneDrive
                | Self::Box
                | Self::YandexDisk
                | Self::GoogleCloudStorage
                | Self::OneDriveBusiness
                | Self::SharePoint
                | Self::Flickr
                | Self::SugarSync
                | Self::OpenDrive
                | Self::PutIo
                | Self::PremiumizeMe
                | Self::Quatrix
                | Self::FileFabric
                | Self::PCloud
        )
    }

    /// Upload chunk size that suits the provider's API.
    pub fn chunk_size(&self) -> u64 {
        match self {
            Self::Local | Self::ICloud => 64 * MIB,
            Self::S3
            | Self::BackblazeB2
            | Self::Wasabi
            | Self::DigitalOceanSpaces
            | Self::CloudflareR2
            | Self::Scaleway
            | Self::OracleCloud
            | Self::Storj
            | Self::Filebase
            | Self::GoogleCloudStorage
            | Self::AzureBlob
            | Self::AlibabaOss
            | Self::AzureFiles => 16 * MIB,
            Self::OneDrive | Self::OneDriveBusiness | Self::SharePoint => 10 * MIB,
            Self::Dropbox => 150 * MIB,
            Self::ProtonDrive => 4 * MIB,
            Self::Sftp | Self::Ftp | Self::WebDav | Self::Nextcloud | Self::OwnCloud => 32 * MIB,
            Self::Mega => 20 * MIB,
            Self::PCloud => 5 * MIB,
            _ => 8 * MIB,
        }
    }

    /// The backend-specific chunk size flag, for backends that have one.
    pub fn chunk_size_flag(&self) -> Option<String> {
        let backend = match self {
            Self::GoogleDrive => "drive",
            Self::S3
            | Self::Wasabi
            | Self::DigitalOceanSpaces
            | Self::CloudflareR2
            | Self::Scaleway
            | Self::OracleCloud
            | Self::Filebase => "s3",
            Self::OneDrive | Self::OneDriveBusiness | Self::SharePoint => "onedrive",
            Self::Dropbox => "dropbox",
            Self::BackblazeB2 => "b2",
            Self::Box => "box",
            Self::GoogleCloudStorage => "gcs",
            Self::AzureBlob => "azureblob",
            Self::PCloud => "pcloud",
            Self::Mega => "mega",
            Self::Jottacloud => "jottacloud",
            Self::PutIo => "putio",
            _ => return None,
        };
        Some(format!("--{backend}-chunk-size={}M", self.chunk_size() / MIB))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

/// A configured endpoint. Identity is the `id` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudRemote {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub provider: ProviderType,
    pub is_configured: bool,
    pub account_name: Option<String>,
    pub custom_connection_name: Option<String>,
    /// Root directory for the local provider.
    pub path: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
}

impl PartialEq for CloudRemote {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CloudRemote {}

impl Hash for CloudRemote {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl CloudRemote {
    pub fn new(name: impl Into<String>, provider: ProviderType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            provider,
            is_configured: false,
            account_name: None,
            custom_connection_name: None,
            path: None,
            sort_order: 0,
        }
    }

    pub fn local(name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            is_configured: true,
            path: Some(root.into()),
            ..Self::new(name, ProviderType::Local)
        }
    }

    pub fn configured(mut self) -> Self {
        self.is_configured = true;
        self
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.custom_connection_name = Some(name.into());
        self
    }

    pub fn with_sort_order(mut self, order: i32) -> Self {
        self.sort_order = order;
        self
    }

    pub fn with_account_name(mut self, account: impl Into<String>) -> Self {
        self.account_name = Some(account.into());
        self
    }

    pub fn connection_name(&self) -> String {
        if self.provider.is_local() {
            return String::new();
        }
        match &self.custom_connection_name {
            Some(custom) if !custom.is_empty() => custom.clone(),
            _ => self.provider.default_connection_name().to_string(),
        }
    }

    /// Build the argument rclone sees for `path` on this remote:
    /// `<connection>:<path>`, or a plain filesystem path for local remotes.
    /// `path` must already be validated.
    pub fn remote_spec(&self, path: &str) -> String {
        if self.provider.is_local() {
            return match (&self.path, path.starts_with('/')) {
                (Some(root), false) if !root.is_empty() => {
                    Path::new(root).join(path).to_string_lossy().into_owned()
                }
                _ => path.to_string(),
            };
        }
        format!("{}:{}", self.connection_name(), path)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("remote {0} is already registered")]
    DuplicateId(Uuid),

    #[error("remote {0} not found")]
    NotFound(Uuid),

    #[error("local remote {0} cannot be reordered")]
    LocalNotReorderable(Uuid),

    #[error("move index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid connection name: {0}")]
    InvalidConnectionName(String),

    #[error("failed to persist remotes: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode remotes: {0}")]
    Json(#[from] serde_json::Error),
}

/// Ordered collection of configured remotes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemotesRegistry {
    remotes: Vec<CloudRemote>,
}

impl RemotesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the local filesystem rooted at `home`.
    pub fn with_local(home: impl Into<String>) -> Self {
        Self {
            remotes: vec![CloudRemote::local("Local Storage", home)],
        }
    }

    pub fn add(&mut self, remote: CloudRemote) -> Result<(), RegistryError> {
        if self.remotes.iter().any(|r| r.id == remote.id) {
            return Err(RegistryError::DuplicateId(remote.id));
        }
        if let Some(name) = &remote.custom_connection_name {
            crate::input_validation::validate_connection_name(name)
                .map_err(|_| RegistryError::InvalidConnectionName(name.clone()))?;
        }
        self.remotes.push(remote);
        Ok(())
    }

    pub fn remove(&mut self, id: Uuid) -> Result<CloudRemote, RegistryError> {
        let index = self.index_of(id)?;
        Ok(self.remotes.remove(index))
    }

    pub fn update(&mut self, remote: CloudRemote) -> Result<(), RegistryError> {
        let index = self.index_of(remote.id)?;
        self.remotes[index] = remote;
        Ok(())
    }

    pub fn rename(&mut self, id: Uuid, name: impl Into<String>) -> Result<(), RegistryError> {
        let index = self.index_of(id)?;
        self.remotes[index].name = name.into();
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<&CloudRemote> {
        self.remotes.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    /// Resolve a remote identifier to its connection name.
    pub fn resolve(&self, id: Uuid) -> Result<String, RegistryError> {
        self.get(id)
            .map(CloudRemote::connection_name)
            .ok_or(RegistryError::NotFound(id))
    }

    /// rclone argument for `path` on remote `id`. `path` must already be validated.
    pub fn remote_spec(&self, id: Uuid, path: &str) -> Result<String, RegistryError> {
        self.get(id)
            .map(|remote| remote.remote_spec(path))
            .ok_or(RegistryError::NotFound(id))
    }

    /// All remotes ordered by sort order; ties keep insertion order.
    pub fn sorted(&self) -> Vec<CloudRemote> {
        let mut sorted = self.remotes.clone();
        sorted.sort_by_key(|r| r.sort_order);
        sorted
    }

    pub fn configured(&self) -> Vec<CloudRemote> {
        self.sorted().into_iter().filter(|r| r.is_configured).collect()
    }

    /// Configured remotes that are not the local filesystem.
    pub fn cloud_remotes(&self) -> Vec<CloudRemote> {
        self.sorted()
            .into_iter()
            .filter(|r| r.is_configured && !r.provider.is_local())
            .collect()
    }

    /// Move a cloud remote within the cloud-only ordering and renumber the
    /// cloud remotes 0..n. Local remotes are left untouched.
    pub fn move_remote(&mut self, from: usize, to: usize) -> Result<(), RegistryError> {
        let mut cloud: Vec<Uuid> = self
            .sorted()
            .into_iter()
            .filter(|r| !r.provider.is_local())
            .map(|r| r.id)
            .collect();

        let len = cloud.len();
        if from >= len {
            return Err(RegistryError::IndexOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(RegistryError::IndexOutOfRange { index: to, len });
        }

        let id = cloud.remove(from);
        cloud.insert(to, id);
        self.apply_order(&cloud);
        Ok(())
    }

    /// Set the cloud ordering explicitly. Every non-local remote must appear
    /// exactly once; naming a local remote is an error.
    pub fn reorder(&mut self, order: &[Uuid]) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for id in order {
            let remote = self.get(*id).ok_or(RegistryError::NotFound(*id))?;
            if remote.provider.is_local() {
                return Err(RegistryError::LocalNotReorderable(*id));
            }
            if !seen.insert(*id) {
                return Err(RegistryError::DuplicateId(*id));
            }
        }
        if let Some(missing) = self
            .remotes
            .iter()
            .find(|r| !r.provider.is_local() && !seen.contains(&r.id))
        {
            return Err(RegistryError::NotFound(missing.id));
        }
        self.apply_order(order);
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        write_json(path, &self.remotes)
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let remotes = read_json::<_, RegistryError>(path)?;
        Ok(Self { remotes })
    }

    fn index_of(&self, id: Uuid) -> Result<usize, RegistryError> {
        self.remotes
            .iter()
            .position(|r| r.id == id)
            .ok_or(RegistryError::NotFound(id))
    }

    fn apply_order(&mut self, order: &[Uuid]) {
        for (position, id) in order.iter().enumerate() {
            if let Some(remote) = self.remotes.iter_mut().find(|r| r.id == *id) {
                remote.sort_order = position as i32;
            }
        }
    }
}

/// One entry of an `lsjson` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteEntry {
    pub path: String,
    pub name: String,
    /// `-1` for directories.
    pub size: i64,
    pub mime_type: String,
    #[serde(with = "mod_time")]
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
}

impl RemoteEntry {
    pub const DIRECTORY_SIZE: i64 = -1;

    pub fn size_bytes(&self) -> Option<u64> {
        u64::try_from(self.size).ok().filter(|_| !self.is_dir)
    }
}

mod mod_time {
    use super::*;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sort_order_is_zero() {
        let remote = CloudRemote::new("Test", ProviderType::Dropbox);
        assert_eq!(remote.sort_order, 0);
    }

    #[test]
    fn test_identity_is_id_only() {
        let a = CloudRemote::new("A", ProviderType::Dropbox);
        let mut b = a.clone();
        b.name = "Renamed".into();
        b.provider = ProviderType::Box;
        assert_eq!(a, b);
        assert_ne!(a, CloudRemote::new("A", ProviderType::Dropbox));
    }

    #[test]
    fn test_connection_name_resolution() {
        let drive = CloudRemote::new("Drive", ProviderType::GoogleDrive);
        assert_eq!(drive.connection_name(), "google");

        let custom = drive.clone().with_connection_name("work-drive");
        assert_eq!(custom.connection_name(), "work-drive");

        let empty_custom = drive.with_connection_name("");
        assert_eq!(empty_custom.connection_name(), "google");

        let local = CloudRemote::local("Local", "/home/me");
        assert_eq!(local.connection_name(), "");
    }

    #[test]
    fn test_remote_spec() {
        let dropbox = CloudRemote::new("Dropbox", ProviderType::Dropbox);
        assert_eq!(dropbox.remote_spec("Photos/2024"), "dropbox:Photos/2024");
        assert_eq!(dropbox.remote_spec(""), "dropbox:");

        let local = CloudRemote::local("Local", "/home/me");
        assert_eq!(local.remote_spec("/tmp/a"), "/tmp/a");
        assert_eq!(local.remote_spec("docs"), "/home/me/docs");
    }

    #[test]
    fn test_every_provider_has_distinct_identifier() {
        let ids: HashSet<_> = ProviderType::ALL.iter().map(|p| p.rclone_type()).collect();
        assert_eq!(ids.len(), ProviderType::ALL.len());
        for provider in ProviderType::ALL {
            let json = serde_json::to_string(&provider).unwrap();
            assert_eq!(json, format!("\"{}\"", provider.rclone_type()));
        }
    }

    #[test]
    fn test_chunk_size_flags() {
        assert_eq!(
            ProviderType::GoogleDrive.chunk_size_flag().as_deref(),
            Some("--drive-chunk-size=8M")
        );
        assert_eq!(
            ProviderType::Dropbox.chunk_size_flag().as_deref(),
            Some("--dropbox-chunk-size=150M")
        );
        assert_eq!(ProviderType::Local.chunk_size_flag(), None);
    }

    #[test]
    fn test_sort_by_sort_order() {
        let mut registry = RemotesRegistry::new();
        registry
            .add(CloudRemote::new("C", ProviderType::Dropbox).with_sort_order(2))
            .unwrap();
        registry
            .add(CloudRemote::new("A", ProviderType::GoogleDrive).with_sort_order(0))
            .unwrap();
        registry
            .add(CloudRemote::new("B", ProviderType::OneDrive).with_sort_order(1))
            .unwrap();

        let names: Vec<_> = registry.sorted().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_move_remote_excludes_local() {
        let mut registry = RemotesRegistry::with_local("/home/me");
        for (i, name) in ["A", "B", "C"].iter().enumerate() {
            registry
                .add(
                    CloudRemote::new(*name, ProviderType::Dropbox)
                        .configured()
                        .with_sort_order(i as i32),
                )
                .unwrap();
        }

        registry.move_remote(2, 0).unwrap();

        let cloud: Vec<_> = registry
            .cloud_remotes()
            .into_iter()
            .map(|r| (r.name, r.sort_order))
            .collect();
        assert_eq!(
            cloud,
            vec![("C".to_string(), 0), ("A".to_string(), 1), ("B".to_string(), 2)]
        );

        let local = registry.sorted().into_iter().find(|r| r.provider.is_local());
        assert_eq!(local.map(|r| r.sort_order), Some(0));
        assert!(registry.move_remote(3, 0).is_err());
    }

    #[test]
    fn test_reorder_rejects_local() {
        let mut registry = RemotesRegistry::with_local("/home/me");
        let cloud = CloudRemote::new("Box", ProviderType::Box);
        let cloud_id = cloud.id;
        registry.add(cloud).unwrap();
        let local_id = registry.sorted()[0].id;

        assert!(matches!(
            registry.reorder(&[local_id, cloud_id]),
            Err(RegistryError::LocalNotReorderable(_))
        ));
        assert!(registry.reorder(&[cloud_id]).is_ok());
    }

    #[test]
    fn test_add_remove_update() {
        let mut registry = RemotesRegistry::new();
        let remote = CloudRemote::new("Mega", ProviderType::Mega);
        let id = remote.id;
        registry.add(remote.clone()).unwrap();
        assert!(matches!(
            registry.add(remote),
            Err(RegistryError::DuplicateId(_))
        ));

        registry.rename(id, "My MEGA").unwrap();
        assert_eq!(registry.get(id).unwrap().name, "My MEGA");
        assert_eq!(registry.resolve(id).unwrap(), "mega");
        assert_eq!(registry.remote_spec(id, "Vault/x").unwrap(), "mega:Vault/x");

        registry.remove(id).unwrap();
        assert!(registry.get(id).is_none());
        assert!(matches!(registry.resolve(id), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_rejects_bad_connection_name() {
        let mut registry = RemotesRegistry::new();
        let remote = CloudRemote::new("S3", ProviderType::S3).with_connection_name("bad:name");
        assert!(matches!(
            registry.add(remote),
            Err(RegistryError::InvalidConnectionName(_))
        ));
    }

    #[test]
    fn test_registry_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remotes.json");

        let mut registry = RemotesRegistry::with_local("/home/me");
        registry
            .add(
                CloudRemote::new("Work", ProviderType::OneDriveBusiness)
                    .configured()
                    .with_account_name("me@example.com")
                    .with_sort_order(3),
            )
            .unwrap();
        registry.save(&path).unwrap();

        let loaded = RemotesRegistry::load(&path).unwrap();
        let original = registry.sorted();
        let restored = loaded.sorted();
        assert_eq!(original.len(), restored.len());
        for (a, b) in original.iter().zip(restored.iter()) {
            assert_eq!(serde_json::to_value(a).unwrap(), serde_json::to_value(b).unwrap());
        }
    }

    #[test]
    fn test_save_replaces_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/remotes.json");

        let mut registry = RemotesRegistry::with_local("/home/me");
        registry.save(&path).unwrap();
        registry
            .add(CloudRemote::new("Box", ProviderType::Box).configured())
            .unwrap();
        registry.save(&path).unwrap();

        let names: Vec<String> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["remotes.json"]);
        assert_eq!(RemotesRegistry::load(&path).unwrap().len(), 2);

        std::fs::write(&path, "[{").unwrap();
        assert!(matches!(RemotesRegistry::load(&path), Err(RegistryError::Json(_))));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RemotesRegistry::load(&dir.path().join("none.json")).unwrap().is_empty());
    }

    #[test]
    fn test_absent_optionals_serialize_as_null() {
        let remote = CloudRemote::new("Box", ProviderType::Box);
        let value = serde_json::to_value(&remote).unwrap();
        assert!(value["accountName"].is_null());
        assert!(value.as_object().unwrap().contains_key("customConnectionName"));
        assert_eq!(value["type"], "box");
    }

    #[test]
    fn test_remote_entry_lsjson_roundtrip() {
        let json = r#"[
            {"Path":"Photos","Name":"Photos","Size":-1,"MimeType":"inode/directory","ModTime":"2024-01-15T10:30:00.123456789Z","IsDir":true},
            {"Path":"Photos/a.jpg","Name":"a.jpg","Size":2048,"MimeType":"image/jpeg","ModTime":"2024-01-15T10:31:00.5Z","IsDir":false}
        ]"#;
        let entries: Vec<RemoteEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].size, RemoteEntry::DIRECTORY_SIZE);
        assert_eq!(entries[0].size_bytes(), None);
        assert_eq!(entries[1].size_bytes(), Some(2048));

        let encoded = serde_json::to_string(&entries).unwrap();
        assert!(encoded.contains("\"ModTime\":\"2024-01-15T10:30:00.123456789Z\""));
        let decoded: Vec<RemoteEntry> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(entries, decoded);
    }
}
