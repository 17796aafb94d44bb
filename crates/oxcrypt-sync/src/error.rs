//! Error types for the sync core.
//!
//! Errors are layered the same way the pipeline is:
//!
//! - [`CloudProviderError`]: categories reported by a cloud backend.
//! - [`MetadataError`]: failures of the metadata store collaborator.
//! - [`DependencyError`]: why a dependency node released with an error.
//! - [`SyncError`]: what callers of a workflow observe. Its first variants
//!   form the host-facing taxonomy; backend errors that have no host
//!   equivalent pass through untouched as [`SyncError::Cloud`].
//!
//! [`ErrorCategory`] classifies errors into the host taxonomy and is what the
//! error-mapping middleware uses to translate backend failures.

use crate::item::ItemId;
use crate::locks::LockClass;
use crate::path::CloudPath;
use crate::task::TaskKind;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a [`CloudProvider`](crate::cloud::CloudProvider).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudProviderError {
    /// No item exists at the path.
    #[error("Item not found: {path}")]
    ItemNotFound { path: CloudPath },

    /// An item already exists at the path.
    #[error("Item already exists: {path}")]
    ItemAlreadyExists { path: CloudPath },

    /// The parent folder of the path does not exist.
    #[error("Parent folder does not exist: {path}")]
    ParentFolderDoesNotExist { path: CloudPath },

    /// The account has no room left.
    #[error("Insufficient quota")]
    QuotaInsufficient,

    /// Credentials were rejected.
    #[error("Unauthorized")]
    Unauthorized,

    /// The backend could not be reached.
    #[error("No internet connection")]
    NoInternetConnection,

    /// A listing continuation token is no longer valid.
    #[error("Page token is invalid")]
    PageTokenInvalid,

    /// Expected a file but found a folder, or vice versa.
    #[error("Item type mismatch: {path}")]
    ItemTypeMismatch { path: CloudPath },

    /// Any backend failure without a dedicated category.
    #[error("Cloud provider error: {0}")]
    Other(String),
}

/// Errors reported by a [`MetadataStore`](crate::metadata::MetadataStore).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    /// No cached metadata for the identifier.
    #[error("No cached metadata for item {id}")]
    ItemNotFound { id: ItemId },

    /// The item was never cached and has no identifier.
    #[error("Item at {path} has no identifier")]
    MissingId { path: CloudPath },

    /// Backing storage failure.
    #[error("Metadata storage failed: {0}")]
    Storage(String),
}

/// Reason a dependency node released with an error.
///
/// Dependents observe this through a node's `unlocked` state but are never
/// blocked by it: a failed or abandoned node still counts as released.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DependencyError {
    /// The workflow holding the node failed.
    #[error("Workflow at {path} failed: {reason}")]
    Failed { path: CloudPath, reason: String },

    /// The node was dropped without being unlocked.
    #[error("Dependency node at {path} was abandoned")]
    Abandoned { path: CloudPath },
}

/// Errors surfaced to callers of a workflow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The item does not exist.
    #[error("No such item: {path}")]
    NotFound { path: CloudPath },

    /// An item with the same name already exists (name collision).
    #[error("Filename collision: {path}")]
    AlreadyExists { path: CloudPath },

    /// The parent folder of the item does not exist.
    #[error("Parent folder missing: {path}")]
    ParentMissing { path: CloudPath },

    /// The cloud account is out of space.
    #[error("Insufficient quota")]
    QuotaExceeded,

    /// The cloud account needs to be re-authenticated.
    #[error("Not authenticated")]
    Unauthorized,

    /// No connectivity to the cloud backend.
    #[error("Server unreachable")]
    Unreachable,

    /// The enumeration must restart from scratch.
    #[error("Continuation token expired")]
    StaleContinuationToken,

    /// The item has a different type than the operation expects.
    #[error("Item type mismatch: {path}")]
    TypeMismatch { path: CloudPath },

    /// A middleware has no next handler configured.
    #[error("Middleware {handler} has no next handler")]
    MissingHandler { handler: &'static str },

    /// A middleware received a task kind it cannot process.
    #[error("Middleware {handler} cannot process {kind} tasks")]
    IncompatibleTask {
        handler: &'static str,
        kind: TaskKind,
    },

    /// A move whose source and target are in an ancestor relation.
    #[error("Cannot move {from} to {to}")]
    InvalidMove { from: CloudPath, to: CloudPath },

    /// A lock sequence would upgrade a lock it already holds for reading.
    #[error("Lock sequence re-acquires {class} lock on {path} for writing")]
    ReentrantLock { path: CloudPath, class: LockClass },

    /// Locks could not be acquired within the configured timeout.
    #[error("Timed out after {timeout:?} waiting for locks on {path}")]
    LockTimeout { path: CloudPath, timeout: Duration },

    /// The workflow scheduler no longer admits workflows.
    #[error("Scheduler is shut down")]
    SchedulerClosed,

    /// Untranslated cloud provider error.
    #[error(transparent)]
    Cloud(#[from] CloudProviderError),

    /// Metadata store error.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Whether this error reports a name collision, translated or not.
    pub fn is_collision(&self) -> bool {
        matches!(
            self,
            SyncError::AlreadyExists { .. }
                | SyncError::Cloud(CloudProviderError::ItemAlreadyExists { .. })
        )
    }

    /// Whether this error is a pipeline misconfiguration.
    ///
    /// These are programmer errors and are never retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SyncError::MissingHandler { .. }
                | SyncError::IncompatibleTask { .. }
                | SyncError::ReentrantLock { .. }
        )
    }

    /// The host-facing category of this error, if it has one.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            SyncError::NotFound { .. } => Some(ErrorCategory::NotFound),
            SyncError::AlreadyExists { .. } => Some(ErrorCategory::AlreadyExists),
            SyncError::ParentMissing { .. } => Some(ErrorCategory::ParentMissing),
            SyncError::QuotaExceeded => Some(ErrorCategory::QuotaExceeded),
            SyncError::Unauthorized => Some(ErrorCategory::Unauthorized),
            SyncError::Unreachable => Some(ErrorCategory::Unreachable),
            SyncError::StaleContinuationToken => Some(ErrorCategory::StaleContinuationToken),
            SyncError::TypeMismatch { .. } => Some(ErrorCategory::TypeMismatch),
            SyncError::Cloud(e) => ErrorCategory::from_cloud(e),
            _ => None,
        }
    }
}

/// Host-facing error categories.
///
/// Backends report [`CloudProviderError`]s; the host only understands this
/// smaller set. The offending path travels alongside the category where one
/// exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Item missing.
    NotFound,
    /// Name collision.
    AlreadyExists,
    /// Parent folder missing.
    ParentMissing,
    /// Out of quota.
    QuotaExceeded,
    /// Authentication required.
    Unauthorized,
    /// No connectivity.
    Unreachable,
    /// Enumeration anchor expired.
    StaleContinuationToken,
    /// File/folder type mismatch.
    TypeMismatch,
}

impl ErrorCategory {
    /// Classify a backend error. Returns `None` for [`CloudProviderError::Other`].
    pub fn from_cloud(e: &CloudProviderError) -> Option<Self> {
        match e {
            CloudProviderError::ItemNotFound { .. } => Some(Self::NotFound),
            CloudProviderError::ItemAlreadyExists { .. } => Some(Self::AlreadyExists),
            CloudProviderError::ParentFolderDoesNotExist { .. } => Some(Self::ParentMissing),
            CloudProviderError::QuotaInsufficient => Some(Self::QuotaExceeded),
            CloudProviderError::Unauthorized => Some(Self::Unauthorized),
            CloudProviderError::NoInternetConnection => Some(Self::Unreachable),
            CloudProviderError::PageTokenInvalid => Some(Self::StaleContinuationToken),
            CloudProviderError::ItemTypeMismatch { .. } => Some(Self::TypeMismatch),
            CloudProviderError::Other(_) => None,
        }
    }

    /// Build the host-facing error for this category.
    ///
    /// `path` is used by the categories that carry one.
    pub fn into_error(self, path: CloudPath) -> SyncError {
        match self {
            Self::NotFound => SyncError::NotFound { path },
            Self::AlreadyExists => SyncError::AlreadyExists { path },
            Self::ParentMissing => SyncError::ParentMissing { path },
            Self::QuotaExceeded => SyncError::QuotaExceeded,
            Self::Unauthorized => SyncError::Unauthorized,
            Self::Unreachable => SyncError::Unreachable,
            Self::StaleContinuationToken => SyncError::StaleContinuationToken,
            Self::TypeMismatch => SyncError::TypeMismatch { path },
        }
    }

    /// Returns a human-readable name for this error category.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::ParentMissing => "ParentMissing",
            Self::QuotaExceeded => "QuotaExceeded",
            Self::Unauthorized => "Unauthorized",
            Self::Unreachable => "Unreachable",
            Self::StaleContinuationToken => "StaleContinuationToken",
            Self::TypeMismatch => "TypeMismatch",
        }
    }
}

impl CloudProviderError {
    /// The path the error refers to, if it names one.
    pub fn path(&self) -> Option<&CloudPath> {
        match self {
            CloudProviderError::ItemNotFound { path }
            | CloudProviderError::ItemAlreadyExists { path }
            | CloudProviderError::ParentFolderDoesNotExist { path }
            | CloudProviderError::ItemTypeMismatch { path } => Some(path),
            _ => None,
        }
    }

    /// Translate into the host taxonomy.
    ///
    /// Errors without a host category are returned unchanged as
    /// [`SyncError::Cloud`].
    pub fn translate(self) -> SyncError {
        match ErrorCategory::from_cloud(&self) {
            Some(category) => {
                let path = self.path().cloned().unwrap_or_default();
                category.into_error(path)
            }
            None => SyncError::Cloud(self),
        }
    }
}
