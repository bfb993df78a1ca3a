/// External collaborators reached over HTTP
///
/// Each collaborator sits behind a trait so the pipeline can run against
/// fakes in tests.

pub mod analysis;
pub mod geocoder;
pub mod notifier;

pub use analysis::{AnalysisService, AnalysisStatus, HttpAnalysisClient, RecordKind, RecordRef};
pub use geocoder::{Geocoder, HttpGeocoder};
pub use notifier::{LogNotifier, NotificationKind, Notifier, PushNotifier};
