/// Job orchestration
///
/// Pipeline stages run as typed [`Task`]s pulled from a [`Broker`] by a
/// [`Worker`]. Tasks are submitted through a [`JobClient`], either for
/// immediate execution or at a future time. A stage that succeeds enqueues
/// the stages listed in [`TaskKind::next`].

mod broker;
mod client;
mod task;
mod worker;

pub use broker::{create_broker, Broker, MemoryBroker, RedisBroker};
pub use client::JobClient;
pub use task::{ArchiveRef, Job, Task, TaskKind};
pub use worker::{execute, JobHandler, Worker};
