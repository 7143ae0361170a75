//! One rotation pass: for every reader, clear the notifications left behind by the
//! last switch, then enable the profile after the currently enabled one.

pub mod select;

use crate::config::Config;
use crate::euicc::command::ISD_R_AID;
use crate::euicc::notification::{self, DeleteResult};
use crate::euicc::profile::EnableResult;
use crate::euicc::{Euicc, Iccid};
use crate::service::Reader;
use crate::store::StateStore;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, trace_span, warn};

pub use select::select_next;

/// How far a reader's pass got. Strictly sequential; a failure stops the reader
/// where it stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    NotificationsRead,
    DeletionsSent,
    ProfilesRead,
    SelectionMade,
    EnableSent,
    Done,
}

#[derive(Debug)]
pub enum Outcome {
    /// The selected profile was enabled.
    Rotated { to: Iccid, deleted: usize },
    /// There was nothing to rotate between; `current` is the only profile, if any.
    Unchanged { current: Option<Iccid> },
    /// The reader's slot is switched off.
    Skipped,
    Failed(Error),
}

#[derive(Debug)]
pub struct ReaderOutcome {
    pub reader: String,
    pub stage: Stage,
    pub eid: Option<Vec<u8>>,
    pub outcome: Outcome,
}

impl ReaderOutcome {
    /// What's shown for, and stored against, the reader.
    pub fn status(&self) -> String {
        match &self.outcome {
            Outcome::Rotated { to, .. } => to.to_string(),
            Outcome::Unchanged { current: Some(iccid) } => iccid.to_string(),
            Outcome::Unchanged { current: None } => "No profiles".into(),
            Outcome::Skipped => "Disabled".into(),
            Outcome::Failed(err) => err.status_message().into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

impl fmt::Display for ReaderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reader, self.status())
    }
}

/// Runs rotation passes, recording each reader's outcome in a [`StateStore`].
#[derive(Debug)]
pub struct Rotator<S: StateStore> {
    store: S,
    refresh: bool,
    max_continuations: usize,
    default_interval: Duration,
}

impl<S: StateStore> Rotator<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            store,
            refresh: config.refresh,
            max_continuations: config.max_continuations,
            default_interval: config.interval(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn run_rotation_pass<R: Reader>(&mut self, readers: &mut [R]) -> Vec<ReaderOutcome> {
        self.run_rotation_pass_at(readers, Utc::now())
    }

    /// Processes every reader in order, one at a time. Nothing a reader does can stop
    /// the others from being processed.
    pub fn run_rotation_pass_at<R: Reader>(
        &mut self,
        readers: &mut [R],
        now: DateTime<Utc>,
    ) -> Vec<ReaderOutcome> {
        let span = trace_span!("rotation_pass", readers = readers.len());
        let _enter = span.enter();

        let outcomes: Vec<_> = readers.iter_mut().map(|r| self.process_reader(r)).collect();

        let interval = self.store.interval().unwrap_or(self.default_interval);
        match chrono::Duration::from_std(interval)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
        {
            Some(next) => {
                debug!(%next, "Next rotation");
                self.store.set_next_switch(next);
            }
            None => warn!(?interval, "Rotation interval out of range, next switch not set"),
        }
        outcomes
    }

    fn process_reader<R: Reader>(&mut self, reader: &mut R) -> ReaderOutcome {
        let name = reader.name().to_owned();
        let span = trace_span!("reader", %name);
        let _enter = span.enter();

        let mut out = ReaderOutcome {
            reader: name,
            stage: Stage::Idle,
            eid: None,
            outcome: Outcome::Skipped,
        };
        if !self.store.slot_enabled(&out.reader) {
            info!("Slot disabled, skipping");
            return out;
        }

        out.outcome = match self.rotate(reader, &mut out.stage, &mut out.eid) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(stage = ?out.stage, %err, "Rotation failed");
                Outcome::Failed(err)
            }
        };
        if let Outcome::Unchanged { current: None } = out.outcome {
            return out;
        }
        self.store.record_status(&out.reader, &out.status());
        out
    }

    fn rotate<R: Reader>(
        &self,
        reader: &mut R,
        stage: &mut Stage,
        eid: &mut Option<Vec<u8>>,
    ) -> Result<Outcome> {
        let channel = reader.open_channel(&ISD_R_AID)?;
        let mut euicc = Euicc::new(channel).with_max_continuations(self.max_continuations);

        *eid = euicc.eid()?;
        info!(eid = ?eid.as_deref().map(hex::encode_upper), "Found eUICC");

        let notifications = euicc.notifications()?;
        *stage = Stage::NotificationsRead;

        let pending = notification::pending_deletions(&notifications);
        let mut deleted = 0;
        for deletion in &pending {
            let seq = hex::encode(&deletion.sequence_number);
            match euicc.delete_notification(&deletion.sequence_number) {
                Ok(DeleteResult::Success) => {
                    debug!(%seq, iccid = %deletion.iccid, smdp = %deletion.smdp_address, "Deleted notification");
                    deleted += 1;
                }
                Ok(result) => warn!(%seq, ?result, "Notification not deleted"),
                Err(err @ (Error::Status(_) | Error::MalformedTlv(_))) => {
                    warn!(%seq, %err, "Notification not deleted")
                }
                Err(err) => return Err(err),
            }
        }
        *stage = Stage::DeletionsSent;

        let profiles = euicc.profiles()?;
        *stage = Stage::ProfilesRead;

        let Some(next) = select_next(&profiles) else {
            info!("No profiles installed");
            *stage = Stage::Done;
            return Ok(Outcome::Unchanged { current: None });
        };
        let next = next.iccid.clone();
        *stage = Stage::SelectionMade;

        if profiles.len() < 2 {
            info!(iccid = %next, "Only one profile, nothing to rotate");
            *stage = Stage::Done;
            return Ok(Outcome::Unchanged {
                current: Some(next),
            });
        }

        info!(iccid = %next, "Enabling profile");
        let result = euicc.enable_profile(&next, self.refresh)?;
        *stage = Stage::EnableSent;
        if result != EnableResult::Success {
            return Err(Error::EnableRejected(result));
        }

        *stage = Stage::Done;
        Ok(Outcome::Rotated { to: next, deleted })
    }
}
