//! Last-fetch-wins sequencing for site listings.
//!
//! Every fetch is issued with a ticket carrying a monotonically increasing
//! sequence number. Only the most recent ticket that has not been cancelled
//! may apply its result; everything older is dropped.

use crate::model::project::ProjectId;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    seq: u64,
    project_id: ProjectId,
}

impl FetchTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }
}

#[derive(Debug, Default)]
pub struct FetchSequencer {
    issued: u64,
    /// Tickets with `seq <= cancelled_through` are dead.
    cancelled_through: u64,
}

impl FetchSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a ticket that supersedes every earlier one.
    pub fn begin(&mut self, project_id: ProjectId) -> FetchTicket {
        self.issued += 1;
        FetchTicket {
            seq: self.issued,
            project_id,
        }
    }

    /// Whether `ticket` may still apply its result.
    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.seq == self.issued && ticket.seq > self.cancelled_through
    }

    /// Consumes `ticket` if current. A ticket applies at most once.
    pub fn accept(&mut self, ticket: &FetchTicket) -> bool {
        if !self.is_current(ticket) {
            debug!(
                "event=site_fetch module=map status=drop seq={} latest={}",
                ticket.seq, self.issued
            );
            return false;
        }
        self.cancelled_through = ticket.seq;
        true
    }

    /// Drops interest in every outstanding ticket.
    pub fn cancel_all(&mut self) {
        self.cancelled_through = self.issued;
    }

    /// Sequence number of the outstanding ticket, if any.
    pub fn pending_seq(&self) -> Option<u64> {
        (self.issued > self.cancelled_through).then_some(self.issued)
    }
}

#[cfg(test)]
mod tests {
    use super::FetchSequencer;
    use uuid::Uuid;

    #[test]
    fn older_ticket_is_dropped_after_newer_begins() {
        let mut feed = FetchSequencer::new();
        let first = feed.begin(Uuid::new_v4());
        let second = feed.begin(Uuid::new_v4());
        assert!(!feed.accept(&first));
        assert!(feed.accept(&second));
    }

    #[test]
    fn ticket_applies_once() {
        let mut feed = FetchSequencer::new();
        let ticket = feed.begin(Uuid::new_v4());
        assert!(feed.accept(&ticket));
        assert!(!feed.accept(&ticket));
    }

    #[test]
    fn cancel_all_kills_outstanding_ticket() {
        let mut feed = FetchSequencer::new();
        let ticket = feed.begin(Uuid::new_v4());
        feed.cancel_all();
        assert!(!feed.is_current(&ticket));
        assert!(feed.pending_seq().is_none());
    }
}
