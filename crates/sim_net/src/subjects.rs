//! Subject hierarchy for the NATS transport.
//!
//! All subjects are namespaced under `sim.<run_id>.` so concurrent runs on
//! a shared NATS cluster never cross-deliver.

/// Root prefix for all transport subjects.
pub const PREFIX: &str = "sim";

/// A rank's inbox: everything addressed to it arrives here.
///
/// `sim.<run_id>.rank.<rank>`
#[must_use]
pub fn rank_inbox(run_id: &str, rank: u32) -> String {
    format!("{PREFIX}.{run_id}.rank.{rank}")
}

/// Announcement subject used while ranks discover each other at startup.
///
/// `sim.<run_id>.hello`
#[must_use]
pub fn hello(run_id: &str) -> String {
    format!("{PREFIX}.{run_id}.hello")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_inbox_subject() {
        assert_eq!(rank_inbox("run42", 3), "sim.run42.rank.3");
    }

    #[test]
    fn test_hello_subject() {
        assert_eq!(hello("run42"), "sim.run42.hello");
    }
}
